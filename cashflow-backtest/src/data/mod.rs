//! Market data: bar types, alignment, providers and file loading.

pub mod aligner;
pub mod loader;
pub mod provider;
pub mod types;

pub use aligner::{align, align_with_stats, sessions, AlignedBar, Alignment, AlignmentStats, DataGapError};
pub use loader::{BarLoader, LoaderError};
pub use provider::{
    ChainSource, InMemoryProvider, ListedChains, MarketDataProvider, MarketDataset, StrikeLadder,
};
pub use types::{Bar, OptionContract, OptionType, TradingDay, UnderlyingBar};
