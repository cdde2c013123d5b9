//! Covered-call cash-flow backtester.
//!
//! Holds a stock position, writes short-dated calls against it each month,
//! buys dips with idle cash and pays a fixed monthly withdrawal, borrowing on
//! margin when cash runs short. Market data is aligned across underlying and
//! option bars with settlement prints filtered out before simulation.

pub mod backtest;
pub mod data;
pub mod error;
pub mod metrics;
pub mod pricing;
pub mod risk;

// Re-export commonly used types
pub use backtest::{
    run_batch, run_simulation, BatchJob, DailyRecord, PortfolioLedger, SimulationConfig,
    SimulationReport, StrategyEngine, TradeEvent,
};
pub use data::{
    BarLoader, ChainSource, MarketDataProvider, MarketDataset, OptionContract, OptionType,
    TradingDay,
};
pub use error::{LedgerError, SimulationError};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use pricing::BlackScholes;
pub use risk::PositionSizer;
