//! Covered-call strategy simulation.
//!
//! - Configuration and validation
//! - Commission model
//! - Contract selection
//! - Portfolio ledger and trade events
//! - Day-by-day engine and output records
//! - Parallel batch runs

pub mod batch;
pub mod commission;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod record;
pub mod selector;

pub use batch::{run_batch, run_batch_with_progress, BatchJob, BatchOutcome};
pub use commission::{Commission, CommissionModel};
pub use config::{ConfigError, SimulationConfig};
pub use engine::{run_simulation, StrategyEngine};
pub use events::{Action, BuyReason, CloseReason, OptionLeg, TradeEvent, WithdrawalStatus};
pub use ledger::{LedgerParams, LedgerSnapshot, PortfolioLedger};
pub use record::{
    render_log, DailyRecord, DayOutcome, OutputRecordBuilder, SimulationReport, SCHEMA_VERSION,
};
pub use selector::OptionSelector;
