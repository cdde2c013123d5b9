//! Error taxonomy.
//!
//! `SimulationError` aborts a run. `LedgerError` is recoverable: the engine
//! turns it into a `Skipped` event and carries on.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::backtest::config::ConfigError;
use crate::data::aligner::DataGapError;
use crate::data::loader::LoaderError;

/// Run-level failure.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    DataGap(#[from] DataGapError),

    #[error("insufficient capital: cash {cash} cannot buy one share at {price}")]
    InsufficientCapital { cash: Decimal, price: Decimal },

    #[error("invariant violated on {date}: {detail}")]
    InvariantViolation { date: NaiveDate, detail: String },

    #[error("no implied volatility for {date}")]
    MissingVolatility { date: NaiveDate },

    #[error("no trading days between {start} and {end}")]
    EmptySeries { start: NaiveDate, end: NaiveDate },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("data load error: {0}")]
    Loader(#[from] LoaderError),
}

/// A ledger mutation that was refused. State is unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("margin limit exceeded: projected ratio {projected:.4} > {limit:.4}")]
    MarginLimitExceeded { projected: f64, limit: f64 },

    #[error("uncovered write: {requested} contract(s) requested, capacity {capacity}")]
    UncoveredWrite { requested: i64, capacity: i64 },

    #[error("position limit: {requested} shares requested, limit {limit}")]
    PositionLimitExceeded { requested: i64, limit: i64 },

    #[error("unknown option leg {0}")]
    UnknownLeg(u64),

    #[error("invalid quantity {0}")]
    InvalidQuantity(i64),
}

impl LedgerError {
    /// Short reason label used in skip events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MarginLimitExceeded { .. } => "margin_limit",
            Self::UncoveredWrite { .. } => "uncovered_write",
            Self::PositionLimitExceeded { .. } => "position_limit",
            Self::UnknownLeg(_) => "unknown_leg",
            Self::InvalidQuantity(_) => "invalid_quantity",
        }
    }
}

pub type Result<T> = std::result::Result<T, SimulationError>;
