//! Core market data types.
//!
//! Bars are keyed by their interval timestamp. Intraday series from the
//! data provider are aligned first and then rolled into one `TradingDay`
//! per calendar date before the engine sees them.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// A single OHLCV interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Start of the interval (exchange local time).
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Bar {
    /// Calendar date of the interval.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Flat, zero-volume bar as emitted for an end-of-day settlement snapshot.
    ///
    /// Shape alone does not identify a settlement bar: an illiquid interval can
    /// look the same. Alignment never filters on this.
    pub fn is_settlement_shaped(&self) -> bool {
        self.volume == 0
            && self.open == self.high
            && self.high == self.low
            && self.low == self.close
    }
}

/// Underlying price bar with the implied volatility merged for the same interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingBar {
    pub bar: Bar,
    /// Annualized implied volatility (0.20 = 20%).
    pub implied_vol: f64,
}

impl UnderlyingBar {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.bar.timestamp
    }
}

/// A listed (or synthetic) option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol (e.g., "SPY").
    pub underlying: String,
    /// Expiration date.
    pub expiry: NaiveDate,
    /// Strike price.
    pub strike: Decimal,
    /// Call or put.
    pub option_type: OptionType,
    /// Delta from the data provider, when available.
    #[serde(default)]
    pub delta: Option<f64>,
}

impl OptionContract {
    pub fn new(underlying: &str, expiry: NaiveDate, strike: Decimal, option_type: OptionType) -> Self {
        Self {
            underlying: underlying.to_string(),
            expiry,
            strike,
            option_type,
            delta: None,
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Calendar days from `date` to expiry (negative once expired).
    pub fn days_to_expiry(&self, date: NaiveDate) -> i64 {
        (self.expiry - date).num_days()
    }

    /// Intrinsic value per share at `spot`.
    pub fn intrinsic(&self, spot: Decimal) -> Decimal {
        match self.option_type {
            OptionType::Call => (spot - self.strike).max(Decimal::ZERO),
            OptionType::Put => (self.strike - spot).max(Decimal::ZERO),
        }
    }

    pub fn is_in_the_money(&self, spot: Decimal) -> bool {
        self.intrinsic(spot) > Decimal::ZERO
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.underlying,
            self.expiry,
            self.strike.normalize(),
            self.option_type.as_str()
        )
    }
}

/// One trading session of the underlying, rolled up from aligned intraday bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDay {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    /// IV of the session's last interval.
    pub implied_vol: f64,
    /// Aligned option intervals that printed a trade.
    pub option_trades: usize,
}

impl TradingDay {
    /// Build a session from a single daily close (tests and daily data).
    pub fn from_close(date: NaiveDate, close: Decimal, implied_vol: f64) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0,
            implied_vol,
            option_trades: 0,
        }
    }
}
