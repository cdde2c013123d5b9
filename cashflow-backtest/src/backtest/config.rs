//! Simulation configuration.
//!
//! One immutable `SimulationConfig` per run, deserialized from TOML and
//! validated at the run boundary.

use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::OptionType;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid parameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

/// Lossy f64 -> Decimal that keeps short literals exact (0.6 stays 0.6).
pub fn ratio_to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Strategy parameters for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Underlying symbol.
    pub symbol: String,
    /// Contract type to write. Only calls are executable.
    pub option_type: OptionType,
    /// Starting cash.
    pub initial_balance: Decimal,
    /// Assignment haircut as a fraction of strike notional.
    pub call_cost_buffer: f64,
    /// Shares per option contract.
    pub contract_size: i64,
    /// Fraction of held shares to cover with written calls.
    pub covered_call_ratio: f64,
    /// Fraction of idle cash deployed on a dip.
    pub dip_buy_percent: f64,
    /// Dip fires when close <= dip_trigger * recent_high.
    pub dip_trigger: f64,
    /// Fraction of starting cash used for the first purchase.
    pub initial_position_percent: f64,
    /// Annual rate charged on borrowed cash.
    pub margin_interest_rate: f64,
    /// Upper bound on margin_used / equity.
    pub max_margin_ratio: f64,
    /// Maximum shares held (0 = unlimited).
    pub max_position_size: i64,
    /// Minimum commission per stock order.
    pub min_commission: Decimal,
    /// Minimum |strike - spot| / spot for a written contract.
    pub min_strike_distance: f64,
    /// Idle cash must exceed this for a dip buy.
    pub min_trade_size: Decimal,
    /// Cash withdrawn each month (0 disables).
    pub monthly_withdrawal: Decimal,
    /// Commission per option contract.
    pub option_commission: Decimal,
    /// Annual risk-free rate for pricing.
    pub risk_free_rate: f64,
    /// Commission per share.
    pub stock_commission: Decimal,
    /// Multiplier applied to the session IV before pricing.
    pub volatility_scaling_factor: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Minimum days to expiry for a written contract.
    pub dte_min: Option<i64>,
    /// Maximum days to expiry for a written contract.
    pub dte_max: Option<i64>,
    /// Lower edge of the target |delta| band.
    pub delta_min: f64,
    /// Upper edge of the target |delta| band.
    pub delta_max: f64,
    /// Trading days in the trailing-high window.
    pub recent_high_lookback: usize,
    /// Buy back a call early once this fraction of premium is captured.
    pub profit_take_pct: Option<f64>,
    /// Strike spacing for synthetic chains.
    pub strike_increment: Decimal,
    /// Bar interval requested from the data provider.
    pub bar_interval: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            option_type: OptionType::Call,
            initial_balance: Decimal::from(500_000),
            call_cost_buffer: 0.0,
            contract_size: 100,
            covered_call_ratio: 1.0,
            dip_buy_percent: 0.5,
            dip_trigger: 0.92,
            initial_position_percent: 0.6,
            margin_interest_rate: 0.06,
            max_margin_ratio: 0.5,
            max_position_size: 0,
            min_commission: Decimal::ONE,
            min_strike_distance: 0.0,
            min_trade_size: Decimal::from(1_000),
            monthly_withdrawal: Decimal::ZERO,
            option_commission: Decimal::new(65, 2),
            risk_free_rate: 0.04,
            stock_commission: Decimal::new(5, 3),
            volatility_scaling_factor: 1.0,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            dte_min: Some(1),
            dte_max: Some(5),
            delta_min: 0.40,
            delta_max: 0.60,
            recent_high_lookback: 20,
            profit_take_pct: None,
            strike_increment: Decimal::ONE,
            bar_interval: "30 mins".to_string(),
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject parameter combinations the engine cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(invalid("symbol", "must not be empty"));
        }
        if self.option_type != OptionType::Call {
            return Err(invalid("option_type", "covered writing requires call options"));
        }
        if self.initial_balance < Decimal::ZERO {
            return Err(invalid("initial_balance", "must be non-negative"));
        }
        if self.contract_size <= 0 {
            return Err(invalid("contract_size", "must be positive"));
        }

        let unit_fractions = [
            ("covered_call_ratio", self.covered_call_ratio),
            ("dip_buy_percent", self.dip_buy_percent),
            ("dip_trigger", self.dip_trigger),
            ("initial_position_percent", self.initial_position_percent),
            ("call_cost_buffer", self.call_cost_buffer),
            ("delta_min", self.delta_min),
            ("delta_max", self.delta_max),
        ];
        for (name, value) in unit_fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, format!("{} is outside [0, 1]", value)));
            }
        }

        let non_negative = [
            ("margin_interest_rate", self.margin_interest_rate),
            ("max_margin_ratio", self.max_margin_ratio),
            ("min_strike_distance", self.min_strike_distance),
            ("risk_free_rate", self.risk_free_rate),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(name, format!("{} must be a non-negative number", value)));
            }
        }

        if !(self.volatility_scaling_factor.is_finite() && self.volatility_scaling_factor > 0.0) {
            return Err(invalid("volatility_scaling_factor", "must be positive"));
        }
        if self.max_position_size < 0 {
            return Err(invalid("max_position_size", "must be non-negative"));
        }

        let money = [
            ("min_commission", self.min_commission),
            ("min_trade_size", self.min_trade_size),
            ("monthly_withdrawal", self.monthly_withdrawal),
            ("option_commission", self.option_commission),
            ("stock_commission", self.stock_commission),
        ];
        for (name, value) in money {
            if value < Decimal::ZERO {
                return Err(invalid(name, "must be non-negative"));
            }
        }

        if self.start_date > self.end_date {
            return Err(invalid("start_date", "is after end_date"));
        }
        if let (Some(min), Some(max)) = (self.dte_min, self.dte_max) {
            if min > max {
                return Err(invalid("dte_min", format!("{} exceeds dte_max {}", min, max)));
            }
        }
        if self.dte_min.is_some_and(|d| d < 0) {
            return Err(invalid("dte_min", "must be non-negative"));
        }
        if self.delta_min > self.delta_max {
            return Err(invalid("delta_min", "exceeds delta_max"));
        }
        if self.recent_high_lookback == 0 {
            return Err(invalid("recent_high_lookback", "must be at least one day"));
        }
        if let Some(pct) = self.profit_take_pct {
            if !(pct > 0.0 && pct < 1.0) {
                return Err(invalid("profit_take_pct", "must be inside (0, 1)"));
            }
        }
        if self.bar_interval.trim().is_empty() {
            return Err(invalid("bar_interval", "must not be empty"));
        }
        if self.strike_increment <= Decimal::ZERO {
            return Err(invalid("strike_increment", "must be positive"));
        }

        Ok(())
    }

    /// Volatility fed to the pricer for a session IV.
    pub fn pricing_vol(&self, implied_vol: f64) -> f64 {
        implied_vol * self.volatility_scaling_factor
    }
}
