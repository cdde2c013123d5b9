//! Daily output records.
//!
//! `DailyRecord` is the external schema: field names are fixed and all money
//! fields are dollars. `DayOutcome` keeps the structured events and a ledger
//! snapshot for audit.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::TradeEvent;
use super::ledger::{LedgerSnapshot, PortfolioLedger};
use crate::metrics::PerformanceMetrics;

/// Version of the serialized report layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Separator between rendered events in `Trading_Log`.
pub const LOG_SEPARATOR: &str = "; ";

/// One trading day as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Keyed externally by ISO date.
    #[serde(skip)]
    pub date: NaiveDate,
    #[serde(rename = "Portfolio_Value")]
    pub portfolio_value: f64,
    /// Buy-and-hold value of the initial balance in the underlying.
    #[serde(rename = "spy_value")]
    pub spy_value: f64,
    #[serde(rename = "Margin_Ratio")]
    pub margin_ratio: f64,
    #[serde(rename = "Cash_Balance")]
    pub cash_balance: f64,
    /// Cumulative gross premium.
    #[serde(rename = "Premiums_Received")]
    pub premiums_received: f64,
    /// Cumulative margin interest.
    #[serde(rename = "Interest_Paid")]
    pub interest_paid: f64,
    #[serde(rename = "Trading_Log")]
    pub trading_log: String,
}

/// Audit view of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub close: Decimal,
    pub implied_vol: f64,
    /// Aligned option intervals that printed a trade.
    pub option_trades: usize,
    pub benchmark_value: Decimal,
    pub events: Vec<TradeEvent>,
    pub ledger: LedgerSnapshot,
}

/// Complete output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub schema_version: u32,
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Interval of the bars the sessions were built from.
    pub bar_interval: String,
    pub daily: BTreeMap<String, DailyRecord>,
    pub days: Vec<DayOutcome>,
    pub metrics: PerformanceMetrics,
}

impl SimulationReport {
    /// Daily records in date order.
    pub fn records(&self) -> impl Iterator<Item = &DailyRecord> {
        self.daily.values()
    }

    /// The contractual date -> record mapping as JSON.
    pub fn daily_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.daily)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn dollars(value: Decimal) -> f64 {
    value.round_dp(2).to_f64().unwrap_or(0.0)
}

/// Renders the Trading_Log text for a day.
pub fn render_log(events: &[TradeEvent]) -> String {
    events
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(LOG_SEPARATOR)
}

/// Turns ledger state into daily records.
#[derive(Debug, Clone)]
pub struct OutputRecordBuilder {
    initial_balance: Decimal,
    first_close: Option<Decimal>,
}

impl OutputRecordBuilder {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            first_close: None,
        }
    }

    /// `initial_balance / first_close * close`; the first call fixes the base.
    pub fn benchmark_value(&mut self, close: Decimal) -> Decimal {
        let base = *self.first_close.get_or_insert(close);
        if base <= Decimal::ZERO {
            return self.initial_balance;
        }
        (self.initial_balance / base * close).round_dp(2)
    }

    pub fn build(
        &mut self,
        ledger: &PortfolioLedger,
        events: &[TradeEvent],
    ) -> DailyRecord {
        let benchmark = self.benchmark_value(ledger.spot());
        DailyRecord {
            date: ledger.date(),
            portfolio_value: dollars(ledger.equity()),
            spy_value: dollars(benchmark),
            margin_ratio: ledger.margin_ratio(),
            cash_balance: dollars(ledger.cash()),
            premiums_received: dollars(ledger.premiums_received()),
            interest_paid: dollars(ledger.interest_paid()),
            trading_log: render_log(events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::config::SimulationConfig;
    use crate::backtest::events::BuyReason;
    use rust_decimal_macros::dec;

    #[test]
    fn test_field_names_are_canonical() {
        let record = DailyRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            portfolio_value: 200000.0,
            spy_value: 200000.0,
            margin_ratio: 0.0,
            cash_balance: 79998.0,
            premiums_received: 0.0,
            interest_paid: 0.0,
            trading_log: String::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "Cash_Balance",
                "Interest_Paid",
                "Margin_Ratio",
                "Portfolio_Value",
                "Premiums_Received",
                "Trading_Log",
                "spy_value"
            ]
        );
    }

    #[test]
    fn test_benchmark_tracks_underlying() {
        let mut builder = OutputRecordBuilder::new(dec!(200000));
        assert_eq!(builder.benchmark_value(dec!(400)), dec!(200000));
        assert_eq!(builder.benchmark_value(dec!(440)), dec!(220000));
        assert_eq!(builder.benchmark_value(dec!(380)), dec!(190000));
    }

    #[test]
    fn test_build_from_ledger() {
        let config = SimulationConfig {
            initial_balance: dec!(200000),
            ..Default::default()
        };
        let mut ledger = PortfolioLedger::from_config(&config);
        ledger.mark(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), dec!(300), 0.2);
        let event = ledger.buy_shares(400, dec!(300), BuyReason::Initial).unwrap();

        let mut builder = OutputRecordBuilder::new(config.initial_balance);
        let record = builder.build(&ledger, &[event]);
        assert_eq!(record.cash_balance, 79998.0);
        assert_eq!(record.portfolio_value, 199998.0);
        assert_eq!(record.spy_value, 200000.0);
        assert_eq!(record.margin_ratio, 0.0);
        assert!(record.trading_log.starts_with("Initial buy 400 shares"));
    }

    #[test]
    fn test_quiet_day_has_empty_log() {
        assert_eq!(render_log(&[]), "");
    }
}
