//! Market data sources.
//!
//! `MarketDataProvider` is what the run consumes. Everything is fetched and
//! aligned up front by `MarketDataset::assemble`; the engine never fetches.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use tracing::info;

use super::aligner::{align_with_stats, sessions, AlignmentStats};
use super::loader::LoaderError;
use super::types::{Bar, OptionContract, OptionType, TradingDay, UnderlyingBar};
use crate::backtest::config::SimulationConfig;
use crate::error::SimulationError;

/// Historical data for one underlying.
pub trait MarketDataProvider {
    /// Underlying price bars with IV merged per interval.
    fn get_underlying_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UnderlyingBar>, LoaderError>;

    /// Option trade bars, settlement snapshots included.
    fn get_option_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, LoaderError>;

    /// Contracts available on `date`.
    fn get_option_chain(
        &self,
        symbol: &str,
        date: NaiveDate,
        spot: Decimal,
    ) -> Result<Vec<OptionContract>, LoaderError>;

    /// Session implied volatility for `date`.
    fn get_implied_volatility(&self, symbol: &str, date: NaiveDate)
        -> Result<Option<f64>, LoaderError>;

    /// Listed chains for the whole range, when the provider has them.
    fn listed_chains(
        &self,
        _symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Option<ListedChains>, LoaderError> {
        Ok(None)
    }
}

/// Per-day option chain lookup used during a run.
pub trait ChainSource: Send + Sync {
    fn chain(&self, date: NaiveDate, spot: Decimal) -> Vec<OptionContract>;
}

/// Synthetic chain: Friday expiries inside the DTE window, strikes on a
/// fixed increment around spot. Contracts carry no delta.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeLadder {
    pub underlying: String,
    pub dte_min: i64,
    pub dte_max: i64,
    pub strike_increment: Decimal,
    /// Strikes listed on each side of the at-the-money strike.
    pub strikes_each_side: u32,
}

impl StrikeLadder {
    pub fn new(underlying: &str, dte_min: i64, dte_max: i64, strike_increment: Decimal) -> Self {
        Self {
            underlying: underlying.to_string(),
            dte_min,
            dte_max,
            strike_increment,
            strikes_each_side: 20,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let dte_min = config.dte_min.unwrap_or(1).max(1);
        let dte_max = config.dte_max.unwrap_or(dte_min + 6).max(dte_min);
        Self::new(&config.symbol, dte_min, dte_max, config.strike_increment)
    }

    /// Fridays between `date + dte_min` and `date + dte_max`.
    pub fn expiries(&self, date: NaiveDate) -> Vec<NaiveDate> {
        (self.dte_min..=self.dte_max)
            .map(|d| date + Duration::days(d))
            .filter(|d| d.weekday() == Weekday::Fri)
            .collect()
    }

    pub fn strikes(&self, spot: Decimal) -> Vec<Decimal> {
        let inc = self.strike_increment;
        if inc <= Decimal::ZERO || spot <= Decimal::ZERO {
            return Vec::new();
        }
        let center = (spot / inc).round() * inc;
        let n = i64::from(self.strikes_each_side);
        (-n..=n)
            .map(|i| center + inc * Decimal::from(i))
            .filter(|k| *k > Decimal::ZERO)
            .collect()
    }
}

impl ChainSource for StrikeLadder {
    fn chain(&self, date: NaiveDate, spot: Decimal) -> Vec<OptionContract> {
        let strikes = self.strikes(spot);
        let mut chain = Vec::new();
        for expiry in self.expiries(date) {
            for strike in &strikes {
                for option_type in [OptionType::Call, OptionType::Put] {
                    chain.push(OptionContract::new(&self.underlying, expiry, *strike, option_type));
                }
            }
        }
        chain
    }
}

/// Chains keyed by trade date, as listed by the data source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListedChains {
    by_date: BTreeMap<NaiveDate, Vec<OptionContract>>,
}

impl ListedChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, contract: OptionContract) {
        self.by_date.entry(date).or_default().push(contract);
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.by_date.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }

    /// Keep only trade dates inside `[start, end]`.
    pub fn restrict(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.by_date.retain(|d, _| *d >= start && *d <= end);
        self
    }
}

impl FromIterator<(NaiveDate, OptionContract)> for ListedChains {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, OptionContract)>>(iter: I) -> Self {
        let mut chains = Self::new();
        for (date, contract) in iter {
            chains.insert(date, contract);
        }
        chains
    }
}

impl ChainSource for ListedChains {
    fn chain(&self, date: NaiveDate, _spot: Decimal) -> Vec<OptionContract> {
        self.by_date.get(&date).cloned().unwrap_or_default()
    }
}

/// Provider backed by vectors already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    pub symbol: String,
    pub underlying: Vec<UnderlyingBar>,
    pub options: Vec<Bar>,
    pub chains: Option<ListedChains>,
    pub ladder: StrikeLadder,
}

impl InMemoryProvider {
    pub fn new(symbol: &str, underlying: Vec<UnderlyingBar>, options: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.to_string(),
            underlying,
            options,
            chains: None,
            ladder: StrikeLadder::new(symbol, 1, 5, Decimal::ONE),
        }
    }

    pub fn with_chains(mut self, chains: ListedChains) -> Self {
        self.chains = Some(chains);
        self
    }

    pub fn with_ladder(mut self, ladder: StrikeLadder) -> Self {
        self.ladder = ladder;
        self
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), LoaderError> {
        if symbol.eq_ignore_ascii_case(&self.symbol) {
            Ok(())
        } else {
            Err(LoaderError::InvalidData(format!(
                "no data for {} (provider holds {})",
                symbol, self.symbol
            )))
        }
    }
}

fn in_range(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    date >= start && date <= end
}

impl MarketDataProvider for InMemoryProvider {
    fn get_underlying_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<UnderlyingBar>, LoaderError> {
        self.check_symbol(symbol)?;
        Ok(self
            .underlying
            .iter()
            .filter(|u| in_range(u.bar.date(), start, end))
            .cloned()
            .collect())
    }

    fn get_option_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, LoaderError> {
        self.check_symbol(symbol)?;
        Ok(self
            .options
            .iter()
            .filter(|b| in_range(b.date(), start, end))
            .cloned()
            .collect())
    }

    fn get_option_chain(
        &self,
        symbol: &str,
        date: NaiveDate,
        spot: Decimal,
    ) -> Result<Vec<OptionContract>, LoaderError> {
        self.check_symbol(symbol)?;
        Ok(match &self.chains {
            Some(listed) => listed.chain(date, spot),
            None => self.ladder.chain(date, spot),
        })
    }

    fn get_implied_volatility(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<f64>, LoaderError> {
        self.check_symbol(symbol)?;
        Ok(self
            .underlying
            .iter()
            .filter(|u| u.bar.date() == date)
            .max_by_key(|u| u.timestamp())
            .map(|u| u.implied_vol))
    }

    fn listed_chains(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<ListedChains>, LoaderError> {
        self.check_symbol(symbol)?;
        Ok(self.chains.clone().map(|c| c.restrict(start, end)))
    }
}

/// Aligned sessions plus chain data for one run.
#[derive(Debug, Clone)]
pub struct MarketDataset {
    pub symbol: String,
    pub days: Vec<TradingDay>,
    pub stats: AlignmentStats,
    pub listed: Option<ListedChains>,
    pub ladder: StrikeLadder,
}

impl MarketDataset {
    /// Fetch, align and roll up everything the run needs.
    pub fn assemble(
        provider: &dyn MarketDataProvider,
        config: &SimulationConfig,
    ) -> Result<Self, SimulationError> {
        let (symbol, start, end) = (&config.symbol, config.start_date, config.end_date);

        let underlying = provider.get_underlying_bars(symbol, start, end)?;
        let options = provider.get_option_bars(symbol, start, end)?;
        let alignment = align_with_stats(&underlying, &options)?;
        let days = sessions(&alignment.bars);
        if days.is_empty() {
            return Err(SimulationError::EmptySeries { start, end });
        }

        let listed = provider
            .listed_chains(symbol, start, end)?
            .filter(|c| !c.is_empty());

        info!(
            symbol = %symbol,
            sessions = days.len(),
            bars = alignment.bars.len(),
            listed_chains = listed.is_some(),
            "assembled dataset"
        );

        Ok(Self {
            symbol: symbol.clone(),
            days,
            stats: alignment.stats,
            listed,
            ladder: StrikeLadder::from_config(config),
        })
    }

    /// Dataset from ready-made sessions, priced off a default ladder.
    pub fn from_days(symbol: &str, days: Vec<TradingDay>) -> Self {
        Self {
            symbol: symbol.to_string(),
            days,
            stats: AlignmentStats::default(),
            listed: None,
            ladder: StrikeLadder::new(symbol, 1, 5, Decimal::ONE),
        }
    }

    pub fn with_ladder(mut self, ladder: StrikeLadder) -> Self {
        self.ladder = ladder;
        self
    }

    /// Listed chains when available, otherwise the synthetic ladder.
    pub fn chain_source(&self) -> &dyn ChainSource {
        match &self.listed {
            Some(listed) => listed as &dyn ChainSource,
            None => &self.ladder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rust_decimal_macros::dec;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn bar(ts: NaiveDateTime, close: Decimal, volume: i64) -> Bar {
        Bar {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    fn provider() -> InMemoryProvider {
        let mut underlying = Vec::new();
        let mut options = Vec::new();
        for d in [2, 3, 4] {
            for (h, m) in [(9, 30), (10, 0), (10, 30)] {
                let ts = date(1, d).and_hms_opt(h, m, 0).unwrap();
                underlying.push(UnderlyingBar {
                    bar: bar(ts, dec!(470) + Decimal::from(d), 1_000),
                    implied_vol: 0.12 + f64::from(h) / 1000.0,
                });
                options.push(bar(ts, dec!(3.5), 5));
            }
            // settlement snapshot
            let settle = date(1, d).and_hms_opt(16, 0, 0).unwrap();
            options.push(bar(settle, dec!(3.4), 0));
        }
        InMemoryProvider::new("SPY", underlying, options)
    }

    #[test]
    fn test_ladder_fridays_and_strikes() {
        let ladder = StrikeLadder::new("SPY", 1, 5, dec!(5));
        // Monday 2024-01-08 -> Friday 2024-01-12
        assert_eq!(ladder.expiries(date(1, 8)), vec![date(1, 12)]);
        // Friday: next Friday is 7 days out
        assert!(ladder.expiries(date(1, 12)).is_empty());

        let strikes = ladder.strikes(dec!(473.2));
        assert_eq!(strikes.len(), 41);
        assert!(strikes.contains(&dec!(475)));
        assert!(strikes.iter().all(|k| k % dec!(5) == Decimal::ZERO));
    }

    #[test]
    fn test_ladder_chain_has_calls_and_puts() {
        let ladder = StrikeLadder::new("SPY", 1, 5, dec!(1));
        let chain = ladder.chain(date(1, 8), dec!(470));
        assert_eq!(chain.len(), 41 * 2);
        assert!(chain.iter().all(|c| c.delta.is_none()));
    }

    #[test]
    fn test_assemble_filters_settlement() {
        let config = SimulationConfig {
            start_date: date(1, 1),
            end_date: date(1, 31),
            ..Default::default()
        };
        let dataset = MarketDataset::assemble(&provider(), &config).unwrap();
        assert_eq!(dataset.days.len(), 3);
        assert_eq!(dataset.stats.dropped_settlement, 3);
        assert_eq!(dataset.days[0].close, dec!(472));
        assert_eq!(dataset.days[0].option_trades, 3);
        assert!(dataset.listed.is_none());
    }

    #[test]
    fn test_assemble_reports_gap() {
        let mut p = provider();
        p.options.remove(1);
        let config = SimulationConfig {
            start_date: date(1, 1),
            end_date: date(1, 31),
            ..Default::default()
        };
        let err = MarketDataset::assemble(&p, &config).unwrap_err();
        assert!(matches!(err, SimulationError::DataGap(_)));
    }

    #[test]
    fn test_implied_volatility_is_last_interval() {
        let iv = provider()
            .get_implied_volatility("SPY", date(1, 3))
            .unwrap()
            .unwrap();
        assert!((iv - 0.13).abs() < 1e-12);
        assert!(provider().get_implied_volatility("QQQ", date(1, 3)).is_err());
    }

    #[test]
    fn test_listed_chains_preferred() {
        let contract = OptionContract::new("SPY", date(1, 5), dec!(475), OptionType::Call);
        let listed: ListedChains = vec![(date(1, 2), contract.clone())].into_iter().collect();
        let p = provider().with_chains(listed);
        assert_eq!(p.get_option_chain("SPY", date(1, 2), dec!(472)).unwrap(), vec![contract]);
        assert!(p.get_option_chain("SPY", date(1, 3), dec!(473)).unwrap().is_empty());
    }
}
