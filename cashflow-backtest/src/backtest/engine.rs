//! Strategy engine.
//!
//! Folds the trading days of one run through a private ledger. Each day runs
//! in a fixed order:
//! 1. Accrue margin interest for the calendar days since the last session
//! 2. Size and buy the initial position (first day only)
//! 3. Monthly withdrawal
//! 4. Roll: write covered calls when uncovered on a roll day
//! 5. Settle expiring legs; take profit on cheap legs
//! 6. Dip buy
//! 7. Margin maintenance, leverage check, daily record
//!
//! Refused actions become `Skipped` events. Invariant violations, missing
//! volatility and insufficient starting capital abort the run.

use std::collections::{BTreeMap, VecDeque};

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::config::{ratio_to_decimal, SimulationConfig};
use super::events::{Action, BuyReason, CloseReason, TradeEvent};
use super::ledger::PortfolioLedger;
use super::record::{DayOutcome, OutputRecordBuilder, SimulationReport, SCHEMA_VERSION};
use super::selector::OptionSelector;
use crate::data::{ChainSource, MarketDataset, TradingDay};
use crate::error::{LedgerError, SimulationError};
use crate::metrics::MetricsCalculator;
use crate::pricing::BlackScholes;
use crate::risk::{whole_shares, PositionSizer};

/// Trailing maximum of closes over a fixed window.
#[derive(Debug, Clone)]
struct RecentHigh {
    window: usize,
    closes: VecDeque<Decimal>,
}

impl RecentHigh {
    fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            closes: VecDeque::with_capacity(window.max(1)),
        }
    }

    /// Push today's close and return the window maximum.
    fn update(&mut self, close: Decimal) -> Decimal {
        if self.closes.len() == self.window {
            self.closes.pop_front();
        }
        self.closes.push_back(close);
        self.closes.iter().copied().max().unwrap_or(close)
    }
}

/// Runs one simulation over a materialized series.
pub struct StrategyEngine {
    config: SimulationConfig,
    ledger: PortfolioLedger,
    selector: OptionSelector,
    sizer: PositionSizer,
    pricer: BlackScholes,
    builder: OutputRecordBuilder,
    recent_high: RecentHigh,
    roll_pending: bool,
    prev_date: Option<NaiveDate>,
}

impl StrategyEngine {
    /// Validate `config` and set up a fresh ledger.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self {
            ledger: PortfolioLedger::from_config(&config),
            selector: OptionSelector::from_config(&config),
            sizer: PositionSizer::from_config(&config),
            pricer: BlackScholes::new(config.risk_free_rate, 0.0),
            builder: OutputRecordBuilder::new(config.initial_balance),
            recent_high: RecentHigh::new(config.recent_high_lookback),
            roll_pending: false,
            prev_date: None,
            config,
        })
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    /// Run over `days`, taking option chains from `chains`.
    ///
    /// Days outside `[start_date, end_date]` are ignored.
    pub fn run(
        mut self,
        days: &[TradingDay],
        chains: &dyn ChainSource,
    ) -> Result<SimulationReport, SimulationError> {
        let window: Vec<&TradingDay> = days
            .iter()
            .filter(|d| d.date >= self.config.start_date && d.date <= self.config.end_date)
            .collect();

        if window.is_empty() {
            return Err(SimulationError::EmptySeries {
                start: self.config.start_date,
                end: self.config.end_date,
            });
        }

        info!(
            symbol = %self.config.symbol,
            start = %self.config.start_date,
            end = %self.config.end_date,
            days = window.len(),
            "starting simulation"
        );

        let mut daily = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(window.len());

        for day in window {
            if let Some(prev) = self.prev_date {
                if day.date <= prev {
                    return Err(SimulationError::InvariantViolation {
                        date: day.date,
                        detail: format!("trading days out of order after {}", prev),
                    });
                }
            }
            if !(day.implied_vol.is_finite() && day.implied_vol > 0.0) {
                return Err(SimulationError::MissingVolatility { date: day.date });
            }

            let events = self.process_day(day, chains)?;

            let benchmark_value = self.builder.benchmark_value(day.close);
            let record = self.builder.build(&self.ledger, &events);
            outcomes.push(DayOutcome {
                date: day.date,
                close: day.close,
                implied_vol: day.implied_vol,
                option_trades: day.option_trades,
                benchmark_value,
                events,
                ledger: self.ledger.snapshot(),
            });
            daily.insert(day.date.to_string(), record);
            self.prev_date = Some(day.date);
        }

        let metrics = MetricsCalculator::calculate(self.config.initial_balance, &outcomes);
        info!(
            final_value = %self.ledger.equity(),
            total_return_pct = metrics.total_return_pct,
            writes = metrics.calls_written,
            assignments = metrics.assignments,
            withdrawn = %self.ledger.withdrawn(),
            "simulation finished"
        );

        Ok(SimulationReport {
            schema_version: SCHEMA_VERSION,
            symbol: self.config.symbol.clone(),
            start_date: self.config.start_date,
            end_date: self.config.end_date,
            bar_interval: self.config.bar_interval.clone(),
            daily,
            days: outcomes,
            metrics,
        })
    }

    fn process_day(
        &mut self,
        day: &TradingDay,
        chains: &dyn ChainSource,
    ) -> Result<Vec<TradeEvent>, SimulationError> {
        let date = day.date;
        let first_day = self.prev_date.is_none();
        let new_month = self
            .prev_date
            .map_or(true, |p| (p.year(), p.month()) != (date.year(), date.month()));
        let vol = self.config.pricing_vol(day.implied_vol);
        let mut events = Vec::new();

        self.ledger.mark(date, day.close, vol);

        // 1. interest
        if let Some(prev) = self.prev_date {
            let elapsed = (date - prev).num_days();
            if let Some(event) = self.ledger.accrue_interest(elapsed) {
                events.push(event);
            }
            self.ledger.check_invariants()?;
        }

        // 2. initial position
        if first_day {
            let allocation = self.sizer.initial(self.ledger.cash(), day.close)?;
            if allocation.shares > 0 {
                let result = self
                    .ledger
                    .buy_shares(allocation.shares, day.close, BuyReason::Initial);
                self.push(&mut events, result, Action::InitialBuy)?;
            }
        }

        // 3. withdrawal
        if new_month && !first_day && self.config.monthly_withdrawal > Decimal::ZERO {
            events.push(self.ledger.apply_withdrawal(self.config.monthly_withdrawal));
            self.ledger.check_invariants()?;
        }

        // 4. roll
        if new_month || self.roll_pending {
            self.roll(day, chains, &mut events)?;
        }

        // 5. expiry, assignment and early close
        self.settle_expiring(date, &mut events)?;
        self.take_profits(date, &mut events)?;

        // 6. dip buy
        self.dip_buy(day, &mut events)?;

        // margin maintenance, then the end-of-day leverage check
        let forced = self.ledger.restore_margin();
        if !forced.is_empty() {
            warn!(date = %date, actions = forced.len(), "margin maintenance");
            if forced.iter().any(TradeEvent::closes_leg) {
                self.roll_pending = true;
            }
            events.extend(forced);
            self.ledger.check_invariants()?;
        }
        self.ledger.check_leverage()?;

        debug!(
            date = %date,
            cash = %self.ledger.cash(),
            shares = self.ledger.shares(),
            margin_ratio = self.ledger.margin_ratio(),
            events = events.len(),
            "day complete"
        );
        Ok(events)
    }

    /// Record a mutation result, turning a refusal into a skip event.
    fn push(
        &mut self,
        events: &mut Vec<TradeEvent>,
        result: Result<TradeEvent, LedgerError>,
        action: Action,
    ) -> Result<(), SimulationError> {
        match result {
            Ok(event) => {
                events.push(event);
                self.ledger.check_invariants()?;
            }
            Err(err) => {
                warn!(date = %self.ledger.date(), ?action, error = %err, "action skipped");
                events.push(TradeEvent::skipped(action, err.reason(), err.to_string()));
            }
        }
        Ok(())
    }

    fn roll(
        &mut self,
        day: &TradingDay,
        chains: &dyn ChainSource,
        events: &mut Vec<TradeEvent>,
    ) -> Result<(), SimulationError> {
        let capacity = self.ledger.coverage_capacity();
        if capacity == 0 {
            self.roll_pending = false;
            return Ok(());
        }

        let chain = chains.chain(day.date, day.close);
        let Some(contract) =
            self.selector
                .select_contract(&chain, day.close, day.date, day.implied_vol)
        else {
            // Stays pending until a contract is available.
            self.roll_pending = true;
            events.push(TradeEvent::skipped(
                Action::Write,
                "no_suitable_contract",
                format!("no contract passed the filters out of {}", chain.len()),
            ));
            return Ok(());
        };
        self.roll_pending = false;

        let dte = contract.days_to_expiry(day.date);
        let premium = self.pricer.contract_price(
            &contract,
            day.close,
            dte,
            self.config.pricing_vol(day.implied_vol),
        );
        if premium <= Decimal::ZERO {
            events.push(TradeEvent::skipped(
                Action::Write,
                "zero_premium",
                format!("{} priced at zero", contract),
            ));
            return Ok(());
        }

        let result = self.ledger.write_call(contract, capacity, premium);
        self.push(events, result, Action::Write)
    }

    fn settle_expiring(
        &mut self,
        date: NaiveDate,
        events: &mut Vec<TradeEvent>,
    ) -> Result<(), SimulationError> {
        let expiring: Vec<u64> = self
            .ledger
            .open_legs()
            .iter()
            .filter(|l| l.contract.expiry <= date)
            .map(|l| l.id)
            .collect();

        for id in expiring {
            let result = self.ledger.close_or_assign(id, None);
            if result.is_ok() {
                self.roll_pending = true;
            }
            self.push(events, result, Action::BuyBack)?;
        }
        Ok(())
    }

    fn take_profits(
        &mut self,
        date: NaiveDate,
        events: &mut Vec<TradeEvent>,
    ) -> Result<(), SimulationError> {
        let Some(pct) = self.config.profit_take_pct else {
            return Ok(());
        };
        let target = ratio_to_decimal(pct);

        let cheap: Vec<(u64, Decimal)> = self
            .ledger
            .open_legs()
            .iter()
            .filter(|l| l.open_date < date && l.captured_fraction() >= target)
            .map(|l| (l.id, l.mark))
            .collect();

        for (id, mark) in cheap {
            let result = self.ledger.buy_back(id, mark, CloseReason::ProfitTake);
            if result.is_ok() {
                self.roll_pending = true;
            }
            self.push(events, result, Action::BuyBack)?;
        }
        Ok(())
    }

    fn dip_buy(&mut self, day: &TradingDay, events: &mut Vec<TradeEvent>) -> Result<(), SimulationError> {
        let recent_high = self.recent_high.update(day.close);
        let trigger_price = ratio_to_decimal(self.config.dip_trigger) * recent_high;
        if day.close > trigger_price {
            return Ok(());
        }

        let idle_cash = self.ledger.cash().max(Decimal::ZERO);
        if idle_cash <= self.config.min_trade_size {
            return Ok(());
        }

        let budget = ratio_to_decimal(self.config.dip_buy_percent) * idle_cash;
        if whole_shares(budget, day.close) == 0 {
            events.push(TradeEvent::skipped(
                Action::DipBuy,
                "below_one_share",
                format!("${:.2} buys no share at ${:.2}", budget, day.close),
            ));
            return Ok(());
        }

        let qty = self
            .sizer
            .dip_quantity(idle_cash, day.close, self.ledger.shares());
        if qty == 0 {
            events.push(TradeEvent::skipped(
                Action::DipBuy,
                "position_limit",
                format!("no room under {} shares", self.config.max_position_size),
            ));
            return Ok(());
        }

        let result = self.ledger.buy_shares(
            qty,
            day.close,
            BuyReason::Dip {
                trigger_price,
                recent_high,
            },
        );
        self.push(events, result, Action::DipBuy)
    }
}

/// Run `config` over an assembled dataset.
pub fn run_simulation(
    config: &SimulationConfig,
    dataset: &MarketDataset,
) -> Result<SimulationReport, SimulationError> {
    StrategyEngine::new(config.clone())?.run(&dataset.days, dataset.chain_source())
}
