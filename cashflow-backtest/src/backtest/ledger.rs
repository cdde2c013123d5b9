//! Portfolio ledger.
//!
//! Owns the mutable state of one run: cash, shares, open option legs.
//! Cash may go negative; the negative balance is the margin loan:
//!
//! - `margin_used = max(0, -cash)`
//! - `equity = cash + shares * spot + mtm(open legs)` (short calls mark negative)
//!
//! Voluntary mutations are gated so that `margin_used <= max_margin_ratio * equity`
//! holds afterwards. A refused mutation returns a `LedgerError` and leaves
//! state untouched.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::commission::CommissionModel;
use super::config::{ratio_to_decimal, SimulationConfig};
use super::events::{BuyReason, CloseReason, OptionLeg, TradeEvent, WithdrawalStatus};
use crate::data::OptionContract;
use crate::error::{LedgerError, SimulationError};
use crate::pricing::{BlackScholes, DAYS_PER_YEAR};

/// Ledger parameters taken from the run configuration.
#[derive(Debug, Clone)]
pub struct LedgerParams {
    pub contract_size: i64,
    pub covered_call_ratio: Decimal,
    pub max_margin_ratio: Decimal,
    pub margin_interest_rate: Decimal,
    pub call_cost_buffer: Decimal,
    pub max_position_size: i64,
    pub commission: CommissionModel,
}

impl LedgerParams {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            contract_size: config.contract_size,
            covered_call_ratio: ratio_to_decimal(config.covered_call_ratio),
            max_margin_ratio: ratio_to_decimal(config.max_margin_ratio),
            margin_interest_rate: ratio_to_decimal(config.margin_interest_rate),
            call_cost_buffer: ratio_to_decimal(config.call_cost_buffer),
            max_position_size: config.max_position_size,
            commission: CommissionModel::from_config(config),
        }
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash: Decimal,
    pub shares: i64,
    pub spot: Decimal,
    pub margin_used: Decimal,
    /// Mark-to-market of open legs (non-positive).
    pub open_leg_value: Decimal,
    pub portfolio_value: Decimal,
    pub open_contracts: i64,
}

/// Mutable account state for one simulation run.
#[derive(Debug, Clone)]
pub struct PortfolioLedger {
    params: LedgerParams,
    pricer: BlackScholes,
    date: NaiveDate,
    spot: Decimal,
    cash: Decimal,
    shares: i64,
    open_legs: Vec<OptionLeg>,
    next_leg_id: u64,
    premiums_received: Decimal,
    interest_paid: Decimal,
    commissions_paid: Decimal,
    withdrawn: Decimal,
}

impl PortfolioLedger {
    pub fn new(params: LedgerParams, pricer: BlackScholes, date: NaiveDate, cash: Decimal) -> Self {
        Self {
            params,
            pricer,
            date,
            spot: Decimal::ZERO,
            cash,
            shares: 0,
            open_legs: Vec::new(),
            next_leg_id: 1,
            premiums_received: Decimal::ZERO,
            interest_paid: Decimal::ZERO,
            commissions_paid: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            LedgerParams::from_config(config),
            BlackScholes::new(config.risk_free_rate, 0.0),
            config.start_date,
            config.initial_balance,
        )
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn spot(&self) -> Decimal {
        self.spot
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn shares(&self) -> i64 {
        self.shares
    }

    pub fn open_legs(&self) -> &[OptionLeg] {
        &self.open_legs
    }

    pub fn leg(&self, id: u64) -> Option<&OptionLeg> {
        self.open_legs.iter().find(|l| l.id == id)
    }

    pub fn premiums_received(&self) -> Decimal {
        self.premiums_received
    }

    pub fn interest_paid(&self) -> Decimal {
        self.interest_paid
    }

    pub fn commissions_paid(&self) -> Decimal {
        self.commissions_paid
    }

    pub fn withdrawn(&self) -> Decimal {
        self.withdrawn
    }

    pub fn margin_used(&self) -> Decimal {
        (-self.cash).max(Decimal::ZERO)
    }

    pub fn open_leg_value(&self) -> Decimal {
        self.open_legs
            .iter()
            .map(|l| l.market_value(self.params.contract_size))
            .sum()
    }

    pub fn equity(&self) -> Decimal {
        self.cash + Decimal::from(self.shares) * self.spot + self.open_leg_value()
    }

    /// `margin_used / equity`.
    pub fn margin_ratio(&self) -> f64 {
        let margin = self.margin_used();
        if margin.is_zero() {
            return 0.0;
        }
        let equity = self.equity();
        if equity <= Decimal::ZERO {
            return f64::INFINITY;
        }
        (margin / equity).to_f64().unwrap_or(f64::INFINITY)
    }

    pub fn open_contracts(&self) -> i64 {
        self.open_legs.iter().map(|l| l.quantity).sum()
    }

    /// Contracts that can still be written against current shares.
    pub fn coverage_capacity(&self) -> i64 {
        let max_contracts = (Decimal::from(self.shares) * self.params.covered_call_ratio
            / Decimal::from(self.params.contract_size))
        .floor()
        .to_i64()
        .unwrap_or(0);
        (max_contracts - self.open_contracts()).max(0)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash: self.cash,
            shares: self.shares,
            spot: self.spot,
            margin_used: self.margin_used(),
            open_leg_value: self.open_leg_value(),
            portfolio_value: self.equity(),
            open_contracts: self.open_contracts(),
        }
    }

    fn within_limit(&self, margin: Decimal, equity: Decimal) -> bool {
        margin.is_zero() || (equity > Decimal::ZERO && margin <= self.params.max_margin_ratio * equity)
    }

    fn projected_check(&self, cash: Decimal, equity: Decimal) -> Result<(), LedgerError> {
        let margin = (-cash).max(Decimal::ZERO);
        if self.within_limit(margin, equity) {
            return Ok(());
        }
        let projected = if equity > Decimal::ZERO {
            (margin / equity).to_f64().unwrap_or(f64::INFINITY)
        } else {
            f64::INFINITY
        };
        Err(LedgerError::MarginLimitExceeded {
            projected,
            limit: self.params.max_margin_ratio.to_f64().unwrap_or(0.0),
        })
    }

    /// Shares that must stay in the account to cover open legs.
    fn required_shares(&self) -> i64 {
        let open = self.open_contracts();
        if open == 0 || self.params.covered_call_ratio.is_zero() {
            return 0;
        }
        (Decimal::from(open * self.params.contract_size) / self.params.covered_call_ratio)
            .ceil()
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    // ------------------------------------------------------------------
    // Daily bookkeeping
    // ------------------------------------------------------------------

    /// Move to `date` and re-mark open legs at `spot` with pricing volatility `vol`.
    pub fn mark(&mut self, date: NaiveDate, spot: Decimal, vol: f64) {
        self.date = date;
        self.spot = spot;
        for leg in &mut self.open_legs {
            let days = leg.contract.days_to_expiry(date);
            leg.mark = self.pricer.contract_price(&leg.contract, spot, days, vol);
        }
    }

    /// Charge interest on the margin loan for `days` calendar days.
    pub fn accrue_interest(&mut self, days: i64) -> Option<TradeEvent> {
        let margin_used = self.margin_used();
        if days <= 0 || margin_used.is_zero() {
            return None;
        }
        let amount = (margin_used * self.params.margin_interest_rate * Decimal::from(days)
            / Decimal::from(DAYS_PER_YEAR as i64))
        .round_dp(2);
        if amount.is_zero() {
            return None;
        }
        self.cash -= amount;
        self.interest_paid += amount;
        debug!(date = %self.date, %amount, %margin_used, days, "accrued margin interest");
        Some(TradeEvent::InterestAccrual {
            amount,
            margin_used,
            days,
        })
    }

    /// One day of interest; returns the amount charged.
    pub fn accrue_daily_interest(&mut self) -> Decimal {
        match self.accrue_interest(1) {
            Some(TradeEvent::InterestAccrual { amount, .. }) => amount,
            _ => Decimal::ZERO,
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Buy `qty` shares at `price`. No partial fills.
    pub fn buy_shares(
        &mut self,
        qty: i64,
        price: Decimal,
        reason: BuyReason,
    ) -> Result<TradeEvent, LedgerError> {
        if qty <= 0 || price <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(qty));
        }
        let limit = self.params.max_position_size;
        if limit > 0 && self.shares + qty > limit {
            return Err(LedgerError::PositionLimitExceeded {
                requested: self.shares + qty,
                limit,
            });
        }

        let cost = Decimal::from(qty) * price;
        let commission = self.params.commission.stock(qty).total;
        let cash = self.cash - cost - commission;
        let equity = cash + Decimal::from(self.shares + qty) * self.spot + self.open_leg_value();
        self.projected_check(cash, equity)?;

        self.cash = cash;
        self.shares += qty;
        self.commissions_paid += commission;
        debug!(date = %self.date, qty, %price, %commission, "bought shares");

        Ok(match reason {
            BuyReason::Initial => TradeEvent::InitialBuy {
                shares: qty,
                price,
                cost,
                commission,
            },
            BuyReason::Dip {
                trigger_price,
                recent_high,
            } => TradeEvent::DipBuy {
                shares: qty,
                price,
                cost,
                commission,
                trigger_price,
                recent_high,
            },
        })
    }

    /// Write `qty` covered calls at `premium` per share.
    pub fn write_call(
        &mut self,
        contract: OptionContract,
        qty: i64,
        premium: Decimal,
    ) -> Result<TradeEvent, LedgerError> {
        if qty <= 0 || premium < Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(qty));
        }
        let capacity = self.coverage_capacity();
        if qty > capacity {
            return Err(LedgerError::UncoveredWrite {
                requested: qty,
                capacity,
            });
        }

        let gross = premium * Decimal::from(qty * self.params.contract_size);
        let commission = self.params.commission.option(qty).total;
        let credit = gross - commission;

        let id = self.next_leg_id;
        self.next_leg_id += 1;
        self.cash += credit;
        self.premiums_received += gross;
        self.commissions_paid += commission;
        self.open_legs.push(OptionLeg {
            id,
            contract: contract.clone(),
            quantity: qty,
            premium,
            open_date: self.date,
            close_date: None,
            mark: premium,
        });
        debug!(date = %self.date, leg = id, %contract, qty, %premium, "wrote call");

        Ok(TradeEvent::Write {
            leg_id: id,
            contract,
            contracts: qty,
            premium,
            credit,
            commission,
        })
    }

    /// Settle or close a leg.
    ///
    /// `Some(price)` buys the leg back at `price`. `None` settles it at the
    /// current spot: assigned when in the money, otherwise expired worthless.
    pub fn close_or_assign(
        &mut self,
        leg_id: u64,
        closing_price: Option<Decimal>,
    ) -> Result<TradeEvent, LedgerError> {
        match closing_price {
            Some(price) => self.buy_back(leg_id, price, CloseReason::BoughtBack),
            None => self.settle(leg_id),
        }
    }

    /// Buy a leg back at `price`.
    ///
    /// Forced buy-backs (`CloseReason::MarginCall`) skip the margin gate; the
    /// freed shares are sold right after.
    pub fn buy_back(
        &mut self,
        leg_id: u64,
        price: Decimal,
        reason: CloseReason,
    ) -> Result<TradeEvent, LedgerError> {
        let index = self.leg_index(leg_id)?;
        if price < Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(self.open_legs[index].quantity));
        }
        let leg = &self.open_legs[index];
        let qty = leg.quantity;
        let cost = price * Decimal::from(leg.shares_covered(self.params.contract_size));
        let commission = self.params.commission.option(qty).total;
        let cash = self.cash - cost - commission;

        if reason != CloseReason::MarginCall {
            let equity = cash
                + Decimal::from(self.shares) * self.spot
                + self.open_leg_value()
                - leg.market_value(self.params.contract_size);
            self.projected_check(cash, equity)?;
        }

        let mut leg = self.open_legs.remove(index);
        leg.close_date = Some(self.date);
        self.cash = cash;
        self.commissions_paid += commission;
        debug!(date = %self.date, leg = leg_id, %price, ?reason, "bought back call");

        Ok(TradeEvent::Close {
            leg_id,
            contract: leg.contract,
            contracts: qty,
            reason,
            price,
            cost,
            commission,
        })
    }

    fn settle(&mut self, leg_id: u64) -> Result<TradeEvent, LedgerError> {
        let index = self.leg_index(leg_id)?;
        let mut leg = self.open_legs.remove(index);
        leg.close_date = Some(self.date);
        let spot = self.spot;

        if !leg.contract.is_in_the_money(spot) {
            debug!(date = %self.date, leg = leg_id, "call expired worthless");
            return Ok(TradeEvent::Close {
                leg_id,
                contract: leg.contract,
                contracts: leg.quantity,
                reason: CloseReason::Expired,
                price: Decimal::ZERO,
                cost: Decimal::ZERO,
                commission: Decimal::ZERO,
            });
        }

        let delivered = leg.shares_covered(self.params.contract_size);
        let strike = leg.contract.strike;
        let notional = strike * Decimal::from(delivered);
        let haircut = (self.params.call_cost_buffer * notional).round_dp(2);
        let proceeds = notional - haircut;
        let total_cost = (spot - strike) * Decimal::from(delivered) + haircut;

        self.shares -= delivered;
        self.cash += proceeds;
        debug!(date = %self.date, leg = leg_id, delivered, %strike, %spot, "call assigned");

        Ok(TradeEvent::Assign {
            leg_id,
            contract: leg.contract,
            contracts: leg.quantity,
            shares_delivered: delivered,
            strike,
            spot,
            proceeds,
            haircut,
            total_cost,
        })
    }

    /// Withdraw `amount`, borrowing any shortfall while headroom allows.
    pub fn apply_withdrawal(&mut self, amount: Decimal) -> TradeEvent {
        let equity = self.equity();
        let m = self.params.max_margin_ratio;

        let feasible = |x: Decimal| {
            let margin = (x - self.cash).max(Decimal::ZERO);
            self.within_limit(margin, equity - x)
        };

        let withdrawn = if feasible(amount) {
            amount
        } else {
            // Largest x with (x - cash) <= m * (equity - x).
            let max_x = ((m * equity + self.cash) / (Decimal::ONE + m))
                .round_dp_with_strategy(2, RoundingStrategy::ToZero);
            let x = max_x.min(amount).max(Decimal::ZERO);
            if x > Decimal::ZERO && feasible(x) {
                x
            } else {
                Decimal::ZERO
            }
        };

        let borrowed = (withdrawn - self.cash.max(Decimal::ZERO)).max(Decimal::ZERO);
        let status = if withdrawn == amount {
            WithdrawalStatus::Full
        } else if withdrawn.is_zero() {
            WithdrawalStatus::Skipped
        } else {
            WithdrawalStatus::Partial
        };

        self.cash -= withdrawn;
        self.withdrawn += withdrawn;
        match status {
            WithdrawalStatus::Full => {
                debug!(date = %self.date, %withdrawn, %borrowed, "withdrawal applied")
            }
            _ => warn!(date = %self.date, requested = %amount, %withdrawn, "withdrawal limited by margin"),
        }

        TradeEvent::Withdrawal {
            requested: amount,
            withdrawn,
            borrowed,
            status,
        }
    }

    /// Sell shares to meet a margin call. Never sells shares that cover open legs.
    pub fn sell_for_margin(&mut self, qty: i64) -> Result<TradeEvent, LedgerError> {
        let free = self.shares - self.required_shares();
        if qty <= 0 || qty > free {
            return Err(LedgerError::InvalidQuantity(qty));
        }
        let price = self.spot;
        let proceeds = Decimal::from(qty) * price;
        let commission = self.params.commission.stock(qty).total;
        self.cash += proceeds - commission;
        self.shares -= qty;
        self.commissions_paid += commission;
        warn!(date = %self.date, qty, %price, "margin call share sale");
        Ok(TradeEvent::MarginCall {
            shares_sold: qty,
            price,
            proceeds,
            commission,
        })
    }

    /// Deleverage until the margin limit holds again.
    ///
    /// Sells uncovered shares first; when none are left, buys back the most
    /// recently written call at its mark and sells the shares it freed.
    pub fn restore_margin(&mut self) -> Vec<TradeEvent> {
        let mut events = Vec::new();

        while !self.within_limit(self.margin_used(), self.equity()) {
            let free = self.shares - self.required_shares();
            if free > 0 {
                let qty = self.shares_to_sell(free);
                match self.sell_for_margin(qty) {
                    Ok(event) => events.push(event),
                    Err(_) => break,
                }
                continue;
            }

            let Some(leg) = self.open_legs.last() else {
                break;
            };
            let (id, mark) = (leg.id, leg.mark);
            match self.buy_back(id, mark, CloseReason::MarginCall) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        events
    }

    /// Smallest sale (capped at `free`) that restores the margin limit.
    fn shares_to_sell(&self, free: i64) -> i64 {
        if self.spot <= Decimal::ZERO {
            return free;
        }
        let margin = self.margin_used();
        let equity = self.equity();
        let m = self.params.max_margin_ratio;

        let restores = |q: i64| {
            let commission = self.params.commission.stock(q).total;
            let cash = self.cash + Decimal::from(q) * self.spot - commission;
            self.within_limit((-cash).max(Decimal::ZERO), equity - commission)
        };

        let first_fee = self.params.commission.stock(1).total;
        let estimate = ((margin + first_fee - m * (equity - first_fee)) / self.spot)
            .ceil()
            .to_i64()
            .unwrap_or(free);
        let mut q = estimate.clamp(1, free);
        while q < free && !restores(q) {
            q += 1;
        }
        q
    }

    fn leg_index(&self, leg_id: u64) -> Result<usize, LedgerError> {
        self.open_legs
            .iter()
            .position(|l| l.id == leg_id)
            .ok_or(LedgerError::UnknownLeg(leg_id))
    }

    // ------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------

    /// Structural invariants that hold after every mutation.
    pub fn check_invariants(&self) -> Result<(), SimulationError> {
        if self.shares < 0 {
            return Err(self.violation(format!("negative share count {}", self.shares)));
        }
        if self.cash < -self.margin_used() {
            return Err(self.violation(format!(
                "cash {} below margin facility {}",
                self.cash,
                self.margin_used()
            )));
        }
        let covered = Decimal::from(self.open_contracts() * self.params.contract_size);
        if covered > Decimal::from(self.shares) * self.params.covered_call_ratio {
            return Err(self.violation(format!(
                "{} contracts open against {} shares",
                self.open_contracts(),
                self.shares
            )));
        }
        if self.open_legs.iter().any(|l| l.quantity <= 0) {
            return Err(self.violation("open leg with non-positive quantity".to_string()));
        }
        Ok(())
    }

    /// Leverage invariant.
    pub fn check_leverage(&self) -> Result<(), SimulationError> {
        if self.within_limit(self.margin_used(), self.equity()) {
            return Ok(());
        }
        Err(self.violation(format!(
            "margin ratio {:.4} exceeds {}",
            self.margin_ratio(),
            self.params.max_margin_ratio
        )))
    }

    fn violation(&self, detail: String) -> SimulationError {
        SimulationError::InvariantViolation {
            date: self.date,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OptionType;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            initial_balance: dec!(200000),
            max_margin_ratio: 0.5,
            margin_interest_rate: 0.0365,
            covered_call_ratio: 1.0,
            call_cost_buffer: 0.001,
            ..Default::default()
        }
    }

    fn ledger() -> PortfolioLedger {
        let mut ledger = PortfolioLedger::from_config(&config());
        ledger.mark(date(1), dec!(300), 0.2);
        ledger
    }

    fn call(strike: Decimal, expiry: u32) -> OptionContract {
        OptionContract::new("SPY", date(expiry), strike, OptionType::Call)
    }

    #[test]
    fn test_buy_shares_debits_cash_and_commission() {
        let mut ledger = ledger();
        let event = ledger.buy_shares(400, dec!(300), BuyReason::Initial).unwrap();
        assert_eq!(event.commission(), dec!(2));
        assert_eq!(ledger.cash(), dec!(80000) - dec!(2));
        assert_eq!(ledger.shares(), 400);
        assert!(ledger.check_invariants().is_ok());
    }

    #[test]
    fn test_buy_blocked_by_margin_limit() {
        let mut ledger = ledger();
        // 1000 shares = 300k on 200k equity: margin 100k / equity ~200k = 0.5 edge
        // 1100 shares pushes margin to 130k, ratio ~0.65
        let err = ledger.buy_shares(1100, dec!(300), BuyReason::Initial).unwrap_err();
        assert!(matches!(err, LedgerError::MarginLimitExceeded { .. }));
        assert_eq!(ledger.cash(), dec!(200000));
        assert_eq!(ledger.shares(), 0);
    }

    #[test]
    fn test_write_requires_cover() {
        let mut ledger = ledger();
        ledger.buy_shares(450, dec!(300), BuyReason::Initial).unwrap();
        assert_eq!(ledger.coverage_capacity(), 4);

        let err = ledger.write_call(call(dec!(305), 8), 5, dec!(2)).unwrap_err();
        assert_eq!(err, LedgerError::UncoveredWrite { requested: 5, capacity: 4 });

        let before = ledger.cash();
        ledger.write_call(call(dec!(305), 8), 4, dec!(2.50)).unwrap();
        assert_eq!(ledger.cash(), before + dec!(1000) - dec!(2.60));
        assert_eq!(ledger.premiums_received(), dec!(1000));
        assert_eq!(ledger.coverage_capacity(), 0);
        assert_eq!(ledger.open_leg_value(), dec!(-1000));
    }

    #[test]
    fn test_assignment_delivers_shares() {
        let mut ledger = ledger();
        ledger.buy_shares(400, dec!(300), BuyReason::Initial).unwrap();
        let Ok(TradeEvent::Write { leg_id, .. }) = ledger.write_call(call(dec!(305), 8), 4, dec!(2)) else {
            panic!("write failed");
        };
        ledger.mark(date(8), dec!(310), 0.2);
        let cash_before = ledger.cash();

        let event = ledger.close_or_assign(leg_id, None).unwrap();
        match event {
            TradeEvent::Assign {
                shares_delivered,
                proceeds,
                haircut,
                total_cost,
                ..
            } => {
                assert_eq!(shares_delivered, 400);
                assert_eq!(haircut, dec!(122));
                assert_eq!(proceeds, dec!(122000) - dec!(122));
                assert_eq!(total_cost, dec!(2000) + dec!(122));
                assert_eq!(ledger.cash(), cash_before + proceeds);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
        assert_eq!(ledger.shares(), 0);
        assert!(ledger.open_legs().is_empty());
        assert!(ledger.check_invariants().is_ok());
    }

    #[test]
    fn test_out_of_money_expires() {
        let mut ledger = ledger();
        ledger.buy_shares(100, dec!(300), BuyReason::Initial).unwrap();
        ledger.write_call(call(dec!(305), 8), 1, dec!(2)).unwrap();
        ledger.mark(date(8), dec!(304), 0.2);
        let cash = ledger.cash();
        let event = ledger.close_or_assign(1, None).unwrap();
        assert!(matches!(event, TradeEvent::Close { reason: CloseReason::Expired, .. }));
        assert_eq!(ledger.cash(), cash);
        assert_eq!(ledger.shares(), 100);
    }

    #[test]
    fn test_unknown_leg() {
        let mut ledger = ledger();
        assert_eq!(ledger.close_or_assign(42, None).unwrap_err(), LedgerError::UnknownLeg(42));
    }

    #[test]
    fn test_interest_on_margin() {
        let mut ledger = ledger();
        ledger.buy_shares(800, dec!(300), BuyReason::Initial).unwrap();
        // cash = 200000 - 240000 - 4 = -40004
        assert_eq!(ledger.margin_used(), dec!(40004));
        // 40004 * 0.0365 / 365 = 4.0004
        assert_eq!(ledger.accrue_daily_interest(), dec!(4.00));
        assert_eq!(ledger.interest_paid(), dec!(4.00));
        let event = ledger.accrue_interest(3).unwrap();
        assert!(matches!(event, TradeEvent::InterestAccrual { days: 3, .. }));
    }

    #[test]
    fn test_withdrawal_borrows_shortfall() {
        let mut ledger = ledger();
        ledger.buy_shares(660, dec!(300), BuyReason::Initial).unwrap();
        let cash = ledger.cash();
        assert!(cash > Decimal::ZERO && cash < dec!(5000));

        let event = ledger.apply_withdrawal(dec!(5000));
        match event {
            TradeEvent::Withdrawal {
                withdrawn,
                borrowed,
                status,
                ..
            } => {
                assert_eq!(status, WithdrawalStatus::Full);
                assert_eq!(withdrawn, dec!(5000));
                assert_eq!(borrowed, dec!(5000) - cash);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ledger.cash() < Decimal::ZERO);
        assert!(ledger.check_leverage().is_ok());
    }

    #[test]
    fn test_withdrawal_partial_without_headroom() {
        let mut ledger = ledger();
        ledger.buy_shares(999, dec!(300), BuyReason::Initial).unwrap();
        let event = ledger.apply_withdrawal(dec!(50000));
        let TradeEvent::Withdrawal { status, withdrawn, .. } = event else {
            panic!("expected withdrawal");
        };
        assert_eq!(status, WithdrawalStatus::Partial);
        assert!(withdrawn < dec!(50000));
        assert!(ledger.check_leverage().is_ok());
    }

    #[test]
    fn test_restore_margin_after_drop() {
        let mut ledger = ledger();
        ledger.buy_shares(990, dec!(300), BuyReason::Initial).unwrap();
        ledger.write_call(call(dec!(305), 8), 5, dec!(2)).unwrap();
        ledger.mark(date(4), dec!(240), 0.2);
        assert!(ledger.check_leverage().is_err());

        let events = ledger.restore_margin();
        assert!(!events.is_empty());
        assert!(ledger.check_leverage().is_ok());
        assert!(ledger.check_invariants().is_ok());
    }
}
