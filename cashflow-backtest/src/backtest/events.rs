//! Trade events and open option legs.
//!
//! Every ledger mutation returns a `TradeEvent`. The daily Trading_Log is
//! rendered from these with `Display`; the text is never parsed back.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::OptionContract;

/// A written call held by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    /// Ledger-assigned identifier, unique within a run.
    pub id: u64,
    pub contract: OptionContract,
    /// Contracts written (positive).
    pub quantity: i64,
    /// Premium received per share.
    pub premium: Decimal,
    pub open_date: NaiveDate,
    pub close_date: Option<NaiveDate>,
    /// Latest per-share mark.
    pub mark: Decimal,
}

impl OptionLeg {
    /// Shares this leg obliges the account to deliver.
    pub fn shares_covered(&self, contract_size: i64) -> i64 {
        self.quantity * contract_size
    }

    /// Mark-to-market value of the short position (never positive).
    pub fn market_value(&self, contract_size: i64) -> Decimal {
        -(self.mark * Decimal::from(self.shares_covered(contract_size)))
    }

    /// Fraction of the premium kept if closed at the current mark.
    pub fn captured_fraction(&self) -> Decimal {
        if self.premium <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.premium - self.mark) / self.premium
    }
}

/// Why a leg left the book without assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Expired,
    BoughtBack,
    ProfitTake,
    MarginCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Full,
    Partial,
    Skipped,
}

/// Action that was attempted and refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    InitialBuy,
    DipBuy,
    Write,
    BuyBack,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Self::InitialBuy => "initial buy",
            Self::DipBuy => "dip buy",
            Self::Write => "call write",
            Self::BuyBack => "buy back",
        }
    }
}

/// Why shares are being bought.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuyReason {
    Initial,
    Dip {
        trigger_price: Decimal,
        recent_high: Decimal,
    },
}

/// One structured entry of the Trading_Log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TradeEvent {
    InitialBuy {
        shares: i64,
        price: Decimal,
        cost: Decimal,
        commission: Decimal,
    },
    DipBuy {
        shares: i64,
        price: Decimal,
        cost: Decimal,
        commission: Decimal,
        trigger_price: Decimal,
        recent_high: Decimal,
    },
    Write {
        leg_id: u64,
        contract: OptionContract,
        contracts: i64,
        /// Per share.
        premium: Decimal,
        /// Net cash received.
        credit: Decimal,
        commission: Decimal,
    },
    Close {
        leg_id: u64,
        contract: OptionContract,
        contracts: i64,
        reason: CloseReason,
        /// Per share.
        price: Decimal,
        /// Cash paid excluding commission.
        cost: Decimal,
        commission: Decimal,
    },
    Assign {
        leg_id: u64,
        contract: OptionContract,
        contracts: i64,
        shares_delivered: i64,
        strike: Decimal,
        spot: Decimal,
        proceeds: Decimal,
        haircut: Decimal,
        /// Value given up versus selling at spot, plus the haircut.
        total_cost: Decimal,
    },
    Withdrawal {
        requested: Decimal,
        withdrawn: Decimal,
        borrowed: Decimal,
        status: WithdrawalStatus,
    },
    InterestAccrual {
        amount: Decimal,
        margin_used: Decimal,
        days: i64,
    },
    MarginCall {
        shares_sold: i64,
        price: Decimal,
        proceeds: Decimal,
        commission: Decimal,
    },
    Skipped {
        action: Action,
        reason: String,
        detail: String,
    },
}

impl TradeEvent {
    pub fn skipped(action: Action, reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Skipped {
            action,
            reason: reason.into(),
            detail: detail.into(),
        }
    }

    /// Commission paid by this event.
    pub fn commission(&self) -> Decimal {
        match self {
            Self::InitialBuy { commission, .. }
            | Self::DipBuy { commission, .. }
            | Self::Write { commission, .. }
            | Self::Close { commission, .. }
            | Self::MarginCall { commission, .. } => *commission,
            _ => Decimal::ZERO,
        }
    }

    /// Leg closed, expired or assigned by this event.
    pub fn closes_leg(&self) -> bool {
        matches!(self, Self::Close { .. } | Self::Assign { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitialBuy {
                shares,
                price,
                cost,
                commission,
            } => write!(
                f,
                "Initial buy {} shares @ ${:.2} (cost ${:.2}, commission ${:.2})",
                shares, price, cost, commission
            ),
            Self::DipBuy {
                shares,
                price,
                commission,
                trigger_price,
                recent_high,
                ..
            } => write!(
                f,
                "Dip buy {} shares @ ${:.2} (trigger ${:.2}, high ${:.2}, commission ${:.2})",
                shares, price, trigger_price, recent_high, commission
            ),
            Self::Write {
                contract,
                contracts,
                premium,
                credit,
                ..
            } => write!(
                f,
                "Wrote {} x {} @ ${:.2} (credit ${:.2})",
                contracts, contract, premium, credit
            ),
            Self::Close {
                contract,
                contracts,
                reason,
                price,
                cost,
                commission,
                ..
            } => match reason {
                CloseReason::Expired => {
                    write!(f, "Expired worthless {} x {}", contracts, contract)
                }
                CloseReason::BoughtBack => write!(
                    f,
                    "Bought back {} x {} @ ${:.2} (cost ${:.2}, commission ${:.2})",
                    contracts, contract, price, cost, commission
                ),
                CloseReason::ProfitTake => write!(
                    f,
                    "Profit take {} x {} @ ${:.2} (cost ${:.2}, commission ${:.2})",
                    contracts, contract, price, cost, commission
                ),
                CloseReason::MarginCall => write!(
                    f,
                    "Margin call buy back {} x {} @ ${:.2} (cost ${:.2})",
                    contracts, contract, price, cost
                ),
            },
            Self::Assign {
                contract,
                contracts,
                shares_delivered,
                strike,
                spot,
                proceeds,
                total_cost,
                ..
            } => write!(
                f,
                "Call assigned {} x {}: delivered {} shares @ ${:.2} (spot ${:.2}, proceeds ${:.2}, total cost ${:.2})",
                contracts, contract, shares_delivered, strike, spot, proceeds, total_cost
            ),
            Self::Withdrawal {
                requested,
                withdrawn,
                borrowed,
                status,
            } => match status {
                WithdrawalStatus::Full if borrowed.is_zero() => {
                    write!(f, "Withdrawal ${:.2}", withdrawn)
                }
                WithdrawalStatus::Full => write!(
                    f,
                    "Withdrawal ${:.2} (borrowed ${:.2})",
                    withdrawn, borrowed
                ),
                WithdrawalStatus::Partial => write!(
                    f,
                    "Partial withdrawal ${:.2} of ${:.2} (borrowed ${:.2})",
                    withdrawn, requested, borrowed
                ),
                WithdrawalStatus::Skipped => write!(
                    f,
                    "Withdrawal of ${:.2} skipped: no margin headroom",
                    requested
                ),
            },
            Self::InterestAccrual {
                amount,
                margin_used,
                days,
            } => write!(
                f,
                "Margin interest ${:.2} on ${:.2} ({} day{})",
                amount,
                margin_used,
                days,
                if *days == 1 { "" } else { "s" }
            ),
            Self::MarginCall {
                shares_sold,
                price,
                proceeds,
                ..
            } => write!(
                f,
                "Margin call: sold {} shares @ ${:.2} (proceeds ${:.2})",
                shares_sold, price, proceeds
            ),
            Self::Skipped {
                action,
                reason,
                detail,
            } => write!(f, "Skipped {} ({}): {}", action.label(), reason, detail),
        }
    }
}
