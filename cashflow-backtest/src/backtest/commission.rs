//! Commission model for stock and option orders.
//!
//! Stock: per-share rate with a per-order minimum.
//! Options: flat rate per contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::SimulationConfig;

/// Commission charged on one order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub quantity: i64,
    pub rate: Decimal,
    pub total: Decimal,
}

/// Configurable commission model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionModel {
    /// Commission per share.
    pub per_share: Decimal,
    /// Minimum commission per stock order.
    pub min_per_order: Decimal,
    /// Commission per option contract.
    pub per_contract: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_share: Decimal::new(5, 3),
            min_per_order: Decimal::ONE,
            per_contract: Decimal::new(65, 2),
        }
    }
}

impl CommissionModel {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            per_share: config.stock_commission,
            min_per_order: config.min_commission,
            per_contract: config.option_commission,
        }
    }

    /// Create a zero-commission model.
    pub fn zero() -> Self {
        Self {
            per_share: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
            per_contract: Decimal::ZERO,
        }
    }

    /// Commission for a stock order of `shares`.
    pub fn stock(&self, shares: i64) -> Commission {
        let total = (self.per_share * Decimal::from(shares.abs()))
            .max(self.min_per_order)
            .round_dp(2);
        Commission {
            quantity: shares,
            rate: self.per_share,
            total,
        }
    }

    /// Commission for an option order of `contracts`.
    pub fn option(&self, contracts: i64) -> Commission {
        Commission {
            quantity: contracts,
            rate: self.per_contract,
            total: (self.per_contract * Decimal::from(contracts.abs())).round_dp(2),
        }
    }
}
