//! Position sizing.
//!
//! Two share counts are computed here:
//! - Initial allocation: `floor(cash * initial_position_percent / spot)`
//! - Dip buy: `floor(dip_buy_percent * idle_cash / close)`
//!
//! Both are clamped to `max_position_size` when that limit is set.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::commission::CommissionModel;
use crate::backtest::config::{ratio_to_decimal, SimulationConfig};
use crate::error::SimulationError;

/// Result of the initial sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialAllocation {
    pub shares: i64,
    /// Share cost before commission.
    pub cost: Decimal,
    pub commission: Decimal,
    /// Cash left after the purchase and its commission.
    pub remaining_cash: Decimal,
}

/// Size the first purchase of the run.
///
/// Fails only when cash is non-zero but cannot buy a single share while a
/// non-zero allocation was requested.
pub fn size_initial_position(
    cash: Decimal,
    spot_price: Decimal,
    initial_position_percent: Decimal,
    commission: &CommissionModel,
) -> Result<InitialAllocation, SimulationError> {
    if spot_price <= Decimal::ZERO {
        return Ok(InitialAllocation {
            shares: 0,
            cost: Decimal::ZERO,
            commission: Decimal::ZERO,
            remaining_cash: cash,
        });
    }

    let shares = whole_shares(cash * initial_position_percent, spot_price);

    if shares == 0
        && initial_position_percent > Decimal::ZERO
        && cash > Decimal::ZERO
        && cash < spot_price
    {
        return Err(SimulationError::InsufficientCapital {
            cash,
            price: spot_price,
        });
    }

    if shares == 0 {
        return Ok(InitialAllocation {
            shares: 0,
            cost: Decimal::ZERO,
            commission: Decimal::ZERO,
            remaining_cash: cash,
        });
    }

    let cost = Decimal::from(shares) * spot_price;
    let fee = commission.stock(shares).total;
    Ok(InitialAllocation {
        shares,
        cost,
        commission: fee,
        remaining_cash: cash - cost - fee,
    })
}

/// `floor(budget / price)`, zero for a non-positive budget or price.
pub fn whole_shares(budget: Decimal, price: Decimal) -> i64 {
    if budget <= Decimal::ZERO || price <= Decimal::ZERO {
        return 0;
    }
    (budget / price).floor().to_i64().unwrap_or(0)
}

/// Share sizing bound to one run's parameters.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    initial_position_percent: Decimal,
    dip_buy_percent: Decimal,
    max_position_size: i64,
    commission: CommissionModel,
}

impl PositionSizer {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            initial_position_percent: ratio_to_decimal(config.initial_position_percent),
            dip_buy_percent: ratio_to_decimal(config.dip_buy_percent),
            max_position_size: config.max_position_size,
            commission: CommissionModel::from_config(config),
        }
    }

    /// Initial allocation, clamped to the position limit.
    pub fn initial(&self, cash: Decimal, spot: Decimal) -> Result<InitialAllocation, SimulationError> {
        let mut allocation =
            size_initial_position(cash, spot, self.initial_position_percent, &self.commission)?;
        let capped = self.clamp(0, allocation.shares);
        if capped < allocation.shares {
            allocation.shares = capped;
            allocation.cost = Decimal::from(capped) * spot;
            allocation.commission = if capped > 0 {
                self.commission.stock(capped).total
            } else {
                Decimal::ZERO
            };
            allocation.remaining_cash = cash - allocation.cost - allocation.commission;
        }
        Ok(allocation)
    }

    /// Shares to buy on a dip given idle cash and current holdings.
    pub fn dip_quantity(&self, idle_cash: Decimal, close: Decimal, held: i64) -> i64 {
        let wanted = whole_shares(self.dip_buy_percent * idle_cash.max(Decimal::ZERO), close);
        self.clamp(held, wanted)
    }

    /// Largest purchase that keeps holdings within the position limit.
    fn clamp(&self, held: i64, wanted: i64) -> i64 {
        if self.max_position_size <= 0 {
            return wanted;
        }
        wanted.min((self.max_position_size - held).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_initial_sizing_scenario() {
        let model = CommissionModel::default();
        let allocation = size_initial_position(dec!(200000), dec!(300), dec!(0.6), &model).unwrap();
        assert_eq!(allocation.shares, 400);
        assert_eq!(allocation.commission, dec!(2));
        assert_eq!(allocation.remaining_cash, dec!(80000) - allocation.commission);
    }

    #[test]
    fn test_insufficient_capital() {
        let model = CommissionModel::default();
        let err = size_initial_position(dec!(250), dec!(300), dec!(0.6), &model).unwrap_err();
        assert!(matches!(err, SimulationError::InsufficientCapital { .. }));
    }

    #[test]
    fn test_zero_percent_buys_nothing() {
        let model = CommissionModel::default();
        let allocation = size_initial_position(dec!(250), dec!(300), dec!(0), &model).unwrap();
        assert_eq!(allocation.shares, 0);
        assert_eq!(allocation.remaining_cash, dec!(250));
    }

    #[test]
    fn test_position_limit_clamps() {
        let config = SimulationConfig {
            max_position_size: 250,
            dip_buy_percent: 0.5,
            ..Default::default()
        };
        let sizer = PositionSizer::from_config(&config);
        let allocation = sizer.initial(dec!(200000), dec!(300)).unwrap();
        assert_eq!(allocation.shares, 250);
        assert_eq!(allocation.remaining_cash, dec!(200000) - dec!(75000) - allocation.commission);

        // 0.5 * 100000 / 280 = 178 wanted, only 10 left under the limit
        assert_eq!(sizer.dip_quantity(dec!(100000), dec!(280), 240), 10);
        assert_eq!(sizer.dip_quantity(dec!(100000), dec!(280), 250), 0);
    }

    #[test]
    fn test_dip_quantity_unlimited() {
        let config = SimulationConfig {
            dip_buy_percent: 0.5,
            ..Default::default()
        };
        let sizer = PositionSizer::from_config(&config);
        assert_eq!(sizer.dip_quantity(dec!(100000), dec!(280), 400), 178);
        assert_eq!(sizer.dip_quantity(dec!(-5000), dec!(280), 400), 0);
    }
}
