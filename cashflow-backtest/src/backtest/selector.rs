//! Contract selection for the covered-call roll.
//!
//! Filters a chain by:
//! - Option type (calls only in practice)
//! - DTE window `[dte_min, dte_max]`, and never expiring on the trade date
//! - Strike distance `|strike - spot| / spot >= min_strike_distance`
//!
//! Survivors are ranked by how close |delta| sits to the target band.
//! Contracts without a provider delta get a Black-Scholes delta from the
//! scaled session IV.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use super::config::SimulationConfig;
use crate::data::{OptionContract, OptionType};
use crate::pricing::BlackScholes;

/// A filtered contract with its ranking keys.
#[derive(Debug, Clone)]
struct Candidate {
    index: usize,
    contract: OptionContract,
    dte: i64,
    abs_delta: f64,
    band_distance: f64,
    mid_distance: f64,
}

/// Picks the contract to write from a chain.
#[derive(Debug, Clone)]
pub struct OptionSelector {
    option_type: OptionType,
    dte_min: Option<i64>,
    dte_max: Option<i64>,
    min_strike_distance: f64,
    delta_min: f64,
    delta_max: f64,
    volatility_scaling_factor: f64,
    pricer: BlackScholes,
}

impl OptionSelector {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            option_type: config.option_type,
            dte_min: config.dte_min,
            dte_max: config.dte_max,
            min_strike_distance: config.min_strike_distance,
            delta_min: config.delta_min,
            delta_max: config.delta_max,
            volatility_scaling_factor: config.volatility_scaling_factor,
            pricer: BlackScholes::new(config.risk_free_rate, 0.0),
        }
    }

    /// Best contract for `date`, or `None` when nothing passes the filters.
    ///
    /// The returned contract always carries a delta.
    pub fn select_contract(
        &self,
        chain: &[OptionContract],
        spot_price: Decimal,
        date: NaiveDate,
        implied_vol: f64,
    ) -> Option<OptionContract> {
        let spot = spot_price.to_f64().unwrap_or(0.0);
        if spot <= 0.0 {
            return None;
        }
        let vol = implied_vol * self.volatility_scaling_factor;
        let midpoint = (self.delta_min + self.delta_max) / 2.0;

        let mut candidates: Vec<Candidate> = chain
            .iter()
            .enumerate()
            .filter(|(_, c)| c.option_type == self.option_type)
            .filter_map(|(index, c)| {
                let dte = c.days_to_expiry(date);
                if !self.dte_in_window(dte) {
                    return None;
                }
                let strike = c.strike.to_f64().unwrap_or(0.0);
                if (strike - spot).abs() / spot < self.min_strike_distance {
                    return None;
                }

                let delta = c
                    .delta
                    .unwrap_or_else(|| self.pricer.contract_delta(c, spot_price, dte, vol));
                let abs_delta = delta.abs();

                Some(Candidate {
                    index,
                    contract: c.clone().with_delta(delta),
                    dte,
                    abs_delta,
                    band_distance: self.band_distance(abs_delta),
                    mid_distance: (abs_delta - midpoint).abs(),
                })
            })
            .collect();

        candidates.sort_by(compare_candidates);

        let best = candidates.into_iter().next()?;
        debug!(
            date = %date,
            contract = %best.contract,
            delta = best.abs_delta,
            dte = best.dte,
            "selected contract"
        );
        Some(best.contract)
    }

    fn dte_in_window(&self, dte: i64) -> bool {
        dte >= 1
            && self.dte_min.map_or(true, |min| dte >= min)
            && self.dte_max.map_or(true, |max| dte <= max)
    }

    /// Zero inside the band, otherwise the gap to the nearest edge.
    fn band_distance(&self, abs_delta: f64) -> f64 {
        if abs_delta < self.delta_min {
            self.delta_min - abs_delta
        } else if abs_delta > self.delta_max {
            abs_delta - self.delta_max
        } else {
            0.0
        }
    }
}

/// Band distance, then midpoint distance, then shorter DTE, then higher
/// strike, then chain order.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.band_distance
        .partial_cmp(&b.band_distance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.mid_distance
                .partial_cmp(&b.mid_distance)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.dte.cmp(&b.dte))
        .then_with(|| b.contract.strike.cmp(&a.contract.strike))
        .then_with(|| a.index.cmp(&b.index))
}
