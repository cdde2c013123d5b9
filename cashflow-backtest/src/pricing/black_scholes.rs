//! Black-Scholes pricing and delta.
//!
//! The data provider does not always supply delta, and synthetic chains never
//! carry a quote, so both premiums and deltas are derived here from the
//! session IV (scaled by `volatility_scaling_factor`) and `risk_free_rate`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::{OptionContract, OptionType};

/// Calendar-day year used for time to expiry.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Black-Scholes calculator.
#[derive(Debug, Clone, Copy)]
pub struct BlackScholes {
    /// Risk-free interest rate.
    pub rate: f64,
    /// Dividend yield.
    pub dividend: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: 0.05,
            dividend: 0.0,
        }
    }
}

impl BlackScholes {
    pub fn new(rate: f64, dividend: f64) -> Self {
        Self { rate, dividend }
    }

    /// Year fraction for a calendar-day count.
    pub fn year_fraction(days: i64) -> f64 {
        days.max(0) as f64 / DAYS_PER_YEAR
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator =
            (spot / strike).ln() + (self.rate - self.dividend + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    fn norm_cdf(x: f64) -> f64 {
        Normal::new(0.0, 1.0).map(|n| n.cdf(x)).unwrap_or(0.5)
    }

    fn degenerate(time: f64, vol: f64) -> bool {
        time <= 0.0 || vol <= 0.0 || !vol.is_finite()
    }

    /// Call option price.
    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if Self::degenerate(time, vol) {
            return (spot - strike).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        spot * (-self.dividend * time).exp() * Self::norm_cdf(d1)
            - strike * (-self.rate * time).exp() * Self::norm_cdf(d2)
    }

    /// Put option price.
    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if Self::degenerate(time, vol) {
            return (strike - spot).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        strike * (-self.rate * time).exp() * Self::norm_cdf(-d2)
            - spot * (-self.dividend * time).exp() * Self::norm_cdf(-d1)
    }

    pub fn price(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        match opt_type {
            OptionType::Call => self.call_price(spot, strike, time, vol),
            OptionType::Put => self.put_price(spot, strike, time, vol),
        }
    }

    pub fn delta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if Self::degenerate(time, vol) {
            return match opt_type {
                OptionType::Call if spot > strike => 1.0,
                OptionType::Put if spot < strike => -1.0,
                _ => 0.0,
            };
        }

        let d1 = self.d1(spot, strike, time, vol);
        let discount = (-self.dividend * time).exp();

        match opt_type {
            OptionType::Call => discount * Self::norm_cdf(d1),
            OptionType::Put => discount * (Self::norm_cdf(d1) - 1.0),
        }
    }

    /// Per-share value of `contract` on a date `days` before expiry, rounded to cents.
    pub fn contract_price(
        &self,
        contract: &OptionContract,
        spot: Decimal,
        days: i64,
        vol: f64,
    ) -> Decimal {
        if days <= 0 {
            return contract.intrinsic(spot);
        }
        let s = spot.to_f64().unwrap_or(0.0);
        let k = contract.strike.to_f64().unwrap_or(0.0);
        if s <= 0.0 || k <= 0.0 {
            return contract.intrinsic(spot);
        }
        let value = self.price(s, k, Self::year_fraction(days), vol, contract.option_type);
        Decimal::from_f64_retain(value)
            .unwrap_or_default()
            .round_dp(2)
            .max(contract.intrinsic(spot))
    }

    /// Delta of `contract` on a date `days` before expiry.
    pub fn contract_delta(&self, contract: &OptionContract, spot: Decimal, days: i64, vol: f64) -> f64 {
        let s = spot.to_f64().unwrap_or(0.0);
        let k = contract.strike.to_f64().unwrap_or(0.0);
        if s <= 0.0 || k <= 0.0 {
            return 0.0;
        }
        self.delta(s, k, Self::year_fraction(days), vol, contract.option_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_call_price_atm() {
        let bs = BlackScholes::new(0.05, 0.0);
        let price = bs.call_price(100.0, 100.0, 1.0, 0.20);
        assert_relative_eq!(price, 10.45, epsilon = 0.01);
    }

    #[test]
    fn test_put_call_parity() {
        let bs = BlackScholes::new(0.05, 0.0);
        let (spot, strike, time, vol) = (100.0, 105.0, 0.5, 0.25);

        let call = bs.call_price(spot, strike, time, vol);
        let put = bs.put_price(spot, strike, time, vol);

        let parity_rhs = spot - strike * (-bs.rate * time).exp();
        assert_relative_eq!(call - put, parity_rhs, epsilon = 1e-9);
    }

    #[test]
    fn test_delta_bounds() {
        let bs = BlackScholes::default();
        let call_delta = bs.delta(100.0, 100.0, 0.5, 0.25, OptionType::Call);
        let put_delta = bs.delta(100.0, 100.0, 0.5, 0.25, OptionType::Put);
        assert!(call_delta > 0.0 && call_delta < 1.0);
        assert!(put_delta > -1.0 && put_delta < 0.0);
        assert_relative_eq!(call_delta - put_delta, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_expired_is_intrinsic() {
        let bs = BlackScholes::default();
        assert_eq!(bs.call_price(110.0, 100.0, 0.0, 0.2), 10.0);
        assert_eq!(bs.delta(90.0, 100.0, 0.0, 0.2, OptionType::Call), 0.0);

        let expiry = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let call = OptionContract::new("SPY", expiry, dec!(500), OptionType::Call);
        assert_eq!(bs.contract_price(&call, dec!(505.25), 0, 0.2), dec!(5.25));
        assert_eq!(bs.contract_price(&call, dec!(490), -3, 0.2), dec!(0));
    }

    #[test]
    fn test_contract_price_rounded_and_above_intrinsic() {
        let bs = BlackScholes::new(0.04, 0.0);
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let call = OptionContract::new("SPY", expiry, dec!(500), OptionType::Call);
        let price = bs.contract_price(&call, dec!(510), 5, 0.18);
        assert_eq!(price, price.round_dp(2));
        assert!(price >= dec!(10));
    }
}
