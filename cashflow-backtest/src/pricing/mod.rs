//! Option pricing for premiums and deltas.

pub mod black_scholes;

pub use black_scholes::{BlackScholes, DAYS_PER_YEAR};
