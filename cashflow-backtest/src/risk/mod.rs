//! Position sizing.

pub mod position_sizer;

pub use position_sizer::{size_initial_position, whole_shares, InitialAllocation, PositionSizer};
