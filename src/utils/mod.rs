//! Shared utilities.

pub mod decimal;

pub use decimal::{in_price_area, limit_price, spread_pct, truncate_to_precision};
