//! Decimal arithmetic utilities for spread and price calculations.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Truncate (round toward zero) to a number of decimal places.
///
/// Filled quantities are normalized this way before being stored, so a
/// closing order never asks for more than was actually bought or sold.
pub fn truncate_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Signed spread of `future` over `spot` in percent.
///
/// Returns `None` when the spot price is zero.
pub fn spread_pct(future: Decimal, spot: Decimal) -> Option<Decimal> {
    if spot == Decimal::ZERO {
        return None;
    }
    Some((future - spot) * dec!(100) / spot)
}

/// Whether `price` lies within `reference * (1 ± limit)`, bounds inclusive.
pub fn in_price_area(price: Decimal, reference: Decimal, limit: Decimal) -> bool {
    let low = reference * (Decimal::ONE - limit);
    let high = reference * (Decimal::ONE + limit);
    price >= low && price <= high
}

/// Worst acceptable price for an order given a slippage limit.
///
/// Buys may pay up to `price * (1 + limit)`, sells accept down to
/// `price * (1 - limit)`.
pub fn limit_price(price: Decimal, limit: Decimal, is_buy: bool) -> Decimal {
    if is_buy {
        price * (Decimal::ONE + limit)
    } else {
        price * (Decimal::ONE - limit)
    }
}
