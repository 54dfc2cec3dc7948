//! Transfer fee calculation.
//!
//! `fee(amount) = clamp(ceil(amount * 0.8%), MIN_FEE, MAX_FEE)`, expressed in
//! the same minor unit as the amount.

use rust_decimal::Decimal;

/// Percentage of the amount charged as fee (0.8%)
pub const FEE_RATE: Decimal = Decimal::from_parts(8, 0, 0, false, 3);

/// Fee floor
pub const MIN_FEE: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Fee cap
pub const MAX_FEE: Decimal = Decimal::from_parts(1500, 0, 0, false, 0);

/// Compute the fee for an amount.
///
/// Total over all decimals: negative amounts hit the floor and products
/// too large to represent hit the cap.
#[must_use]
pub fn calculate_fee(amount: Decimal) -> Decimal {
    let raw = match amount.checked_mul(FEE_RATE) {
        Some(product) => product.ceil(),
        None => return MAX_FEE,
    };
    raw.clamp(MIN_FEE, MAX_FEE)
}

/// Amount plus its fee.
#[must_use]
pub fn calculate_total(amount: Decimal) -> Decimal {
    amount.saturating_add(calculate_fee(amount))
}
