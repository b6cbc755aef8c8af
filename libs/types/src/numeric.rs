//! Rounding rules for valuations
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! All rounding is HALF_UP.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept for per-position money values and percentages.
pub const PRECISION: u32 = 2;

/// Decimal places kept for allocation percentages.
pub const ALLOCATION_PRECISION: u32 = 1;

/// Round to `dp` decimal places, HALF_UP.
pub fn round_dp(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a money value to [`PRECISION`].
pub fn round_money(value: Decimal) -> Decimal {
    round_dp(value, PRECISION)
}

/// `100 * part / whole`, or zero when `whole` is zero.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    Decimal::ONE_HUNDRED * part / whole
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(-1.005)), dec!(-1.01));
        assert_eq!(round_dp(dec!(2.5), 0), dec!(3));
    }

    #[test]
    fn test_percent_of_zero_whole() {
        assert_eq!(percent_of(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percent_of(dec!(25), dec!(200)), dec!(12.5));
    }
}
