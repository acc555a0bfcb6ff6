//! Monetary rounding.
//!
//! Amounts keep full precision through every intermediate step and are rounded
//! once, at the end, to cents.

use rust_decimal::{Decimal, RoundingStrategy};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to 2 decimal places, half-up.
///
/// Half-up means a midpoint rounds away from zero; billing amounts are never
/// negative so this is the ordinary commercial rounding.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount × percent / 100`, unrounded.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn midpoint_rounds_up() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(round_money(dec!(2.344999)), dec!(2.34));
        assert_eq!(round_money(dec!(0.005)), dec!(0.01));
    }

    #[test]
    fn carrying_precision_avoids_compounded_error() {
        // Three thirds of 10.00 summed before rounding give back 10.00.
        let third = dec!(10) / dec!(3);
        assert_eq!(round_money(third * dec!(3)), dec!(10.00));
        assert_eq!(round_money(third) * dec!(3), dec!(9.99));
    }

    #[test]
    fn percent_is_unrounded() {
        assert_eq!(percent_of(dec!(10.01), dec!(17)), dec!(1.7017));
    }
}
