//! Partial-month charges for subscriptions starting or ending mid-cycle.
//!
//! Day counts are inclusive on both triggers. Each event is rounded on its
//! own; no remainder is carried to the next one.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use super::calendar::{days_in_month, same_month};
use super::money::round_money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proration {
    pub amount: Decimal,
    pub days_charged: u32,
    pub days_in_month: u32,
}

/// Charge for the remainder of the month a subscription starts in.
///
/// `None` when the start is the 1st (full-month billing applies), when the
/// start is not in the current month, or when nothing would be charged.
pub fn start_proration(
    monthly_amount: Decimal,
    started_at: NaiveDate,
    today: NaiveDate,
) -> Option<Proration> {
    if !same_month(started_at, today) || started_at.day() == 1 {
        return None;
    }

    let total_days = days_in_month(started_at);
    let remaining = total_days - started_at.day() + 1;
    prorate(monthly_amount, remaining, total_days)
}

/// Charge for the days used in the month a subscription is cancelled in.
///
/// `None` when cancelled on the 1st.
pub fn cancellation_proration(monthly_amount: Decimal, cancelled_on: NaiveDate) -> Option<Proration> {
    if cancelled_on.day() == 1 {
        return None;
    }

    prorate(monthly_amount, cancelled_on.day(), days_in_month(cancelled_on))
}

fn prorate(monthly_amount: Decimal, days: u32, total_days: u32) -> Option<Proration> {
    if monthly_amount <= Decimal::ZERO {
        return None;
    }

    let amount = round_money(monthly_amount * Decimal::from(days) / Decimal::from(total_days));
    Some(Proration {
        amount,
        days_charged: days,
        days_in_month: total_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn start_on_the_eleventh_of_a_thirty_day_month() {
        let p = start_proration(dec!(90), d(2025, 4, 11), d(2025, 4, 11)).unwrap();
        assert_eq!(p.amount, dec!(60.00));
        assert_eq!(p.days_charged, 20);
        assert_eq!(p.days_in_month, 30);
    }

    #[test]
    fn start_on_the_first_is_never_prorated() {
        for month in 1..=12 {
            assert!(start_proration(dec!(90), d(2025, month, 1), d(2025, month, 1)).is_none());
        }
    }

    #[test]
    fn start_outside_the_current_month_is_not_prorated() {
        assert!(start_proration(dec!(90), d(2025, 5, 11), d(2025, 4, 20)).is_none());
        assert!(start_proration(dec!(90), d(2025, 3, 11), d(2025, 4, 20)).is_none());
    }

    #[test]
    fn start_formula_holds_for_every_day() {
        let monthly = dec!(49.99);
        for day in 2..=31 {
            let start = d(2025, 1, day);
            let p = start_proration(monthly, start, start).unwrap();
            let expected = round_money(monthly * Decimal::from(31 - day + 1) / dec!(31));
            assert_eq!(p.amount, expected, "day {}", day);
        }
    }

    #[test]
    fn cancellation_counts_days_used_inclusive() {
        let p = cancellation_proration(dec!(90), d(2025, 4, 10)).unwrap();
        assert_eq!(p.amount, dec!(30.00));
        assert_eq!(p.days_charged, 10);

        let feb = cancellation_proration(dec!(100), d(2024, 2, 15)).unwrap();
        // 100 × 15 / 29 = 51.7241...
        assert_eq!(feb.amount, dec!(51.72));
    }

    #[test]
    fn cancellation_on_the_first_is_not_prorated() {
        assert!(cancellation_proration(dec!(90), d(2025, 4, 1)).is_none());
    }

    #[test]
    fn usage_billed_subscriptions_are_not_prorated() {
        assert!(start_proration(Decimal::ZERO, d(2025, 4, 11), d(2025, 4, 11)).is_none());
        assert!(cancellation_proration(Decimal::ZERO, d(2025, 4, 11)).is_none());
    }
}
