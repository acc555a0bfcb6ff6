//! Calendar-month arithmetic.

use chrono::{Datelike, Months, NaiveDate};

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    first_day_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    last_day_of_month(date).day()
}

/// Whether two dates fall in the same calendar month.
pub fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Add whole months, clamping to the end of shorter months (Dec 31 + 2 = Feb 28/29).
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Last calendar day of the month `months` after the month of `date`.
///
/// Signed Jan 15 with a two-month notice ⇒ Mar 31.
pub fn end_of_month_after(date: NaiveDate, months: u32) -> NaiveDate {
    last_day_of_month(add_months(first_day_of_month(date), months))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(d(2024, 2, 10)), 29);
        assert_eq!(days_in_month(d(2025, 2, 10)), 28);
        assert_eq!(days_in_month(d(2025, 4, 30)), 30);
        assert_eq!(days_in_month(d(2025, 12, 1)), 31);
    }

    #[test]
    fn end_of_month_after_crosses_years() {
        assert_eq!(end_of_month_after(d(2025, 1, 15), 2), d(2025, 3, 31));
        assert_eq!(end_of_month_after(d(2025, 11, 30), 2), d(2026, 1, 31));
        assert_eq!(end_of_month_after(d(2023, 12, 31), 2), d(2024, 2, 29));
    }

    #[test]
    fn add_months_clamps() {
        assert_eq!(add_months(d(2025, 12, 31), 2), d(2026, 2, 28));
        assert_eq!(add_months(d(2025, 1, 15), 2), d(2025, 3, 15));
    }
}
