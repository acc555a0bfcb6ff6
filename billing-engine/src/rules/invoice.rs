//! Invoice line construction and totals.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use super::money::{percent_of, round_money};
use crate::models::{InvoiceLine, OneTimeCharge, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

/// Whether a subscription's monthly amount belongs on the invoice for the
/// month starting at `period_start`.
///
/// Billing is in advance for the calendar month. A subscription started after
/// the 1st is covered by its start proration for that month. Zero amounts are
/// usage-billed elsewhere.
pub fn bills_recurring(subscription: &Subscription, period_start: NaiveDate) -> bool {
    subscription.status.is_billable()
        && subscription.monthly_amount > Decimal::ZERO
        && subscription.started_at <= period_start
        && subscription
            .cancelled_at
            .map_or(true, |cancel_on| cancel_on >= period_start)
}

pub fn recurring_line(subscription: &Subscription, client_rate: Decimal) -> InvoiceLine {
    InvoiceLine {
        name: subscription.description.clone(),
        rate: subscription.monthly_amount,
        quantity: Decimal::ONE,
        tax_percentage: subscription.tax_rate_override.unwrap_or(client_rate),
        subscription_id: Some(subscription.subscription_id),
        charge_id: None,
    }
}

pub fn charge_line(charge: &OneTimeCharge, client_rate: Decimal) -> InvoiceLine {
    InvoiceLine {
        name: charge.description.clone(),
        rate: charge.amount,
        quantity: Decimal::ONE,
        tax_percentage: charge.tax_rate_override.unwrap_or(client_rate),
        subscription_id: charge.subscription_id,
        charge_id: Some(charge.charge_id),
    }
}

/// Sum lines at full precision; subtotal and VAT are each rounded once and
/// the total is their sum.
pub fn totals(lines: &[InvoiceLine]) -> InvoiceTotals {
    let (net, vat) = lines
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(net, vat), line| {
            let amount = line.rate * line.quantity;
            (net + amount, vat + percent_of(amount, line.tax_percentage))
        });

    let subtotal = round_money(net);
    let vat_amount = round_money(vat);
    InvoiceTotals {
        subtotal,
        vat_amount,
        total: subtotal + vat_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChargeSource, CreateCharge, CreateSubscription, SubscriptionStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn subscription(amount: Decimal, started_at: NaiveDate) -> Subscription {
        Subscription::new(
            CreateSubscription {
                client_id: Uuid::new_v4(),
                service_type: "seo".into(),
                description: "SEO retainer".into(),
                monthly_amount: amount,
                tax_rate_override: None,
                started_at,
            },
            Utc::now(),
        )
    }

    fn line(rate: Decimal, tax: Decimal) -> InvoiceLine {
        InvoiceLine {
            name: "line".into(),
            rate,
            quantity: Decimal::ONE,
            tax_percentage: tax,
            subscription_id: None,
            charge_id: None,
        }
    }

    #[test]
    fn reverse_charge_thousand_euros() {
        let t = totals(&[line(dec!(1000), dec!(0))]);
        assert_eq!(t.subtotal, dec!(1000.00));
        assert_eq!(t.vat_amount, dec!(0.00));
        assert_eq!(t.total, dec!(1000.00));
    }

    #[test]
    fn vat_is_rounded_once_over_all_lines() {
        // 3 x 0.005 VAT: per-line rounding would give 0.03, summed first 0.02.
        let lines = vec![
            line(dec!(0.03), dec!(16.6666666667)),
            line(dec!(0.03), dec!(16.6666666667)),
            line(dec!(0.03), dec!(16.6666666667)),
        ];
        let t = totals(&lines);
        assert_eq!(t.subtotal, dec!(0.09));
        assert_eq!(t.vat_amount, dec!(0.02));
        assert_eq!(t.total, dec!(0.11));
    }

    #[test]
    fn mixed_rates() {
        let t = totals(&[line(dec!(100), dec!(17)), line(dec!(50), dec!(3))]);
        assert_eq!(t.subtotal, dec!(150.00));
        assert_eq!(t.vat_amount, dec!(18.50));
        assert_eq!(t.total, dec!(168.50));
    }

    #[test]
    fn recurring_billing_window() {
        let period = d(2025, 3, 1);
        assert!(bills_recurring(&subscription(dec!(90), d(2025, 1, 15)), period));
        assert!(bills_recurring(&subscription(dec!(90), d(2025, 3, 1)), period));
        // Started mid-month: covered by proration.
        assert!(!bills_recurring(&subscription(dec!(90), d(2025, 3, 11)), period));
        // Usage-billed.
        assert!(!bills_recurring(&subscription(dec!(0), d(2025, 1, 1)), period));

        let mut paused = subscription(dec!(90), d(2025, 1, 1));
        paused.status = SubscriptionStatus::Paused;
        paused.cancelled_at = Some(d(2025, 3, 31));
        assert!(bills_recurring(&paused, period));
        paused.cancelled_at = Some(d(2025, 2, 28));
        assert!(!bills_recurring(&paused, period));

        let mut cancelled = subscription(dec!(90), d(2025, 1, 1));
        cancelled.status = SubscriptionStatus::Cancelled;
        assert!(!bills_recurring(&cancelled, period));
    }

    #[test]
    fn override_beats_client_rate() {
        let mut sub = subscription(dec!(90), d(2025, 1, 1));
        sub.tax_rate_override = Some(dec!(3));
        assert_eq!(recurring_line(&sub, dec!(17)).tax_percentage, dec!(3));

        let charge = OneTimeCharge::new(
            CreateCharge {
                client_id: sub.client_id,
                subscription_id: None,
                source: ChargeSource::Manual,
                description: "Setup".into(),
                amount: dec!(250),
                tax_rate_override: None,
            },
            Utc::now(),
        );
        let l = charge_line(&charge, dec!(0));
        assert_eq!(l.tax_percentage, dec!(0));
        assert_eq!(l.charge_id, Some(charge.charge_id));
    }
}
