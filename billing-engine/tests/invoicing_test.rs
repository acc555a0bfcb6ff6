mod common;

use billing_engine::models::{ChargeSource, ClientStatus, InvoiceStatus, InvoicingRecordStatus};
use billing_engine::rules::TaxMode;
use billing_engine::services::{Clock, Store};
use chrono::Duration;
use billing_engine::workflows::{ManualCharge, NewSubscription};
use common::{client_input, d, RegistryMode, TestApp};
use rust_decimal_macros::dec;

fn manual(description: &str, amount: rust_decimal::Decimal) -> ManualCharge {
    ManualCharge {
        description: description.to_string(),
        amount,
        tax_rate_override: None,
        source: ChargeSource::Manual,
    }
}

#[tokio::test]
async fn reverse_charge_invoice_for_eu_business() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.french_client().await;
    app.seed_subscription(client.client_id, dec!(1000), d(2024, 4, 1))
        .await;

    let summary = app.engine.run_monthly_invoicing().await.unwrap();

    assert_eq!(summary.period_start, d(2024, 5, 1));
    assert_eq!(summary.period_end, d(2024, 5, 31));
    assert_eq!(summary.invoiced.len(), 1);
    assert!(summary.failures.is_empty());

    let invoice = app
        .store
        .get_invoice(summary.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.tax_mode, TaxMode::ReverseCharge);
    assert_eq!(invoice.subtotal, dec!(1000));
    assert_eq!(invoice.vat_amount, dec!(0));
    assert_eq!(invoice.total, dec!(1000));
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.external_id, "INV-1");

    let submitted = app.ledger.created();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].line_items[0].tax_percentage, dec!(0));
    assert_eq!(
        submitted[0].reference,
        format!("{}-2024-05", client.client_id)
    );
    assert_eq!(submitted[0].due_date, d(2024, 5, 29));
    assert_eq!(
        *app.vat_registry.lookups.lock().unwrap(),
        vec!["FR12345678".to_string()]
    );
}

#[tokio::test]
async fn rerun_in_same_month_does_not_invoice_twice() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;

    let first = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(first.invoiced.len(), 1);

    app.set_today(d(2024, 5, 20));
    let second = app.engine.run_monthly_invoicing().await.unwrap();
    assert!(second.invoiced.is_empty());
    assert_eq!(second.already_invoiced, 1);

    assert_eq!(app.ledger.created().len(), 1);
    assert_eq!(
        app.store.list_invoices(client.client_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn domestic_business_pays_home_rate() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;

    let summary = app.engine.run_monthly_invoicing().await.unwrap();
    let invoice = app
        .store
        .get_invoice(summary.invoiced[0])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(invoice.tax_mode, TaxMode::Domestic);
    assert_eq!(invoice.vat_rate, dec!(17));
    assert_eq!(invoice.vat_amount, dec!(17));
    assert_eq!(invoice.total, dec!(117));
    assert!(app.vat_registry.lookups.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_vat_id_falls_back_to_home_rate() {
    let app = TestApp::new(d(2024, 5, 15));
    app.vat_registry.set(RegistryMode::Invalid);
    let client = app.french_client().await;
    app.seed_subscription(client.client_id, dec!(1000), d(2024, 4, 1))
        .await;

    let summary = app.engine.run_monthly_invoicing().await.unwrap();
    let invoice = app
        .store
        .get_invoice(summary.invoiced[0])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(invoice.tax_mode, TaxMode::DomesticDefault);
    assert_eq!(invoice.vat_amount, dec!(170));
    assert_eq!(invoice.total, dec!(1170));
}

#[tokio::test]
async fn unavailable_registry_keeps_reverse_charge_and_flags_client() {
    let app = TestApp::new(d(2024, 5, 15));
    app.vat_registry.set(RegistryMode::Down);
    let client = app.french_client().await;
    app.seed_subscription(client.client_id, dec!(1000), d(2024, 4, 1))
        .await;

    let summary = app.engine.run_monthly_invoicing().await.unwrap();
    assert!(summary.failures.is_empty());

    let invoice = app
        .store
        .get_invoice(summary.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.tax_mode, TaxMode::ReverseCharge);
    assert_eq!(invoice.total, dec!(1000));
    assert!(app.client(client.client_id).await.vat_review_required);
}

#[tokio::test]
async fn client_with_nothing_due_is_left_open_for_later_charges() {
    let app = TestApp::new(d(2024, 5, 1));
    let client = app.domestic_client().await;

    let summary = app.engine.run_monthly_invoicing().await.unwrap();

    assert_eq!(summary.clients_considered, 1);
    assert_eq!(summary.nothing_due, 1);
    assert!(summary.invoiced.is_empty());
    assert!(app.ledger.created().is_empty());
    assert!(app
        .store
        .get_invoicing_record(client.client_id, d(2024, 5, 1))
        .await
        .unwrap()
        .is_none());

    app.set_today(d(2024, 5, 10));
    app.engine
        .add_charge(client.client_id, manual("Design work", dec!(250)))
        .await
        .unwrap();
    let rerun = app.engine.run_monthly_invoicing().await.unwrap();

    assert_eq!(rerun.invoiced.len(), 1);
    assert_eq!(rerun.already_invoiced, 0);
    let record = app
        .store
        .get_invoicing_record(client.client_id, d(2024, 5, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, InvoicingRecordStatus::Completed);
    assert_eq!(record.invoice_id, Some(rerun.invoiced[0]));
}

#[tokio::test]
async fn abandoned_claim_is_taken_over_once_the_lease_expires() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;

    let now = app.clock.now();
    let fresh = app
        .store
        .claim_invoicing_period(client.client_id, d(2024, 5, 1), now, now)
        .await
        .unwrap();
    assert!(fresh);
    let blocked = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(blocked.already_invoiced, 1);
    assert!(app.ledger.created().is_empty());

    app.clock.advance(Duration::hours(1));
    let recovered = app.engine.run_monthly_invoicing().await.unwrap();

    assert_eq!(recovered.invoiced.len(), 1);
    assert_eq!(app.ledger.created().len(), 1);
    let record = app
        .store
        .get_invoicing_record(client.client_id, d(2024, 5, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, InvoicingRecordStatus::Completed);
}

#[tokio::test]
async fn ledger_failure_is_recorded_and_retried_on_next_run() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.engine
        .add_charge(client.client_id, manual("Design work", dec!(250)))
        .await
        .unwrap();

    app.ledger.fail(true);
    let failed = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(failed.failures.len(), 1);
    assert_eq!(failed.failures[0].entity_id, client.client_id.to_string());
    assert_eq!(failed.failures[0].kind, "external_retryable");

    let record = app
        .store
        .get_invoicing_record(client.client_id, d(2024, 5, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, InvoicingRecordStatus::Failed);
    assert_eq!(
        app.store
            .list_unbilled_charges(client.client_id)
            .await
            .unwrap()
            .len(),
        1
    );

    app.ledger.fail(false);
    let retried = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(retried.invoiced.len(), 1);
    assert!(app
        .store
        .list_unbilled_charges(client.client_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn charges_are_billed_once_alongside_recurring_lines() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;
    app.engine
        .add_charge(client.client_id, manual("Extra mailbox", dec!(250)))
        .await
        .unwrap();

    let may = app.engine.run_monthly_invoicing().await.unwrap();
    let may_invoice = app
        .store
        .get_invoice(may.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(may_invoice.lines.len(), 2);
    assert_eq!(may_invoice.subtotal, dec!(350));

    app.set_today(d(2024, 6, 3));
    let june = app.engine.run_monthly_invoicing().await.unwrap();
    let june_invoice = app
        .store
        .get_invoice(june.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(june_invoice.lines.len(), 1);
    assert_eq!(june_invoice.subtotal, dec!(100));
    assert_eq!(june_invoice.period_start, d(2024, 6, 1));
    assert_eq!(
        app.ledger.created()[1].reference,
        format!("{}-2024-06", client.client_id)
    );
}

#[tokio::test]
async fn mid_month_start_is_prorated_then_billed_in_full() {
    let app = TestApp::new(d(2024, 5, 16));
    let client = app.domestic_client().await;

    let added = app
        .engine
        .add_subscription(
            client.client_id,
            NewSubscription {
                service_type: "seo".to_string(),
                description: "SEO retainer".to_string(),
                monthly_amount: dec!(310),
                tax_rate_override: None,
                started_at: None,
            },
        )
        .await
        .unwrap();
    let proration = added.proration.expect("mid-month start is prorated");
    assert_eq!(proration.amount, dec!(160));

    let may = app.engine.run_monthly_invoicing().await.unwrap();
    let may_invoice = app
        .store
        .get_invoice(may.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(may_invoice.lines.len(), 1);
    assert_eq!(may_invoice.subtotal, dec!(160));

    app.set_today(d(2024, 6, 1));
    let june = app.engine.run_monthly_invoicing().await.unwrap();
    let june_invoice = app
        .store
        .get_invoice(june.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(june_invoice.subtotal, dec!(310));
}

#[tokio::test]
async fn future_start_is_prorated_in_its_first_month() {
    let app = TestApp::new(d(2024, 4, 20));
    let client = app.domestic_client().await;

    let added = app
        .engine
        .add_subscription(
            client.client_id,
            NewSubscription {
                service_type: "seo".to_string(),
                description: "SEO retainer".to_string(),
                monthly_amount: dec!(90),
                tax_rate_override: None,
                started_at: Some(d(2024, 5, 11)),
            },
        )
        .await
        .unwrap();
    assert!(added.proration.is_none());

    app.set_today(d(2024, 5, 15));
    let may = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(may.invoiced.len(), 1);
    let may_invoice = app
        .store
        .get_invoice(may.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    // 21 of 31 days.
    assert_eq!(may_invoice.subtotal, dec!(60.97));
    assert_eq!(may_invoice.lines.len(), 1);
    assert!(may_invoice.lines[0].charge_id.is_some());

    let rerun = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(rerun.already_invoiced, 1);
    let prorations = app
        .store
        .list_charges(client.client_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.source == ChargeSource::Proration)
        .count();
    assert_eq!(prorations, 1);

    app.set_today(d(2024, 6, 2));
    let june = app.engine.run_monthly_invoicing().await.unwrap();
    let june_invoice = app
        .store
        .get_invoice(june.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(june_invoice.subtotal, dec!(90));
}

#[tokio::test]
async fn only_billable_clients_are_considered() {
    let app = TestApp::new(d(2024, 5, 15));
    let leaving = app
        .seed_client(client_input(
            "LU",
            None,
            ClientStatus::PendingCancellation,
        ))
        .await;
    let gone = app
        .seed_client(client_input("LU", None, ClientStatus::Inactive))
        .await;
    let prospect = app
        .seed_client(client_input("LU", None, ClientStatus::Prospect))
        .await;
    for client in [&leaving, &gone, &prospect] {
        app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
            .await;
    }

    let summary = app.engine.run_monthly_invoicing().await.unwrap();

    assert_eq!(summary.clients_considered, 1);
    assert_eq!(summary.invoiced.len(), 1);
    let invoice = app
        .store
        .get_invoice(summary.invoiced[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.client_id, leaving.client_id);
}
