mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{ClientStatus, InvoiceStatus, MandateStatus, PaymentMethod};
use billing_engine::services::direct_debit::DirectDebitWebhook;
use billing_engine::services::Store;
use common::{client_input, d, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn webhook(events: Vec<Value>) -> DirectDebitWebhook {
    serde_json::from_value(json!({ "events": events })).unwrap()
}

fn mandate_event(id: &str, action: &str, mandate: &str, billing_request: &str) -> Value {
    json!({
        "id": id,
        "resource_type": "mandates",
        "action": action,
        "links": { "mandate": mandate, "billing_request": billing_request }
    })
}

fn payment_event(id: &str, action: &str, payment: &str, invoice_id: &str) -> Value {
    json!({
        "id": id,
        "resource_type": "payments",
        "action": action,
        "links": { "payment": payment },
        "metadata": { "invoice_id": invoice_id }
    })
}

#[tokio::test]
async fn mandate_activation_switches_client_to_direct_debit() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;

    let flow = app.engine.start_direct_debit(client.client_id).await.unwrap();
    assert_eq!(flow.billing_request_id, "BRQ1");
    assert_eq!(
        app.direct_debit.flows.lock().unwrap()[0].redirect_url,
        format!(
            "https://billing.test/clients/{}/direct-debit/complete",
            client.client_id
        )
    );

    let summary = app
        .engine
        .handle_direct_debit_webhook(webhook(vec![mandate_event(
            "EV1", "active", "MD1", "BRQ1",
        )]))
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);
    assert!(summary.failures.is_empty());

    let mandate = app
        .store
        .get_mandate_for_client(client.client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mandate.status, MandateStatus::Active);
    assert_eq!(mandate.external_id.as_deref(), Some("MD1"));
    assert_eq!(
        app.client(client.client_id).await.payment_method,
        PaymentMethod::DirectDebit
    );

    let second = app.engine.start_direct_debit(client.client_id).await;
    assert!(matches!(second, Err(BillingError::Conflict(_))));

    let failed = app
        .engine
        .handle_direct_debit_webhook(webhook(vec![mandate_event(
            "EV2", "failed", "MD1", "BRQ1",
        )]))
        .await
        .unwrap();
    assert_eq!(failed.processed, 1);
    assert_eq!(
        app.client(client.client_id).await.payment_method,
        PaymentMethod::BankTransfer
    );
}

#[tokio::test]
async fn confirmed_payment_settles_invoice_once() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;
    let run = app.engine.run_monthly_invoicing().await.unwrap();
    let invoice_id = run.invoiced[0];

    let batch = vec![payment_event(
        "EV10",
        "confirmed",
        "PM1",
        &invoice_id.to_string(),
    )];
    let summary = app
        .engine
        .handle_direct_debit_webhook(webhook(batch.clone()))
        .await
        .unwrap();
    assert_eq!(summary.processed, 1);

    let invoice = app.store.get_invoice(invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.paid_at, Some(d(2024, 5, 15)));
    assert_eq!(invoice.payment_reference.as_deref(), Some("PM1"));
    assert_eq!(
        *app.ledger.payments.lock().unwrap(),
        vec![("INV-1".to_string(), dec!(117), "PM1".to_string())]
    );

    let redelivery = app
        .engine
        .handle_direct_debit_webhook(webhook(batch))
        .await
        .unwrap();
    assert_eq!(redelivery.duplicates, 1);
    assert_eq!(redelivery.processed, 0);
    assert_eq!(app.ledger.payments.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_payment_marks_invoice_overdue() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;
    let run = app.engine.run_monthly_invoicing().await.unwrap();
    let invoice_id = run.invoiced[0];

    let summary = app
        .engine
        .handle_direct_debit_webhook(webhook(vec![payment_event(
            "EV20",
            "failed",
            "PM2",
            &invoice_id.to_string(),
        )]))
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    let invoice = app.store.get_invoice(invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Overdue);
}

#[tokio::test]
async fn irrelevant_events_are_acknowledged_and_ignored() {
    let app = TestApp::new(d(2024, 5, 15));

    let summary = app
        .engine
        .handle_direct_debit_webhook(webhook(vec![
            json!({ "id": "EV30", "resource_type": "payouts", "action": "paid" }),
            mandate_event("EV31", "active", "MD404", "BRQ404"),
            json!({
                "id": "EV32",
                "resource_type": "payments",
                "action": "confirmed",
                "links": { "payment": "PM3" }
            }),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.ignored, 3);
    assert_eq!(summary.processed, 0);
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn prospects_cannot_start_a_mandate() {
    let app = TestApp::new(d(2024, 5, 15));
    let prospect = app
        .seed_client(client_input("LU", None, ClientStatus::Prospect))
        .await;

    let result = app.engine.start_direct_debit(prospect.client_id).await;

    assert!(matches!(result, Err(BillingError::IllegalTransition { .. })));
    assert!(app.direct_debit.flows.lock().unwrap().is_empty());
}
