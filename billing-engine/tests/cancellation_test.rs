mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{
    CancelType, ClientStatus, MandateStatus, PaymentMethod, SignerIdentity, SubscriptionStatus,
};
use billing_engine::services::direct_debit::DirectDebitWebhook;
use billing_engine::services::Store;
use billing_engine::workflows::InitiateCancellation;
use common::{client_input, d, TestApp, PUBLIC_BASE_URL};
use rust_decimal_macros::dec;
use serde_json::json;

fn full_cancellation() -> InitiateCancellation {
    InitiateCancellation {
        cancel_type: CancelType::Client,
        subscription_id: None,
        reason: Some("Moving to an in-house team".to_string()),
    }
}

fn signer() -> SignerIdentity {
    SignerIdentity {
        name: "Jo Doe".to_string(),
        email: "jo@acme.test".to_string(),
        ip_address: Some("203.0.113.7".to_string()),
    }
}

#[tokio::test]
async fn signed_full_cancellation_deactivates_client_at_effective_date() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    let subscription = app
        .seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;

    let initiated = app
        .engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await
        .unwrap();
    assert_eq!(initiated.effective_at, d(2024, 7, 15));
    assert_eq!(
        initiated.signing_url,
        format!("{}/cancellations/{}", PUBLIC_BASE_URL, initiated.token)
    );
    assert_eq!(
        app.client(client.client_id).await.status,
        ClientStatus::PendingCancellation
    );
    assert_eq!(app.notifier.templates(), vec!["cancellation_requested"]);

    let preview = app
        .engine
        .cancellation_context(&initiated.token)
        .await
        .unwrap();
    assert!(preview.signed_at.is_none());
    assert_eq!(preview.effective_at, d(2024, 7, 31));

    let signed = app
        .engine
        .sign_cancellation(&initiated.token, signer())
        .await
        .unwrap();
    assert!(signed.signed_at.is_some());
    assert_eq!(signed.effective_at, d(2024, 7, 31));
    assert_eq!(
        app.client(client.client_id).await.cancellation.effective_at,
        Some(d(2024, 7, 31))
    );
    assert_eq!(
        app.notifier.templates(),
        vec!["cancellation_requested", "cancellation_signed"]
    );

    let early = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(early.clients_waiting, 1);
    assert_eq!(early.clients_deactivated, 0);

    // Billing continues during the notice period.
    app.set_today(d(2024, 6, 2));
    let june = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(june.invoiced.len(), 1);

    app.set_today(d(2024, 7, 30));
    let day_before = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(day_before.clients_deactivated, 0);

    app.set_today(d(2024, 7, 31));
    let due = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(due.clients_deactivated, 1);
    assert_eq!(due.subscriptions_cancelled, 1);
    assert!(due.failures.is_empty());

    assert_eq!(
        app.client(client.client_id).await.status,
        ClientStatus::Inactive
    );
    let stored = app
        .store
        .get_subscription(subscription.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);

    app.set_today(d(2024, 8, 1));
    let august = app.engine.run_monthly_invoicing().await.unwrap();
    assert_eq!(august.clients_considered, 0);
}

#[tokio::test]
async fn sweep_cancels_mandate_and_is_safe_to_rerun() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;

    app.engine.start_direct_debit(client.client_id).await.unwrap();
    let activation: DirectDebitWebhook = serde_json::from_value(json!({
        "events": [{
            "id": "EV1",
            "resource_type": "mandates",
            "action": "active",
            "links": { "mandate": "MD1", "billing_request": "BRQ1" }
        }]
    }))
    .unwrap();
    app.engine
        .handle_direct_debit_webhook(activation)
        .await
        .unwrap();
    assert_eq!(
        app.client(client.client_id).await.payment_method,
        PaymentMethod::DirectDebit
    );

    let initiated = app
        .engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await
        .unwrap();
    app.engine
        .sign_cancellation(&initiated.token, signer())
        .await
        .unwrap();

    app.set_today(d(2024, 7, 31));
    let first = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(first.clients_deactivated, 1);
    assert_eq!(first.mandates_cancelled, 1);
    assert!(first.failures.is_empty());

    let mandate = app
        .store
        .get_mandate_for_client(client.client_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mandate.status, MandateStatus::Cancelled);
    assert_eq!(*app.direct_debit.cancelled.lock().unwrap(), vec!["MD1"]);

    let requests = app.store.list_cancellations(client.client_id).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].processed);

    let stored = app.client(client.client_id).await;
    assert_eq!(stored.status, ClientStatus::Inactive);
    assert_eq!(stored.payment_method, PaymentMethod::BankTransfer);

    let second = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(second.clients_deactivated, 0);
    assert_eq!(second.subscriptions_cancelled, 0);
    assert_eq!(second.mandates_cancelled, 0);
    assert!(second.failures.is_empty());
    assert_eq!(app.direct_debit.cancelled.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unsigned_cancellation_is_never_swept() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    app.engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await
        .unwrap();

    app.set_today(d(2024, 9, 1));
    let summary = app.engine.run_cancellation_sweep().await.unwrap();

    assert_eq!(summary.clients_waiting, 1);
    assert_eq!(summary.clients_deactivated, 0);
    assert_eq!(
        app.client(client.client_id).await.status,
        ClientStatus::PendingCancellation
    );
}

#[tokio::test]
async fn second_signature_is_rejected() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    let initiated = app
        .engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await
        .unwrap();

    app.engine
        .sign_cancellation(&initiated.token, signer())
        .await
        .unwrap();

    app.set_today(d(2024, 6, 10));
    let again = app
        .engine
        .sign_cancellation(&initiated.token, signer())
        .await;
    assert!(matches!(again, Err(BillingError::Conflict(_))));

    let context = app
        .engine
        .cancellation_context(&initiated.token)
        .await
        .unwrap();
    assert_eq!(context.effective_at, d(2024, 7, 31));
}

#[tokio::test]
async fn unknown_token_is_not_found() {
    let app = TestApp::new(d(2024, 5, 15));

    let result = app.engine.cancellation_context("no-such-token").await;

    assert!(matches!(result, Err(BillingError::NotFound { .. })));
}

#[tokio::test]
async fn only_active_clients_can_start_a_full_cancellation() {
    let app = TestApp::new(d(2024, 5, 15));
    let prospect = app
        .seed_client(client_input("LU", None, ClientStatus::Prospect))
        .await;
    let result = app
        .engine
        .initiate_cancellation(prospect.client_id, full_cancellation())
        .await;
    assert!(matches!(
        result,
        Err(BillingError::IllegalTransition { .. })
    ));

    let client = app.domestic_client().await;
    app.engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await
        .unwrap();
    let repeated = app
        .engine
        .initiate_cancellation(client.client_id, full_cancellation())
        .await;
    assert!(matches!(
        repeated,
        Err(BillingError::IllegalTransition { .. })
    ));
}

#[tokio::test]
async fn service_cancellation_pauses_then_cancels_one_subscription() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    let hosting = app
        .seed_subscription(client.client_id, dec!(100), d(2024, 4, 1))
        .await;
    let kept = app
        .seed_subscription(client.client_id, dec!(40), d(2024, 4, 1))
        .await;

    let initiated = app
        .engine
        .initiate_cancellation(
            client.client_id,
            InitiateCancellation {
                cancel_type: CancelType::Service,
                subscription_id: Some(hosting.subscription_id),
                reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(
        app.client(client.client_id).await.status,
        ClientStatus::Active
    );

    let context = app
        .engine
        .sign_cancellation(&initiated.token, signer())
        .await
        .unwrap();
    assert_eq!(
        context.service.map(|s| s.subscription_id),
        Some(hosting.subscription_id)
    );

    let paused = app
        .store
        .get_subscription(hosting.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paused.status, SubscriptionStatus::Paused);
    assert_eq!(paused.cancelled_at, Some(d(2024, 7, 31)));

    app.set_today(d(2024, 7, 31));
    let summary = app.engine.run_cancellation_sweep().await.unwrap();
    assert_eq!(summary.subscriptions_cancelled, 1);
    assert_eq!(summary.clients_deactivated, 0);

    let cancelled = app
        .store
        .get_subscription(hosting.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    let untouched = app
        .store
        .get_subscription(kept.subscription_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, SubscriptionStatus::Active);
    assert_eq!(
        app.client(client.client_id).await.status,
        ClientStatus::Active
    );
}

#[tokio::test]
async fn service_cancellation_requires_an_owned_subscription() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;
    let other = app.french_client().await;
    let foreign = app
        .seed_subscription(other.client_id, dec!(100), d(2024, 4, 1))
        .await;

    let missing = app
        .engine
        .initiate_cancellation(
            client.client_id,
            InitiateCancellation {
                cancel_type: CancelType::Service,
                subscription_id: None,
                reason: None,
            },
        )
        .await;
    assert!(matches!(missing, Err(BillingError::Validation(_))));

    let not_owned = app
        .engine
        .initiate_cancellation(
            client.client_id,
            InitiateCancellation {
                cancel_type: CancelType::Service,
                subscription_id: Some(foreign.subscription_id),
                reason: None,
            },
        )
        .await;
    assert!(matches!(not_owned, Err(BillingError::NotFound { .. })));
}
