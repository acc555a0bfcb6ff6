mod common;

use billing_engine::error::BillingError;
use billing_engine::models::{MismatchReason, OrderLine, OrderState, PricingTier};
use billing_engine::services::Store;
use billing_engine::workflows::{NewSupplierOrder, SupplierInvoice};
use common::{d, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// 100 flyers at the 50+ tier (1.50) plus 10 posters at 5.00: 200.00 expected.
fn order_lines() -> Vec<OrderLine> {
    vec![
        OrderLine {
            product: "Flyer A5".to_string(),
            quantity: 100,
            base_cost: dec!(2.00),
            tiers: vec![
                PricingTier {
                    min_quantity: 1,
                    max_quantity: Some(49),
                    supplier_cost: dec!(2.00),
                },
                PricingTier {
                    min_quantity: 50,
                    max_quantity: None,
                    supplier_cost: dec!(1.50),
                },
            ],
        },
        OrderLine {
            product: "Poster A2".to_string(),
            quantity: 10,
            base_cost: dec!(5.00),
            tiers: Vec::new(),
        },
    ]
}

fn supplier_invoice(reference: &str, total: Decimal, currency: &str) -> SupplierInvoice {
    SupplierInvoice {
        supplier_reference: reference.to_string(),
        total,
        currency: currency.to_string(),
    }
}

async fn order_for(app: &TestApp) -> Uuid {
    let client = app.domestic_client().await;
    app.engine
        .create_supplier_order(NewSupplierOrder {
            client_id: client.client_id,
            currency: "eur".to_string(),
            lines: order_lines(),
        })
        .await
        .unwrap()
        .order_id
}

#[tokio::test]
async fn invoice_within_tolerance_matches_order() {
    let app = TestApp::new(d(2024, 5, 15));
    let order_id = order_for(&app).await;

    let check = app
        .engine
        .reconcile_supplier_invoice(order_id, supplier_invoice("SUP-1", dec!(205), "EUR"))
        .await
        .unwrap();

    assert!(check.matched);
    assert_eq!(check.expected_total, dec!(200));
    assert!(check.mismatch_reasons.is_empty());

    let order = app.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::SupplierInvoiceMatched);
    assert_eq!(order.currency, "EUR");

    let again = app
        .engine
        .reconcile_supplier_invoice(order_id, supplier_invoice("SUP-2", dec!(200), "EUR"))
        .await;
    assert!(matches!(again, Err(BillingError::Conflict(_))));
}

#[tokio::test]
async fn mismatch_goes_to_manual_review_until_corrected() {
    let app = TestApp::new(d(2024, 5, 15));
    let order_id = order_for(&app).await;

    let rejected = app
        .engine
        .reconcile_supplier_invoice(order_id, supplier_invoice("SUP-1", dec!(220), "EUR"))
        .await
        .unwrap();
    assert!(!rejected.matched);
    assert!(matches!(
        rejected.mismatch_reasons.as_slice(),
        [MismatchReason::TotalDelta { .. }]
    ));
    assert_eq!(
        app.store.get_order(order_id).await.unwrap().unwrap().state,
        OrderState::ManualReview
    );

    let corrected = app
        .engine
        .reconcile_supplier_invoice(order_id, supplier_invoice("SUP-1b", dec!(198), "EUR"))
        .await
        .unwrap();
    assert!(corrected.matched);
    assert_eq!(
        app.store.get_order(order_id).await.unwrap().unwrap().state,
        OrderState::SupplierInvoiceMatched
    );
    assert_eq!(
        app.store.list_supplier_checks(order_id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn currency_mismatch_is_never_matched() {
    let app = TestApp::new(d(2024, 5, 15));
    let order_id = order_for(&app).await;

    let check = app
        .engine
        .reconcile_supplier_invoice(order_id, supplier_invoice("SUP-1", dec!(200), "USD"))
        .await
        .unwrap();

    assert!(!check.matched);
    assert!(matches!(
        check.mismatch_reasons.as_slice(),
        [MismatchReason::CurrencyMismatch { .. }]
    ));
}

#[tokio::test]
async fn orders_need_lines_and_a_known_client() {
    let app = TestApp::new(d(2024, 5, 15));
    let client = app.domestic_client().await;

    let empty = app
        .engine
        .create_supplier_order(NewSupplierOrder {
            client_id: client.client_id,
            currency: "EUR".to_string(),
            lines: Vec::new(),
        })
        .await;
    assert!(matches!(empty, Err(BillingError::Validation(_))));

    let unknown_client = app
        .engine
        .create_supplier_order(NewSupplierOrder {
            client_id: Uuid::new_v4(),
            currency: "EUR".to_string(),
            lines: order_lines(),
        })
        .await;
    assert!(matches!(
        unknown_client,
        Err(BillingError::NotFound { .. })
    ));

    let unknown_order = app
        .engine
        .reconcile_supplier_invoice(Uuid::new_v4(), supplier_invoice("SUP-9", dec!(1), "EUR"))
        .await;
    assert!(matches!(
        unknown_order,
        Err(BillingError::NotFound { .. })
    ));
}
