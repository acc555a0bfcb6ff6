use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use super::clients::non_negative;
use crate::models::{OrderLine, SupplierInvoiceCheck, SupplierOrder};
use crate::startup::AppState;
use crate::workflows::{NewSupplierOrder, SupplierInvoice};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub client_id: Uuid,
    #[validate(length(equal = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: String,
    #[validate(length(min = 1, message = "An order needs at least one line"))]
    pub lines: Vec<OrderLine>,
}

#[tracing::instrument(skip(state, request))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<SupplierOrder>), AppError> {
    request.validate()?;

    let order = state
        .engine
        .create_supplier_order(NewSupplierOrder {
            client_id: request.client_id,
            currency: request.currency,
            lines: request.lines,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SupplierInvoiceRequest {
    #[validate(length(min = 1, message = "Supplier reference cannot be empty"))]
    pub supplier_reference: String,
    #[validate(custom(function = "non_negative"))]
    pub total: Decimal,
    #[validate(length(equal = 3, message = "Currency must be an ISO 4217 code"))]
    pub currency: String,
}

/// Always 200 with the recorded check; a mismatch is an outcome, not an error.
#[tracing::instrument(skip(state, request))]
pub async fn reconcile_supplier_invoice(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<SupplierInvoiceRequest>,
) -> Result<Json<SupplierInvoiceCheck>, AppError> {
    request.validate()?;

    let check = state
        .engine
        .reconcile_supplier_invoice(
            order_id,
            SupplierInvoice {
                supplier_reference: request.supplier_reference,
                total: request.total,
                currency: request.currency,
            },
        )
        .await?;
    Ok(Json(check))
}
