use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::BillingError;
use crate::models::{CancelType, ChargeSource, Client, Invoice, OneTimeCharge};
use crate::services::direct_debit::AuthorizationFlow;
use crate::startup::AppState;
use crate::workflows::{
    AdminCancellation, CancellationInitiated, CommissionCharged, Confirmation,
    InitiateCancellation, ManualCharge, NewSubscription, SubscriptionAdded,
};

pub(crate) fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

pub(crate) fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_not_be_negative"))
    }
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Client>, AppError> {
    let client = state
        .engine
        .store()
        .get_client(client_id)
        .await?
        .ok_or_else(|| BillingError::not_found("client", client_id))?;
    Ok(Json(client))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let store = state.engine.store();
    if store.get_client(client_id).await?.is_none() {
        return Err(BillingError::not_found("client", client_id).into());
    }
    let mut invoices = store.list_invoices(client_id).await?;
    invoices.sort_by(|a, b| b.period_start.cmp(&a.period_start));
    Ok(Json(invoices))
}

#[tracing::instrument(skip(state))]
pub async fn confirm_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Confirmation>, AppError> {
    let confirmation = state.engine.confirm_client(client_id).await?;
    Ok(Json(confirmation))
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiateCancellationRequest {
    pub cancel_type: CancelType,
    pub subscription_id: Option<Uuid>,
    #[validate(length(max = 2000, message = "Reason is too long"))]
    pub reason: Option<String>,
}

#[tracing::instrument(skip(state, request))]
pub async fn initiate_cancellation(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<InitiateCancellationRequest>,
) -> Result<(StatusCode, Json<CancellationInitiated>), AppError> {
    request.validate()?;

    let initiated = state
        .engine
        .initiate_cancellation(
            client_id,
            InitiateCancellation {
                cancel_type: request.cancel_type,
                subscription_id: request.subscription_id,
                reason: request.reason,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddSubscriptionRequest {
    #[validate(length(min = 1, message = "Service type cannot be empty"))]
    pub service_type: String,
    #[validate(length(min = 1, message = "Description cannot be empty"))]
    pub description: String,
    #[validate(custom(function = "non_negative"))]
    pub monthly_amount: Decimal,
    #[validate(custom(function = "non_negative"))]
    pub tax_rate_override: Option<Decimal>,
    pub started_at: Option<NaiveDate>,
}

#[tracing::instrument(skip(state, request))]
pub async fn add_subscription(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<AddSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionAdded>), AppError> {
    request.validate()?;

    let added = state
        .engine
        .add_subscription(
            client_id,
            NewSubscription {
                service_type: request.service_type,
                description: request.description,
                monthly_amount: request.monthly_amount,
                tax_rate_override: request.tax_rate_override,
                started_at: request.started_at,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(added)))
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionParams {
    /// Defaults to today.
    pub on: Option<NaiveDate>,
}

#[tracing::instrument(skip(state))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path((client_id, subscription_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<CancelSubscriptionParams>,
) -> Result<Json<AdminCancellation>, AppError> {
    let cancelled = state
        .engine
        .cancel_subscription(client_id, subscription_id, params.on)
        .await?;
    Ok(Json(cancelled))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddChargeRequest {
    #[validate(length(min = 1, message = "Description cannot be empty"))]
    pub description: String,
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(custom(function = "non_negative"))]
    pub tax_rate_override: Option<Decimal>,
    #[serde(default)]
    pub source: Option<ChargeSource>,
}

#[tracing::instrument(skip(state, request))]
pub async fn add_charge(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<AddChargeRequest>,
) -> Result<(StatusCode, Json<OneTimeCharge>), AppError> {
    request.validate()?;

    let charge = state
        .engine
        .add_charge(
            client_id,
            ManualCharge {
                description: request.description,
                amount: request.amount,
                tax_rate_override: request.tax_rate_override,
                source: request.source.unwrap_or(ChargeSource::Manual),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(charge)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TurnoverReport {
    #[validate(custom(function = "non_negative"))]
    pub turnover: Decimal,
    /// Label of the reported period, e.g. `2024-05`.
    #[validate(length(min = 1, max = 32, message = "Period must be 1-32 characters"))]
    pub period: String,
}

#[tracing::instrument(skip(state, request))]
pub async fn report_turnover(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<TurnoverReport>,
) -> Result<(StatusCode, Json<CommissionCharged>), AppError> {
    request.validate()?;

    let charged = state
        .engine
        .report_turnover(client_id, request.turnover, &request.period)
        .await?;
    let status = if charged.charge.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(charged)))
}

#[tracing::instrument(skip(state))]
pub async fn start_direct_debit(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> Result<(StatusCode, Json<AuthorizationFlow>), AppError> {
    let flow = state.engine.start_direct_debit(client_id).await?;
    Ok((StatusCode::CREATED, Json(flow)))
}
