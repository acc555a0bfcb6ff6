//! Batch triggers for external schedulers.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::startup::AppState;
use crate::workflows::{RunSummary, SweepSummary, SyncSummary};

#[tracing::instrument(skip(state))]
pub async fn monthly_invoicing(
    State(state): State<AppState>,
) -> Result<Json<RunSummary>, AppError> {
    Ok(Json(state.engine.run_monthly_invoicing().await?))
}

#[tracing::instrument(skip(state))]
pub async fn cancellation_sweep(
    State(state): State<AppState>,
) -> Result<Json<SweepSummary>, AppError> {
    Ok(Json(state.engine.run_cancellation_sweep().await?))
}

#[tracing::instrument(skip(state))]
pub async fn invoice_status_sync(
    State(state): State<AppState>,
) -> Result<Json<SyncSummary>, AppError> {
    Ok(Json(state.engine.sync_invoice_statuses().await?))
}
