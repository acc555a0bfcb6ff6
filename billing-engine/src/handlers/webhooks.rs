//! Collaborator webhooks, authenticated by an HMAC-SHA256 of the raw body.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use service_core::error::AppError;
use service_core::utils::signature::verify_payload;

use crate::services::direct_debit::DirectDebitWebhook;
use crate::services::signing::SigningEvent;
use crate::startup::AppState;
use crate::workflows::DirectDebitSummary;

pub const SIGNATURE_HEADER: &str = "webhook-signature";

fn verified_body<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: &str,
    secret: &Secret<String>,
) -> Result<T, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing webhook signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid =
        verify_payload(secret.expose_secret(), body.as_bytes(), signature).map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;
    if !is_valid {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })
}

pub async fn signing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, AppError> {
    let event: SigningEvent = verified_body(&headers, &body, &state.secrets.signing)?;
    let outcome = state.engine.handle_signing_event(event).await?;
    Ok(Json(json!({ "outcome": outcome })))
}

/// 503 when any event failed, so the processor redelivers the batch; events
/// already applied come back as duplicates.
pub async fn direct_debit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<DirectDebitSummary>), AppError> {
    let webhook: DirectDebitWebhook =
        verified_body(&headers, &body, &state.secrets.direct_debit)?;
    let summary = state.engine.handle_direct_debit_webhook(webhook).await?;
    let status = if summary.failures.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(summary)))
}
