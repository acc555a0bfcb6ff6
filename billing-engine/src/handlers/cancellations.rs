//! Token-authenticated cancellation pages.
//!
//! The token in the path is the only credential; it is never logged.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::middleware::forwarded_client_ip;
use validator::Validate;

use crate::models::SignerIdentity;
use crate::startup::AppState;
use crate::workflows::CancellationContext;

#[tracing::instrument(skip_all)]
pub async fn get_cancellation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<CancellationContext>, AppError> {
    let context = state.engine.cancellation_context(&token).await?;
    Ok(Json(context))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignCancellationRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[tracing::instrument(skip_all)]
pub async fn sign_cancellation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SignCancellationRequest>,
) -> Result<Json<CancellationContext>, AppError> {
    request.validate()?;

    let signer = SignerIdentity {
        name: request.name.trim().to_string(),
        email: request.email.trim().to_string(),
        ip_address: forwarded_client_ip(&headers),
    };
    let context = state.engine.sign_cancellation(&token, signer).await?;
    Ok(Json(context))
}
