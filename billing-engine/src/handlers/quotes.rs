use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::models::{ClientProfile, CommissionConfig, PaymentMethod, Quote, QuoteLine};
use crate::services::signing::SigningSession;
use crate::startup::AppState;
use crate::workflows::NewQuote;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuoteRequest {
    #[validate(length(min = 1, max = 64, message = "Quote number must be 1-64 characters"))]
    pub quote_number: Option<String>,
    pub client_id: Option<Uuid>,
    #[validate(nested)]
    pub profile: ProfileRequest,
    #[validate(length(min = 1, message = "A quote needs at least one line"))]
    pub lines: Vec<QuoteLine>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileRequest {
    #[validate(length(min = 1, message = "Brand cannot be empty"))]
    pub brand: String,
    #[validate(length(min = 1, message = "Company name cannot be empty"))]
    pub company_name: String,
    #[validate(length(min = 1, message = "Contact name cannot be empty"))]
    pub contact_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(equal = 2, message = "Country must be an ISO 3166 alpha-2 code"))]
    pub country: String,
    pub vat_number: Option<String>,
    #[serde(default)]
    pub is_business: bool,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub commission: Option<CommissionConfig>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::BankTransfer
}

impl From<ProfileRequest> for ClientProfile {
    fn from(p: ProfileRequest) -> Self {
        ClientProfile {
            brand: p.brand,
            company_name: p.company_name,
            contact_name: p.contact_name,
            email: p.email,
            country: p.country.to_ascii_uppercase(),
            vat_number: p.vat_number.filter(|v| !v.trim().is_empty()),
            is_business: p.is_business,
            payment_method: p.payment_method,
            commission: p.commission,
        }
    }
}

#[tracing::instrument(skip(state, request))]
pub async fn create_quote(
    State(state): State<AppState>,
    Json(request): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<Quote>), AppError> {
    request.validate()?;

    let quote = state
        .engine
        .create_quote(NewQuote {
            quote_number: request.quote_number,
            client_id: request.client_id,
            profile: request.profile.into(),
            lines: request.lines,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

#[tracing::instrument(skip(state))]
pub async fn send_quote(
    State(state): State<AppState>,
    Path(quote_number): Path<String>,
) -> Result<Json<SigningSession>, AppError> {
    let session = state.engine.send_quote_for_signature(&quote_number).await?;
    Ok(Json(session))
}
