//! Quote and project models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{ClientStatus, CommissionConfig, CreateClient, PaymentMethod, UnknownVariant};

/// Quote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    SentForSignature,
    Signed,
    Accepted,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::SentForSignature => "sent_for_signature",
            QuoteStatus::Signed => "signed",
            QuoteStatus::Accepted => "accepted",
        }
    }
}

impl FromStr for QuoteStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuoteStatus::Draft),
            "sent_for_signature" => Ok(QuoteStatus::SentForSignature),
            "signed" => Ok(QuoteStatus::Signed),
            "accepted" => Ok(QuoteStatus::Accepted),
            other => Err(UnknownVariant::new("quote status", other)),
        }
    }
}

/// Prospect details captured on a quote before a client exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub brand: String,
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
    pub country: String,
    pub vat_number: Option<String>,
    pub is_business: bool,
    pub payment_method: PaymentMethod,
    pub commission: Option<CommissionConfig>,
}

impl ClientProfile {
    pub fn into_create_client(self, status: ClientStatus) -> CreateClient {
        CreateClient {
            brand: self.brand,
            company_name: self.company_name,
            contact_name: self.contact_name,
            email: self.email,
            country: self.country,
            vat_number: self.vat_number,
            is_business: self.is_business,
            status,
            payment_method: self.payment_method,
            commission: self.commission,
        }
    }
}

/// Quote line; recurring lines become subscriptions on confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub description: String,
    pub service_type: String,
    /// Monthly amount for recurring lines, total for one-off lines.
    pub amount: Decimal,
    pub recurring: bool,
    #[serde(default)]
    pub tax_rate_override: Option<Decimal>,
}

/// Commercial offer sent for signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: Uuid,
    pub quote_number: String,
    /// Set once the signature created or matched a client.
    pub client_id: Option<Uuid>,
    pub profile: ClientProfile,
    pub lines: Vec<QuoteLine>,
    pub status: QuoteStatus,
    pub signing_session: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Onboarding task materialized for a confirmed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTask {
    pub title: String,
    pub done: bool,
}

/// Delivery project created on confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: Uuid,
    pub client_id: Uuid,
    pub quote_id: Uuid,
    pub name: String,
    pub tasks: Vec<ProjectTask>,
    pub created_utc: DateTime<Utc>,
}
