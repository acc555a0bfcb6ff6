//! Client account model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{CommissionConfig, UnknownVariant};

/// Client account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Prospect,
    PendingConfirmation,
    Active,
    PendingCancellation,
    Inactive,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Prospect => "prospect",
            ClientStatus::PendingConfirmation => "pending_confirmation",
            ClientStatus::Active => "active",
            ClientStatus::PendingCancellation => "pending_cancellation",
            ClientStatus::Inactive => "inactive",
        }
    }

    /// Whether recurring billing is live for a client in this state.
    ///
    /// A client serving its notice period is still invoiced until the
    /// cancellation takes effect.
    pub fn is_billable(&self) -> bool {
        matches!(
            self,
            ClientStatus::Active | ClientStatus::PendingCancellation
        )
    }
}

impl FromStr for ClientStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prospect" => Ok(ClientStatus::Prospect),
            "pending_confirmation" => Ok(ClientStatus::PendingConfirmation),
            "active" => Ok(ClientStatus::Active),
            "pending_cancellation" => Ok(ClientStatus::PendingCancellation),
            "inactive" => Ok(ClientStatus::Inactive),
            other => Err(UnknownVariant::new("client status", other)),
        }
    }
}

/// How the client settles invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    DirectDebit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::DirectDebit => "direct_debit",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "direct_debit" => Ok(PaymentMethod::DirectDebit),
            other => Err(UnknownVariant::new("payment method", other)),
        }
    }
}

/// Cancellation metadata mirrored on the client from its open full cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCancellation {
    pub requested_at: Option<DateTime<Utc>>,
    pub effective_at: Option<NaiveDate>,
    pub signed_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Client account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: Uuid,
    pub brand: String,
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
    /// ISO 3166 alpha-2, upper case.
    pub country: String,
    pub vat_number: Option<String>,
    pub is_business: bool,
    pub status: ClientStatus,
    pub cancellation: ClientCancellation,
    pub payment_method: PaymentMethod,
    pub commission: Option<CommissionConfig>,
    pub accounting_contact_id: Option<String>,
    /// Set when the VAT registry could not confirm a reverse-charge identifier.
    pub vat_review_required: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a client.
#[derive(Debug, Clone)]
pub struct CreateClient {
    pub brand: String,
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
    pub country: String,
    pub vat_number: Option<String>,
    pub is_business: bool,
    pub status: ClientStatus,
    pub payment_method: PaymentMethod,
    pub commission: Option<CommissionConfig>,
}

impl Client {
    pub fn new(input: CreateClient, now: DateTime<Utc>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            brand: input.brand,
            company_name: input.company_name,
            contact_name: input.contact_name,
            email: input.email,
            country: input.country.trim().to_ascii_uppercase(),
            vat_number: input.vat_number,
            is_business: input.is_business,
            status: input.status,
            cancellation: ClientCancellation::default(),
            payment_method: input.payment_method,
            commission: input.commission,
            accounting_contact_id: None,
            vat_review_required: false,
            created_utc: now,
            updated_utc: now,
        }
    }
}
