//! Cancellation request model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Whether the whole client account or a single service is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelType {
    Client,
    Service,
}

impl CancelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelType::Client => "client",
            CancelType::Service => "service",
        }
    }
}

impl FromStr for CancelType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(CancelType::Client),
            "service" => Ok(CancelType::Service),
            other => Err(UnknownVariant::new("cancel type", other)),
        }
    }
}

/// Who signed a cancellation, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerIdentity {
    pub name: String,
    pub email: String,
    pub ip_address: Option<String>,
}

/// Token-authenticated cancellation awaiting or bearing a signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub request_id: Uuid,
    pub client_id: Uuid,
    /// Present only for `CancelType::Service`.
    pub subscription_id: Option<Uuid>,
    pub cancel_type: CancelType,
    /// Single-use opaque token handed to the signer.
    pub token: String,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
    pub signer: Option<SignerIdentity>,
    /// Provisional until signed, then recomputed from the signature date.
    pub effective_at: NaiveDate,
    pub processed: bool,
}

impl CancellationRequest {
    pub fn is_signed(&self) -> bool {
        self.signed_at.is_some()
    }

    /// Unresolved requests block a second request of the same type.
    pub fn is_unresolved(&self) -> bool {
        !self.processed
    }
}
