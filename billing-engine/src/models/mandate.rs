//! Direct-debit mandate model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    PendingAuthorization,
    Active,
    Cancelled,
    Failed,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateStatus::PendingAuthorization => "pending_authorization",
            MandateStatus::Active => "active",
            MandateStatus::Cancelled => "cancelled",
            MandateStatus::Failed => "failed",
        }
    }
}

impl FromStr for MandateStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_authorization" => Ok(MandateStatus::PendingAuthorization),
            "active" => Ok(MandateStatus::Active),
            "cancelled" => Ok(MandateStatus::Cancelled),
            "failed" => Ok(MandateStatus::Failed),
            other => Err(UnknownVariant::new("mandate status", other)),
        }
    }
}

/// Standing direct-debit authorization of a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: Uuid,
    pub client_id: Uuid,
    /// Processor's mandate id, known once the authorization completes.
    pub external_id: Option<String>,
    /// Processor's billing request id for the hosted authorization flow.
    pub billing_request_id: Option<String>,
    pub status: MandateStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}
