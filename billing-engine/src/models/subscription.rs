//! Subscription model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    /// Cancellation signed; billing continues until `cancelled_at`.
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the monthly amount is still invoiced.
    pub fn is_billable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Paused)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(UnknownVariant::new("subscription status", other)),
        }
    }
}

/// Recurring service line of a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub client_id: Uuid,
    pub service_type: String,
    pub description: String,
    /// Zero means usage-billed elsewhere; never invoiced as a recurring line.
    pub monthly_amount: Decimal,
    /// Overrides the client's resolved VAT rate for this line.
    pub tax_rate_override: Option<Decimal>,
    pub status: SubscriptionStatus,
    pub started_at: NaiveDate,
    pub cancelled_at: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub client_id: Uuid,
    pub service_type: String,
    pub description: String,
    pub monthly_amount: Decimal,
    pub tax_rate_override: Option<Decimal>,
    pub started_at: NaiveDate,
}

impl Subscription {
    pub fn new(input: CreateSubscription, now: DateTime<Utc>) -> Self {
        Self {
            subscription_id: Uuid::new_v4(),
            client_id: input.client_id,
            service_type: input.service_type,
            description: input.description,
            monthly_amount: input.monthly_amount,
            tax_rate_override: input.tax_rate_override,
            status: SubscriptionStatus::Active,
            started_at: input.started_at,
            cancelled_at: None,
            created_utc: now,
            updated_utc: now,
        }
    }
}
