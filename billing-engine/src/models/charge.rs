//! One-time charge model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// What produced a one-time charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeSource {
    Proration,
    Manual,
    Usage,
    Commission,
    Quote,
}

impl ChargeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeSource::Proration => "proration",
            ChargeSource::Manual => "manual",
            ChargeSource::Usage => "usage",
            ChargeSource::Commission => "commission",
            ChargeSource::Quote => "quote",
        }
    }
}

impl FromStr for ChargeSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proration" => Ok(ChargeSource::Proration),
            "manual" => Ok(ChargeSource::Manual),
            "usage" => Ok(ChargeSource::Usage),
            "commission" => Ok(ChargeSource::Commission),
            "quote" => Ok(ChargeSource::Quote),
            other => Err(UnknownVariant::new("charge source", other)),
        }
    }
}

/// Charge billed once on the client's next invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeCharge {
    pub charge_id: Uuid,
    pub client_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub source: ChargeSource,
    pub description: String,
    pub amount: Decimal,
    pub tax_rate_override: Option<Decimal>,
    pub invoiced: bool,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a charge.
#[derive(Debug, Clone)]
pub struct CreateCharge {
    pub client_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub source: ChargeSource,
    pub description: String,
    pub amount: Decimal,
    pub tax_rate_override: Option<Decimal>,
}

impl OneTimeCharge {
    pub fn new(input: CreateCharge, now: DateTime<Utc>) -> Self {
        Self {
            charge_id: Uuid::new_v4(),
            client_id: input.client_id,
            subscription_id: input.subscription_id,
            source: input.source,
            description: input.description,
            amount: input.amount,
            tax_rate_override: input.tax_rate_override,
            invoiced: false,
            invoice_id: None,
            created_utc: now,
        }
    }
}
