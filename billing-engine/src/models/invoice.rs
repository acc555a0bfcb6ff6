//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;
use crate::rules::tax::TaxMode;

/// Local invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Map the accounting ledger's status vocabulary onto the local enum.
    ///
    /// `viewed` and `partially_paid` are still awaiting settlement, so both
    /// count as `sent`. Unknown values yield `None`.
    pub fn from_ledger(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" | "viewed" | "partially_paid" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            "void" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Paid and cancelled invoices never change again.
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(UnknownVariant::new("invoice status", other)),
        }
    }
}

/// Line as submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub name: String,
    pub rate: Decimal,
    pub quantity: Decimal,
    pub tax_percentage: Decimal,
    pub subscription_id: Option<Uuid>,
    pub charge_id: Option<Uuid>,
}

/// Invoice issued to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub client_id: Uuid,
    pub external_id: String,
    pub external_number: Option<String>,
    pub status: InvoiceStatus,
    pub tax_mode: TaxMode,
    /// Client-level rate applied to lines without an override.
    pub vat_rate: Decimal,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub paid_at: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// State of the per-client, per-month invoicing idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicingRecordStatus {
    /// A run has taken the period and is working on it.
    Claimed,
    /// The period is done: invoiced, or nothing was due.
    Completed,
    /// The last attempt failed; the next run may claim it again.
    Failed,
}

impl InvoicingRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoicingRecordStatus::Claimed => "claimed",
            InvoicingRecordStatus::Completed => "completed",
            InvoicingRecordStatus::Failed => "failed",
        }
    }
}

impl FromStr for InvoicingRecordStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claimed" => Ok(InvoicingRecordStatus::Claimed),
            "completed" => Ok(InvoicingRecordStatus::Completed),
            "failed" => Ok(InvoicingRecordStatus::Failed),
            other => Err(UnknownVariant::new("invoicing record status", other)),
        }
    }
}

/// One record per client per calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoicingRecord {
    pub client_id: Uuid,
    pub period_start: NaiveDate,
    pub status: InvoicingRecordStatus,
    pub invoice_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub claimed_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}
