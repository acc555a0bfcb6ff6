//! Supplier order and supplier invoice check models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::UnknownVariant;

/// Supplier price for a quantity band. `max_quantity = None` is open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTier {
    pub min_quantity: u32,
    pub max_quantity: Option<u32>,
    pub supplier_cost: Decimal,
}

impl PricingTier {
    pub fn contains(&self, quantity: u32) -> bool {
        quantity >= self.min_quantity && self.max_quantity.map_or(true, |max| quantity <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product: String,
    pub quantity: u32,
    /// Unit cost used when no tier contains the quantity.
    pub base_cost: Decimal,
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
}

/// Where a supplier order is in its fulfilment flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    AwaitingSupplierInvoice,
    SupplierInvoiceMatched,
    ManualReview,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::AwaitingSupplierInvoice => "awaiting_supplier_invoice",
            OrderState::SupplierInvoiceMatched => "supplier_invoice_matched",
            OrderState::ManualReview => "manual_review",
        }
    }
}

impl FromStr for OrderState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_supplier_invoice" => Ok(OrderState::AwaitingSupplierInvoice),
            "supplier_invoice_matched" => Ok(OrderState::SupplierInvoiceMatched),
            "manual_review" => Ok(OrderState::ManualReview),
            other => Err(UnknownVariant::new("order state", other)),
        }
    }
}

/// Goods or services bought from a supplier on behalf of a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierOrder {
    pub order_id: Uuid,
    pub client_id: Uuid,
    pub currency: String,
    pub lines: Vec<OrderLine>,
    pub state: OrderState,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Why a supplier invoice did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MismatchReason {
    TotalDelta {
        expected: Decimal,
        claimed: Decimal,
        delta_percent: Decimal,
    },
    CurrencyMismatch {
        expected: String,
        claimed: String,
    },
    /// Expected cost is zero but the supplier claims a non-zero total.
    NoExpectedCost { claimed: Decimal },
}

/// Recorded outcome of matching one supplier invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierInvoiceCheck {
    pub check_id: Uuid,
    pub order_id: Uuid,
    pub supplier_reference: String,
    pub claimed_total: Decimal,
    pub claimed_currency: String,
    pub expected_total: Decimal,
    pub tolerance_percent: Decimal,
    pub matched: bool,
    pub mismatch_reasons: Vec<MismatchReason>,
    pub checked_utc: DateTime<Utc>,
}
