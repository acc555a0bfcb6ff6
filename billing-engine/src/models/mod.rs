//! Domain models for billing-engine.

mod cancellation;
mod charge;
mod client;
mod commission;
mod invoice;
mod mandate;
mod order;
mod quote;
mod subscription;

use std::fmt;

pub use cancellation::{CancelType, CancellationRequest, SignerIdentity};
pub use charge::{ChargeSource, CreateCharge, OneTimeCharge};
pub use client::{Client, ClientCancellation, ClientStatus, CreateClient, PaymentMethod};
pub use commission::CommissionConfig;
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus, InvoicingRecord, InvoicingRecordStatus};
pub use mandate::{Mandate, MandateStatus};
pub use order::{
    MismatchReason, OrderLine, OrderState, PricingTier, SupplierInvoiceCheck, SupplierOrder,
};
pub use quote::{ClientProfile, Project, ProjectTask, Quote, QuoteLine, QuoteStatus};
pub use subscription::{CreateSubscription, Subscription, SubscriptionStatus};

/// A stored enum value that no variant recognises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}
