//! Workflows: rules applied against the store and collaborators.
//!
//! Each workflow is an `impl Engine` block. Reads of "now" go through the
//! engine's clock.

mod cancellation;
mod charges;
mod confirmation;
mod direct_debit;
mod engine;
mod invoicing;
mod reconciliation;
mod status_sync;
mod sweep;

use serde::Serialize;

use crate::error::BillingError;

pub use cancellation::{
    CancellationContext, CancellationInitiated, CancelledService, InitiateCancellation,
};
pub use charges::{
    AdminCancellation, CommissionCharged, ManualCharge, NewSubscription, SubscriptionAdded,
};
pub use confirmation::{Confirmation, NewQuote};
pub use direct_debit::DirectDebitSummary;
pub use engine::{Collaborators, Engine, EngineSettings};
pub use invoicing::{ClientOutcome, RunSummary};
pub use reconciliation::{NewSupplierOrder, SupplierInvoice};
pub use status_sync::SyncSummary;
pub use sweep::SweepSummary;

/// How a webhook delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// Event id seen before; nothing done.
    Duplicate,
    /// Event type or target not relevant; acknowledged.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Per-entity failure collected by a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub kind: &'static str,
    pub message: String,
}

impl EntityFailure {
    pub fn new(entity_id: impl ToString, err: &BillingError) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
