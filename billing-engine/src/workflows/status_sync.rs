//! Pulls invoice status from the accounting ledger.

use serde::Serialize;

use super::engine::Engine;
use super::EntityFailure;
use crate::error::{BillingError, Result};
use crate::models::{Invoice, InvoiceStatus};
use crate::services::metrics::{record_error, record_transition};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failures: Vec<EntityFailure>,
}

impl Engine {
    /// Refresh every open invoice from the ledger.
    ///
    /// A status the ledger reports that has no local meaning is a failure for
    /// that invoice; the stored status stays as it was.
    #[tracing::instrument(skip(self))]
    pub async fn sync_invoice_statuses(&self) -> Result<SyncSummary> {
        let invoices = self.store.list_open_invoices().await?;
        let mut summary = SyncSummary {
            checked: invoices.len(),
            ..SyncSummary::default()
        };

        for invoice in invoices {
            let invoice_id = invoice.invoice_id;
            match self.sync_invoice(invoice).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e) => {
                    tracing::warn!(invoice_id = %invoice_id, error = %e, "Invoice status sync failed");
                    record_error(e.kind(), "sync_invoice_status");
                    summary.failures.push(EntityFailure::new(invoice_id, &e));
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            updated = summary.updated,
            failures = summary.failures.len(),
            "Invoice status sync finished"
        );
        Ok(summary)
    }

    async fn sync_invoice(&self, invoice: Invoice) -> Result<bool> {
        let remote = self
            .critical("get_invoice", || {
                self.collaborators.ledger.get_invoice(&invoice.external_id)
            })
            .await?;
        let status = InvoiceStatus::from_ledger(&remote.status).ok_or_else(|| {
            BillingError::Validation(format!(
                "ledger reported unknown invoice status {:?}",
                remote.status
            ))
        })?;
        if status == invoice.status {
            return Ok(false);
        }

        let mut updated = invoice.clone();
        updated.status = status;
        if status == InvoiceStatus::Paid && updated.paid_at.is_none() {
            updated.paid_at = Some(self.today());
        }
        updated.updated_utc = self.now();
        if !self
            .store
            .update_invoice_status(&updated, invoice.status)
            .await?
        {
            return Err(BillingError::Conflict(format!(
                "invoice {} changed during sync",
                invoice.invoice_id
            )));
        }
        record_transition("invoice", status.as_str());
        Ok(true)
    }
}
