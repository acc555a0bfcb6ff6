//! Direct-debit mandate setup and processor webhooks.

use serde::Serialize;
use uuid::Uuid;

use super::engine::{best_effort, Engine};
use super::{EntityFailure, WebhookOutcome};
use crate::error::{BillingError, Result};
use crate::models::{Client, ClientStatus, InvoiceStatus, Mandate, MandateStatus, PaymentMethod};
use crate::services::direct_debit::{
    AuthorizationFlow, DirectDebitEvent, DirectDebitWebhook, FlowRequest,
};
use crate::services::metrics::{record_error, record_transition, record_webhook_event};

const DIRECT_DEBIT_SOURCE: &str = "direct_debit";
const INVOICE_ID_KEY: &str = "invoice_id";

/// Per-batch result of a direct-debit webhook delivery.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectDebitSummary {
    pub processed: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub failures: Vec<EntityFailure>,
}

impl DirectDebitSummary {
    fn count(&mut self, outcome: WebhookOutcome) {
        match outcome {
            WebhookOutcome::Processed => self.processed += 1,
            WebhookOutcome::Duplicate => self.duplicates += 1,
            WebhookOutcome::Ignored => self.ignored += 1,
        }
    }
}

impl Engine {
    /// Start a hosted mandate authorization for the client.
    #[tracing::instrument(skip(self))]
    pub async fn start_direct_debit(&self, client_id: Uuid) -> Result<AuthorizationFlow> {
        let client = self.load_client(client_id).await?;
        if matches!(
            client.status,
            ClientStatus::Prospect | ClientStatus::Inactive
        ) {
            return Err(BillingError::IllegalTransition {
                entity: "client",
                from: client.status.as_str(),
                event: "direct_debit_requested",
            });
        }
        if let Some(existing) = self.store.get_mandate_for_client(client_id).await? {
            if existing.status == MandateStatus::Active {
                return Err(BillingError::Conflict(format!(
                    "client {} already has an active mandate",
                    client_id
                )));
            }
        }

        let request = FlowRequest {
            client_reference: client_id.to_string(),
            company_name: client.company_name.clone(),
            email: client.email.clone(),
            redirect_url: format!(
                "{}/clients/{}/direct-debit/complete",
                self.settings.public_base_url.trim_end_matches('/'),
                client_id
            ),
        };
        let flow = self
            .critical("create_flow", || {
                self.collaborators.direct_debit.create_flow(&request)
            })
            .await?;

        let now = self.now();
        let mandate = Mandate {
            mandate_id: Uuid::new_v4(),
            client_id,
            external_id: None,
            billing_request_id: Some(flow.billing_request_id.clone()),
            status: MandateStatus::PendingAuthorization,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_mandate(&mandate).await?;
        record_transition("mandate", mandate.status.as_str());

        tracing::info!(
            client_id = %client_id,
            billing_request_id = %flow.billing_request_id,
            "Direct-debit authorization started"
        );
        Ok(flow)
    }

    /// Apply a batch of processor events.
    ///
    /// Events are independent. A failed event is not marked processed, so a
    /// redelivery retries it while already-handled events come back as
    /// duplicates.
    #[tracing::instrument(skip(self, webhook), fields(events = webhook.events.len()))]
    pub async fn handle_direct_debit_webhook(
        &self,
        webhook: DirectDebitWebhook,
    ) -> Result<DirectDebitSummary> {
        let mut summary = DirectDebitSummary::default();

        for event in webhook.events {
            match self.handle_direct_debit_event(&event).await {
                Ok(outcome) => {
                    record_webhook_event(DIRECT_DEBIT_SOURCE, outcome.as_str());
                    summary.count(outcome);
                }
                Err(e) => {
                    tracing::error!(
                        event_id = %event.id,
                        kind = %event.kind(),
                        error = %e,
                        "Direct-debit event failed"
                    );
                    record_webhook_event(DIRECT_DEBIT_SOURCE, "failed");
                    record_error(e.kind(), "direct_debit_event");
                    summary.failures.push(EntityFailure::new(&event.id, &e));
                }
            }
        }
        Ok(summary)
    }

    async fn handle_direct_debit_event(&self, event: &DirectDebitEvent) -> Result<WebhookOutcome> {
        if self
            .store
            .is_event_processed(DIRECT_DEBIT_SOURCE, &event.id)
            .await?
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match event.kind().as_str() {
            "mandates.active" => self.mandate_activated(event).await?,
            "mandates.cancelled" | "mandates.expired" => {
                self.mandate_ended(event, MandateStatus::Cancelled).await?
            }
            "mandates.failed" => self.mandate_ended(event, MandateStatus::Failed).await?,
            "payments.confirmed" | "payments.paid_out" => self.payment_confirmed(event).await?,
            "payments.failed" => self.payment_failed(event).await?,
            other => {
                tracing::debug!(kind = other, "Unhandled direct-debit event");
                WebhookOutcome::Ignored
            }
        };

        self.store
            .mark_event_processed(DIRECT_DEBIT_SOURCE, &event.id, self.now())
            .await?;
        Ok(outcome)
    }

    async fn find_mandate(&self, event: &DirectDebitEvent) -> Result<Option<Mandate>> {
        if let Some(external_id) = event.links.mandate.as_deref() {
            if let Some(mandate) = self.store.get_mandate_by_external_id(external_id).await? {
                return Ok(Some(mandate));
            }
        }
        match event.links.billing_request.as_deref() {
            Some(billing_request) => {
                self.store
                    .get_mandate_by_billing_request(billing_request)
                    .await
            }
            None => Ok(None),
        }
    }

    async fn mandate_activated(&self, event: &DirectDebitEvent) -> Result<WebhookOutcome> {
        let Some(mut mandate) = self.find_mandate(event).await? else {
            tracing::warn!(event_id = %event.id, "Mandate event for unknown mandate");
            return Ok(WebhookOutcome::Ignored);
        };
        if mandate.status == MandateStatus::Cancelled {
            return Ok(WebhookOutcome::Ignored);
        }

        mandate.status = MandateStatus::Active;
        if let Some(external_id) = &event.links.mandate {
            mandate.external_id = Some(external_id.clone());
        }
        mandate.updated_utc = self.now();
        self.store.update_mandate(&mandate).await?;
        record_transition("mandate", mandate.status.as_str());

        let client = self.load_client(mandate.client_id).await?;
        self.set_payment_method(client, PaymentMethod::DirectDebit)
            .await?;

        tracing::info!(
            mandate_id = %mandate.mandate_id,
            client_id = %mandate.client_id,
            "Mandate active"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn mandate_ended(
        &self,
        event: &DirectDebitEvent,
        status: MandateStatus,
    ) -> Result<WebhookOutcome> {
        let Some(mut mandate) = self.find_mandate(event).await? else {
            tracing::warn!(event_id = %event.id, "Mandate event for unknown mandate");
            return Ok(WebhookOutcome::Ignored);
        };
        if mandate.status == status {
            return Ok(WebhookOutcome::Ignored);
        }

        let was_active = mandate.status == MandateStatus::Active;
        mandate.status = status;
        mandate.updated_utc = self.now();
        self.store.update_mandate(&mandate).await?;
        record_transition("mandate", status.as_str());

        if was_active {
            let client = self.load_client(mandate.client_id).await?;
            self.set_payment_method(client, PaymentMethod::BankTransfer)
                .await?;
        }

        tracing::info!(
            mandate_id = %mandate.mandate_id,
            status = status.as_str(),
            "Mandate ended"
        );
        Ok(WebhookOutcome::Processed)
    }

    async fn set_payment_method(&self, client: Client, method: PaymentMethod) -> Result<()> {
        if client.payment_method == method {
            return Ok(());
        }
        let mut updated = client.clone();
        updated.payment_method = method;
        updated.updated_utc = self.now();
        if !self.store.update_client(&updated, client.status).await? {
            return Err(BillingError::Conflict(format!(
                "client {} changed while updating payment method",
                client.client_id
            )));
        }
        Ok(())
    }

    fn event_invoice_id(event: &DirectDebitEvent) -> Option<Uuid> {
        event
            .metadata
            .get(INVOICE_ID_KEY)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    async fn payment_confirmed(&self, event: &DirectDebitEvent) -> Result<WebhookOutcome> {
        let Some(invoice_id) = Self::event_invoice_id(event) else {
            tracing::warn!(event_id = %event.id, "Payment event without invoice reference");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(invoice) = self.store.get_invoice(invoice_id).await? else {
            tracing::warn!(invoice_id = %invoice_id, "Payment event for unknown invoice");
            return Ok(WebhookOutcome::Ignored);
        };
        if invoice.status.is_settled() {
            return Ok(WebhookOutcome::Ignored);
        }

        let today = self.today();
        let reference = event
            .links
            .payment
            .clone()
            .unwrap_or_else(|| event.id.clone());
        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Paid;
        updated.paid_at = Some(today);
        updated.payment_reference = Some(reference.clone());
        updated.updated_utc = self.now();
        if !self
            .store
            .update_invoice_status(&updated, invoice.status)
            .await?
        {
            return Err(BillingError::Conflict(format!(
                "invoice {} changed while recording payment",
                invoice_id
            )));
        }
        record_transition("invoice", InvoiceStatus::Paid.as_str());

        best_effort(
            "mark_paid",
            self.collaborators
                .ledger
                .mark_paid(&invoice.external_id, invoice.total, today, &reference)
                .await,
        );

        tracing::info!(invoice_id = %invoice_id, reference = %reference, "Invoice paid by direct debit");
        Ok(WebhookOutcome::Processed)
    }

    async fn payment_failed(&self, event: &DirectDebitEvent) -> Result<WebhookOutcome> {
        let Some(invoice_id) = Self::event_invoice_id(event) else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(invoice) = self.store.get_invoice(invoice_id).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        if invoice.status.is_settled() || invoice.status == InvoiceStatus::Overdue {
            return Ok(WebhookOutcome::Ignored);
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Overdue;
        updated.updated_utc = self.now();
        if !self
            .store
            .update_invoice_status(&updated, invoice.status)
            .await?
        {
            return Err(BillingError::Conflict(format!(
                "invoice {} changed while recording failed payment",
                invoice_id
            )));
        }
        record_transition("invoice", InvoiceStatus::Overdue.as_str());
        tracing::warn!(invoice_id = %invoice_id, "Direct-debit payment failed");
        Ok(WebhookOutcome::Processed)
    }
}
