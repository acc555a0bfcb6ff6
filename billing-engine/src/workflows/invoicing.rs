//! Monthly invoicing run.
//!
//! One invoice per billable client per calendar month. The per-client
//! invoicing record is claimed before anything is submitted, so concurrent
//! or repeated runs in a period cannot double-invoice.

use chrono::{Datelike, Duration, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use super::charges::proration_charge;
use super::confirmation::contact_profile;
use super::engine::Engine;
use super::EntityFailure;
use crate::error::{BillingError, Result};
use crate::models::{
    ChargeSource, Client, ClientStatus, Invoice, InvoiceStatus, InvoicingRecordStatus,
    Subscription,
};
use crate::rules::calendar::{first_day_of_month, last_day_of_month, same_month};
use crate::rules::{
    bills_recurring, charge_line, recurring_line, start_proration, totals, TaxBuyer, TaxDecision,
};
use crate::services::accounting::{CreateLedgerInvoice, LedgerLine};
use crate::services::metrics::{record_error, record_invoice_created, record_invoicing_outcome};
use crate::services::vat_registry;

/// What the run did for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClientOutcome {
    Invoiced { invoice_id: Uuid },
    NothingDue,
    /// The period is completed or another run holds a live claim on it.
    AlreadyInvoiced,
}

impl ClientOutcome {
    fn label(&self) -> &'static str {
        match self {
            ClientOutcome::Invoiced { .. } => "invoiced",
            ClientOutcome::NothingDue => "nothing_due",
            ClientOutcome::AlreadyInvoiced => "already_invoiced",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub clients_considered: usize,
    pub invoiced: Vec<Uuid>,
    pub nothing_due: usize,
    pub already_invoiced: usize,
    pub failures: Vec<EntityFailure>,
}

impl RunSummary {
    fn new(period_start: NaiveDate, period_end: NaiveDate, clients_considered: usize) -> Self {
        Self {
            period_start,
            period_end,
            clients_considered,
            invoiced: Vec::new(),
            nothing_due: 0,
            already_invoiced: 0,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Engine {
    /// Invoice every billable client for the current calendar month.
    ///
    /// Per-client failures are recorded on the client's invoicing record and in
    /// the summary; they never stop the run.
    #[tracing::instrument(skip(self))]
    pub async fn run_monthly_invoicing(&self) -> Result<RunSummary> {
        let today = self.today();
        let period = Period {
            start: first_day_of_month(today),
            end: last_day_of_month(today),
        };

        let clients = self
            .store
            .list_clients_by_status(&[ClientStatus::Active, ClientStatus::PendingCancellation])
            .await?;
        let mut summary = RunSummary::new(period.start, period.end, clients.len());

        tracing::info!(
            period_start = %period.start,
            clients = clients.len(),
            "Monthly invoicing run started"
        );

        let results: Vec<(Uuid, Result<ClientOutcome>)> = stream::iter(clients)
            .map(|client| async move {
                let client_id = client.client_id;
                (client_id, self.invoice_client(client, period).await)
            })
            .buffer_unordered(self.settings.policy.invoicing_concurrency)
            .collect()
            .await;

        for (client_id, result) in results {
            match result {
                Ok(outcome) => {
                    record_invoicing_outcome(outcome.label());
                    match outcome {
                        ClientOutcome::Invoiced { invoice_id } => summary.invoiced.push(invoice_id),
                        ClientOutcome::NothingDue => summary.nothing_due += 1,
                        ClientOutcome::AlreadyInvoiced => summary.already_invoiced += 1,
                    }
                }
                Err(e) => {
                    record_invoicing_outcome("failed");
                    record_error(e.kind(), "invoice_client");
                    summary.failures.push(EntityFailure::new(client_id, &e));
                }
            }
        }

        tracing::info!(
            period_start = %period.start,
            invoiced = summary.invoiced.len(),
            nothing_due = summary.nothing_due,
            already_invoiced = summary.already_invoiced,
            failures = summary.failures.len(),
            "Monthly invoicing run finished"
        );
        Ok(summary)
    }

    #[tracing::instrument(skip(self, client, period), fields(client_id = %client.client_id))]
    async fn invoice_client(&self, client: Client, period: Period) -> Result<ClientOutcome> {
        let client_id = client.client_id;
        let now = self.now();
        let stale_before = now - self.settings.policy.invoicing_claim_lease;
        if !self
            .store
            .claim_invoicing_period(client_id, period.start, now, stale_before)
            .await?
        {
            return Ok(ClientOutcome::AlreadyInvoiced);
        }

        match self.build_and_submit(client, period).await {
            Ok(Some(invoice)) => {
                self.store
                    .complete_invoicing_period(
                        client_id,
                        period.start,
                        Some(invoice.invoice_id),
                        self.now(),
                    )
                    .await?;
                Ok(ClientOutcome::Invoiced {
                    invoice_id: invoice.invoice_id,
                })
            }
            Ok(None) => {
                // Charges added later in the month must still find the period open.
                self.store
                    .release_invoicing_period(client_id, period.start)
                    .await?;
                Ok(ClientOutcome::NothingDue)
            }
            Err(e) => {
                tracing::error!(error = %e, "Invoicing failed for client");
                if let Err(record_err) = self
                    .store
                    .fail_invoicing_period(client_id, period.start, &e.to_string(), self.now())
                    .await
                {
                    tracing::error!(error = %record_err, "Could not record invoicing failure");
                }
                Err(e)
            }
        }
    }

    async fn build_and_submit(
        &self,
        mut client: Client,
        period: Period,
    ) -> Result<Option<Invoice>> {
        self.queue_deferred_prorations(client.client_id, period)
            .await?;

        let subscriptions: Vec<Subscription> = self
            .store
            .list_subscriptions(client.client_id)
            .await?
            .into_iter()
            .filter(|s| bills_recurring(s, period.start))
            .collect();
        let charges = self.store.list_unbilled_charges(client.client_id).await?;

        if subscriptions.is_empty() && charges.is_empty() {
            tracing::debug!("Nothing due");
            return Ok(None);
        }

        let decision = self.resolve_tax(&mut client).await?;

        let lines: Vec<_> = subscriptions
            .iter()
            .map(|s| recurring_line(s, decision.rate))
            .chain(charges.iter().map(|c| charge_line(c, decision.rate)))
            .collect();
        let amounts = totals(&lines);

        let customer_id = match client.accounting_contact_id.clone() {
            Some(id) => id,
            None => {
                let profile = contact_profile(&client);
                let id = self
                    .critical("get_or_create_contact", || {
                        self.collaborators.ledger.get_or_create_contact(&profile)
                    })
                    .await?;
                self.store_contact_id(&mut client, &id).await?;
                id
            }
        };

        let today = self.today();
        let request = CreateLedgerInvoice {
            customer_id,
            line_items: lines
                .iter()
                .map(|l| LedgerLine {
                    name: l.name.clone(),
                    rate: l.rate,
                    quantity: l.quantity,
                    tax_percentage: l.tax_percentage,
                })
                .collect(),
            date: today,
            due_date: today + Duration::days(i64::from(self.settings.policy.payment_terms_days)),
            currency: self.settings.policy.currency.clone(),
            reference: format!("{}-{}", client.client_id, period.start.format("%Y-%m")),
            draft: true,
        };

        let ledger_invoice = self
            .critical("create_invoice", || {
                self.collaborators.ledger.create_invoice(&request)
            })
            .await?;

        let now = self.now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            client_id: client.client_id,
            external_id: ledger_invoice.id.clone(),
            external_number: ledger_invoice.number.clone(),
            status: InvoiceStatus::from_ledger(&ledger_invoice.status)
                .unwrap_or(InvoiceStatus::Draft),
            tax_mode: decision.mode,
            vat_rate: decision.rate,
            subtotal: amounts.subtotal,
            vat_amount: amounts.vat_amount,
            total: amounts.total,
            currency: self.settings.policy.currency.clone(),
            period_start: period.start,
            period_end: period.end,
            lines,
            paid_at: None,
            payment_reference: None,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_invoice(&invoice).await?;

        let charge_ids: Vec<Uuid> = charges.iter().map(|c| c.charge_id).collect();
        let flipped = self
            .store
            .mark_charges_invoiced(&charge_ids, invoice.invoice_id)
            .await?;
        if flipped != charge_ids.len() as u64 {
            tracing::warn!(
                expected = charge_ids.len(),
                flipped,
                "Some charges were consumed by another invoice"
            );
        }

        record_invoice_created(decision.mode.as_str());
        tracing::info!(
            invoice_id = %invoice.invoice_id,
            external_id = %invoice.external_id,
            total = %invoice.total,
            tax_mode = decision.mode.as_str(),
            "Invoice created"
        );
        Ok(Some(invoice))
    }

    /// Queue the start proration of subscriptions whose first, partial month
    /// is this period and which were added before that month began.
    async fn queue_deferred_prorations(&self, client_id: Uuid, period: Period) -> Result<()> {
        let starting: Vec<Subscription> = self
            .store
            .list_subscriptions(client_id)
            .await?
            .into_iter()
            .filter(|s| {
                s.status.is_billable()
                    && same_month(s.started_at, period.start)
                    && s.started_at.day() > 1
                    && s.cancelled_at.map_or(true, |on| on >= s.started_at)
            })
            .collect();
        if starting.is_empty() {
            return Ok(());
        }

        let existing = self.store.list_charges(client_id).await?;
        for subscription in starting {
            let already_prorated = existing.iter().any(|c| {
                c.source == ChargeSource::Proration
                    && c.subscription_id == Some(subscription.subscription_id)
            });
            if already_prorated {
                continue;
            }
            let Some(proration) =
                start_proration(subscription.monthly_amount, subscription.started_at, period.start)
            else {
                continue;
            };

            let charge = proration_charge(&subscription, &proration, "prorated", self.now());
            self.store.insert_charge(&charge).await?;
            tracing::info!(
                subscription_id = %subscription.subscription_id,
                amount = %charge.amount,
                "Deferred start proration queued"
            );
        }
        Ok(())
    }

    /// Tax decision for a client, consulting the VAT registry when the
    /// identifier would earn a reverse charge.
    pub(crate) async fn resolve_tax(&self, client: &mut Client) -> Result<TaxDecision> {
        let buyer = TaxBuyer {
            country: &client.country,
            is_business: client.is_business,
            vat_number: client.vat_number.as_deref(),
        };
        let format_only = self.settings.tax.resolve(&buyer);
        let Some(vat_id) = format_only.vat_id.clone() else {
            return Ok(format_only);
        };

        let verdict =
            vat_registry::lookup(self.collaborators.vat_registry.as_ref(), &vat_id).await;
        let decision = self.settings.tax.resolve_with_registry(&buyer, verdict);

        if decision.review_required && !client.vat_review_required {
            client.vat_review_required = true;
            client.updated_utc = self.now();
            if !self.store.update_client(client, client.status).await? {
                tracing::warn!(client_id = %client.client_id, "Could not flag client for VAT review");
            }
            tracing::warn!(
                client_id = %client.client_id,
                vat_id = %vat_id,
                "VAT registry unavailable, reverse charge kept pending review"
            );
        }
        Ok(decision)
    }

    /// Whether the subscription's monthly amount was on this period's invoice.
    pub(crate) async fn billed_this_period(
        &self,
        subscription: &Subscription,
        period_start: NaiveDate,
    ) -> Result<bool> {
        let Some(record) = self
            .store
            .get_invoicing_record(subscription.client_id, period_start)
            .await?
        else {
            return Ok(false);
        };
        let Some(invoice_id) = record
            .invoice_id
            .filter(|_| record.status == InvoicingRecordStatus::Completed)
        else {
            return Ok(false);
        };

        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("invoice", invoice_id))?;
        Ok(invoice.lines.iter().any(|l| {
            l.subscription_id == Some(subscription.subscription_id) && l.charge_id.is_none()
        }))
    }
}
