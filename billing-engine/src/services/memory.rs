//! In-process store for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::Store;
use crate::error::{BillingError, Result};
use crate::models::{
    CancelType, CancellationRequest, Client, ClientStatus, Invoice, InvoiceStatus,
    InvoicingRecord, InvoicingRecordStatus, Mandate, OneTimeCharge, OrderState, Project, Quote,
    QuoteStatus, SignerIdentity, Subscription, SubscriptionStatus, SupplierInvoiceCheck,
    SupplierOrder,
};

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    subscriptions: HashMap<Uuid, Subscription>,
    charges: HashMap<Uuid, OneTimeCharge>,
    invoices: HashMap<Uuid, Invoice>,
    invoicing_records: HashMap<(Uuid, NaiveDate), InvoicingRecord>,
    cancellations: HashMap<Uuid, CancellationRequest>,
    quotes: HashMap<Uuid, Quote>,
    projects: Vec<Project>,
    orders: HashMap<Uuid, SupplierOrder>,
    supplier_checks: Vec<SupplierInvoiceCheck>,
    mandates: Vec<Mandate>,
    events: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn duplicate(entity: &str, id: impl std::fmt::Display) -> BillingError {
    BillingError::Conflict(format!("{} {} already exists", entity, id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_client(&self, client: &Client) -> Result<()> {
        let mut state = self.state.write().await;
        if state.clients.contains_key(&client.client_id) {
            return Err(duplicate("client", client.client_id));
        }
        state.clients.insert(client.client_id, client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>> {
        Ok(self.state.read().await.clients.get(&client_id).cloned())
    }

    async fn list_clients_by_status(&self, statuses: &[ClientStatus]) -> Result<Vec<Client>> {
        let state = self.state.read().await;
        let mut clients: Vec<Client> = state
            .clients
            .values()
            .filter(|c| statuses.contains(&c.status))
            .cloned()
            .collect();
        clients.sort_by_key(|c| c.created_utc);
        Ok(clients)
    }

    async fn update_client(&self, client: &Client, expected: ClientStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.clients.get_mut(&client.client_id) {
            Some(stored) if stored.status == expected => {
                *stored = client.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .subscriptions
            .contains_key(&subscription.subscription_id)
        {
            return Err(duplicate("subscription", subscription.subscription_id));
        }
        state
            .subscriptions
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&subscription_id)
            .cloned())
    }

    async fn list_subscriptions(&self, client_id: Uuid) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut subs: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.client_id == client_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_utc);
        Ok(subs)
    }

    async fn list_subscriptions_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.subscriptions.get_mut(&subscription.subscription_id) {
            Some(stored) if stored.status == expected => {
                *stored = subscription.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_charge(&self, charge: &OneTimeCharge) -> Result<()> {
        let mut state = self.state.write().await;
        if state.charges.contains_key(&charge.charge_id) {
            return Err(duplicate("charge", charge.charge_id));
        }
        state.charges.insert(charge.charge_id, charge.clone());
        Ok(())
    }

    async fn list_unbilled_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>> {
        let mut charges = self.list_charges(client_id).await?;
        charges.retain(|c| !c.invoiced);
        Ok(charges)
    }

    async fn list_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>> {
        let state = self.state.read().await;
        let mut charges: Vec<OneTimeCharge> = state
            .charges
            .values()
            .filter(|c| c.client_id == client_id)
            .cloned()
            .collect();
        charges.sort_by_key(|c| c.created_utc);
        Ok(charges)
    }

    async fn mark_charges_invoiced(&self, charge_ids: &[Uuid], invoice_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for id in charge_ids {
            if let Some(charge) = state.charges.get_mut(id) {
                if !charge.invoiced {
                    charge.invoiced = true;
                    charge.invoice_id = Some(invoice_id);
                    flipped += 1;
                }
            }
        }
        Ok(flipped)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut state = self.state.write().await;
        if state.invoices.contains_key(&invoice.invoice_id) {
            return Err(duplicate("invoice", invoice.invoice_id));
        }
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.state.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn get_invoice_by_external_id(&self, external_id: &str) -> Result<Option<Invoice>> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .find(|i| i.external_id == external_id)
            .cloned())
    }

    async fn list_invoices(&self, client_id: Uuid) -> Result<Vec<Invoice>> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.client_id == client_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_utc);
        Ok(invoices)
    }

    async fn list_open_invoices(&self) -> Result<Vec<Invoice>> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .values()
            .filter(|i| !i.status.is_settled())
            .cloned()
            .collect())
    }

    async fn update_invoice_status(
        &self,
        invoice: &Invoice,
        expected: InvoiceStatus,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(&invoice.invoice_id) {
            Some(stored) if stored.status == expected => {
                stored.status = invoice.status;
                stored.paid_at = invoice.paid_at;
                stored.payment_reference = invoice.payment_reference.clone();
                stored.updated_utc = invoice.updated_utc;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (client_id, period_start);
        match state.invoicing_records.get_mut(&key) {
            None => {
                state.invoicing_records.insert(
                    key,
                    InvoicingRecord {
                        client_id,
                        period_start,
                        status: InvoicingRecordStatus::Claimed,
                        invoice_id: None,
                        error_message: None,
                        claimed_utc: now,
                        updated_utc: now,
                    },
                );
                Ok(true)
            }
            Some(record)
                if record.status == InvoicingRecordStatus::Failed
                    || (record.status == InvoicingRecordStatus::Claimed
                        && record.claimed_utc < stale_before) =>
            {
                record.status = InvoicingRecordStatus::Claimed;
                record.error_message = None;
                record.claimed_utc = now;
                record.updated_utc = now;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn release_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (client_id, period_start);
        if state
            .invoicing_records
            .get(&key)
            .is_some_and(|r| r.status == InvoicingRecordStatus::Claimed)
        {
            state.invoicing_records.remove(&key);
        }
        Ok(())
    }

    async fn complete_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        invoice_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.invoicing_records.get_mut(&(client_id, period_start)) {
            record.status = InvoicingRecordStatus::Completed;
            record.invoice_id = invoice_id;
            record.error_message = None;
            record.updated_utc = now;
        }
        Ok(())
    }

    async fn fail_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(record) = state.invoicing_records.get_mut(&(client_id, period_start)) {
            record.status = InvoicingRecordStatus::Failed;
            record.error_message = Some(error_message.to_string());
            record.updated_utc = now;
        }
        Ok(())
    }

    async fn get_invoicing_record(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
    ) -> Result<Option<InvoicingRecord>> {
        Ok(self
            .state
            .read()
            .await
            .invoicing_records
            .get(&(client_id, period_start))
            .cloned())
    }

    async fn insert_cancellation(&self, request: &CancellationRequest) -> Result<()> {
        let mut state = self.state.write().await;
        let blocked = state.cancellations.values().any(|r| {
            r.client_id == request.client_id
                && r.cancel_type == request.cancel_type
                && r.is_unresolved()
        });
        if blocked {
            return Err(BillingError::Conflict(format!(
                "client {} already has an open {} cancellation",
                request.client_id,
                request.cancel_type.as_str()
            )));
        }
        if state.cancellations.values().any(|r| r.token == request.token) {
            return Err(duplicate("cancellation token", "for request"));
        }
        state
            .cancellations
            .insert(request.request_id, request.clone());
        Ok(())
    }

    async fn get_cancellation_by_token(&self, token: &str) -> Result<Option<CancellationRequest>> {
        let state = self.state.read().await;
        Ok(state
            .cancellations
            .values()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn list_cancellations(&self, client_id: Uuid) -> Result<Vec<CancellationRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<CancellationRequest> = state
            .cancellations
            .values()
            .filter(|r| r.client_id == client_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    async fn find_open_cancellation(
        &self,
        client_id: Uuid,
        cancel_type: CancelType,
    ) -> Result<Option<CancellationRequest>> {
        let state = self.state.read().await;
        Ok(state
            .cancellations
            .values()
            .find(|r| r.client_id == client_id && r.cancel_type == cancel_type && !r.processed)
            .cloned())
    }

    async fn sign_cancellation(
        &self,
        request_id: Uuid,
        signed_at: DateTime<Utc>,
        signer: &SignerIdentity,
        effective_at: NaiveDate,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.cancellations.get_mut(&request_id) {
            Some(request) if request.signed_at.is_none() => {
                request.signed_at = Some(signed_at);
                request.signer = Some(signer.clone());
                request.effective_at = effective_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancellation_processed(&self, request_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.cancellations.get_mut(&request_id) {
            Some(request) if !request.processed => {
                request.processed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<()> {
        let mut state = self.state.write().await;
        if state
            .quotes
            .values()
            .any(|q| q.quote_id == quote.quote_id || q.quote_number == quote.quote_number)
        {
            return Err(duplicate("quote", &quote.quote_number));
        }
        state.quotes.insert(quote.quote_id, quote.clone());
        Ok(())
    }

    async fn get_quote(&self, quote_id: Uuid) -> Result<Option<Quote>> {
        Ok(self.state.read().await.quotes.get(&quote_id).cloned())
    }

    async fn get_quote_by_number(&self, quote_number: &str) -> Result<Option<Quote>> {
        let state = self.state.read().await;
        Ok(state
            .quotes
            .values()
            .find(|q| q.quote_number == quote_number)
            .cloned())
    }

    async fn find_quote_for_client(&self, client_id: Uuid) -> Result<Option<Quote>> {
        let state = self.state.read().await;
        Ok(state
            .quotes
            .values()
            .filter(|q| q.client_id == Some(client_id))
            .max_by_key(|q| q.created_utc)
            .cloned())
    }

    async fn update_quote(&self, quote: &Quote, expected: QuoteStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.quotes.get_mut(&quote.quote_id) {
            Some(stored) if stored.status == expected => {
                *stored = quote.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        self.state.write().await.projects.push(project.clone());
        Ok(())
    }

    async fn list_projects(&self, client_id: Uuid) -> Result<Vec<Project>> {
        let state = self.state.read().await;
        Ok(state
            .projects
            .iter()
            .filter(|p| p.client_id == client_id)
            .cloned()
            .collect())
    }

    async fn insert_order(&self, order: &SupplierOrder) -> Result<()> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.order_id) {
            return Err(duplicate("order", order.order_id));
        }
        state.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<SupplierOrder>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn update_order_state(
        &self,
        order_id: Uuid,
        expected: OrderState,
        next: OrderState,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&order_id) {
            Some(order) if order.state == expected => {
                order.state = next;
                order.updated_utc = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_supplier_check(&self, check: &SupplierInvoiceCheck) -> Result<()> {
        self.state.write().await.supplier_checks.push(check.clone());
        Ok(())
    }

    async fn list_supplier_checks(&self, order_id: Uuid) -> Result<Vec<SupplierInvoiceCheck>> {
        let state = self.state.read().await;
        Ok(state
            .supplier_checks
            .iter()
            .filter(|c| c.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_mandate(&self, mandate: &Mandate) -> Result<()> {
        self.state.write().await.mandates.push(mandate.clone());
        Ok(())
    }

    async fn get_mandate_for_client(&self, client_id: Uuid) -> Result<Option<Mandate>> {
        let state = self.state.read().await;
        Ok(state
            .mandates
            .iter()
            .filter(|m| m.client_id == client_id)
            .max_by_key(|m| m.created_utc)
            .cloned())
    }

    async fn get_mandate_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>> {
        let state = self.state.read().await;
        Ok(state
            .mandates
            .iter()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_mandate_by_billing_request(
        &self,
        billing_request_id: &str,
    ) -> Result<Option<Mandate>> {
        let state = self.state.read().await;
        Ok(state
            .mandates
            .iter()
            .find(|m| m.billing_request_id.as_deref() == Some(billing_request_id))
            .cloned())
    }

    async fn update_mandate(&self, mandate: &Mandate) -> Result<()> {
        let mut state = self.state.write().await;
        match state
            .mandates
            .iter_mut()
            .find(|m| m.mandate_id == mandate.mandate_id)
        {
            Some(stored) => {
                *stored = mandate.clone();
                Ok(())
            }
            None => Err(BillingError::not_found("mandate", mandate.mandate_id)),
        }
    }

    async fn is_event_processed(&self, source: &str, event_id: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .events
            .contains(&(source.to_string(), event_id.to_string())))
    }

    async fn mark_event_processed(
        &self,
        source: &str,
        event_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .events
            .insert((source.to_string(), event_id.to_string()));
        Ok(())
    }
}
