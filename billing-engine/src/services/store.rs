//! Keyed store contract used by the workflows.
//!
//! No transactions span calls. Every mutation that races with another
//! writer is a compare-and-set on the entity's expected state and reports
//! whether it applied.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CancelType, CancellationRequest, Client, ClientStatus, Invoice, InvoiceStatus,
    InvoicingRecord, Mandate, OneTimeCharge, OrderState, Project, Quote, QuoteStatus,
    SignerIdentity, Subscription, SubscriptionStatus, SupplierInvoiceCheck, SupplierOrder,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    // Clients

    async fn insert_client(&self, client: &Client) -> Result<()>;

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>>;

    async fn list_clients_by_status(&self, statuses: &[ClientStatus]) -> Result<Vec<Client>>;

    /// Replace the client row if its stored status is still `expected`.
    async fn update_client(&self, client: &Client, expected: ClientStatus) -> Result<bool>;

    // Subscriptions

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>>;

    async fn list_subscriptions(&self, client_id: Uuid) -> Result<Vec<Subscription>>;

    async fn list_subscriptions_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>>;

    /// Replace the subscription row if its stored status is still `expected`.
    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<bool>;

    // One-time charges

    async fn insert_charge(&self, charge: &OneTimeCharge) -> Result<()>;

    async fn list_unbilled_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>>;

    async fn list_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>>;

    /// Mark still-unbilled charges as invoiced; returns how many flipped.
    async fn mark_charges_invoiced(&self, charge_ids: &[Uuid], invoice_id: Uuid) -> Result<u64>;

    // Invoices

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>>;

    async fn get_invoice_by_external_id(&self, external_id: &str) -> Result<Option<Invoice>>;

    async fn list_invoices(&self, client_id: Uuid) -> Result<Vec<Invoice>>;

    /// Invoices that may still change status (not paid, not cancelled).
    async fn list_open_invoices(&self) -> Result<Vec<Invoice>>;

    /// Replace status and payment fields if the stored status is still `expected`.
    async fn update_invoice_status(&self, invoice: &Invoice, expected: InvoiceStatus)
        -> Result<bool>;

    // Invoicing idempotency records

    /// Take the client's period for this run.
    ///
    /// Succeeds when no record exists, the previous attempt failed, or a
    /// claim was taken before `stale_before` and never resolved.
    async fn claim_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop an unresolved claim so a later run can take the period again.
    async fn release_invoicing_period(&self, client_id: Uuid, period_start: NaiveDate)
        -> Result<()>;

    async fn complete_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        invoice_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn fail_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_invoicing_record(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
    ) -> Result<Option<InvoicingRecord>>;

    // Cancellation requests

    /// Insert a request; `Conflict` when the client already holds an
    /// unresolved request of the same type.
    async fn insert_cancellation(&self, request: &CancellationRequest) -> Result<()>;

    async fn get_cancellation_by_token(&self, token: &str) -> Result<Option<CancellationRequest>>;

    async fn list_cancellations(&self, client_id: Uuid) -> Result<Vec<CancellationRequest>>;

    async fn find_open_cancellation(
        &self,
        client_id: Uuid,
        cancel_type: CancelType,
    ) -> Result<Option<CancellationRequest>>;

    /// Record the first signature; `false` when already signed.
    async fn sign_cancellation(
        &self,
        request_id: Uuid,
        signed_at: DateTime<Utc>,
        signer: &SignerIdentity,
        effective_at: NaiveDate,
    ) -> Result<bool>;

    /// `false` when already processed.
    async fn mark_cancellation_processed(&self, request_id: Uuid) -> Result<bool>;

    // Quotes and projects

    async fn insert_quote(&self, quote: &Quote) -> Result<()>;

    async fn get_quote(&self, quote_id: Uuid) -> Result<Option<Quote>>;

    async fn get_quote_by_number(&self, quote_number: &str) -> Result<Option<Quote>>;

    async fn find_quote_for_client(&self, client_id: Uuid) -> Result<Option<Quote>>;

    async fn update_quote(&self, quote: &Quote, expected: QuoteStatus) -> Result<bool>;

    async fn insert_project(&self, project: &Project) -> Result<()>;

    async fn list_projects(&self, client_id: Uuid) -> Result<Vec<Project>>;

    // Supplier orders

    async fn insert_order(&self, order: &SupplierOrder) -> Result<()>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<SupplierOrder>>;

    async fn update_order_state(
        &self,
        order_id: Uuid,
        expected: OrderState,
        next: OrderState,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_supplier_check(&self, check: &SupplierInvoiceCheck) -> Result<()>;

    async fn list_supplier_checks(&self, order_id: Uuid) -> Result<Vec<SupplierInvoiceCheck>>;

    // Direct-debit mandates

    async fn insert_mandate(&self, mandate: &Mandate) -> Result<()>;

    /// Most recently created mandate of the client.
    async fn get_mandate_for_client(&self, client_id: Uuid) -> Result<Option<Mandate>>;

    async fn get_mandate_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>>;

    async fn get_mandate_by_billing_request(
        &self,
        billing_request_id: &str,
    ) -> Result<Option<Mandate>>;

    async fn update_mandate(&self, mandate: &Mandate) -> Result<()>;

    // Webhook idempotency

    async fn is_event_processed(&self, source: &str, event_id: &str) -> Result<bool>;

    async fn mark_event_processed(
        &self,
        source: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;
}
