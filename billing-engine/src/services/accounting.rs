//! External double-entry accounting ledger.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::external::ExternalError;

use super::http_client::JsonApi;

/// Who an invoice is addressed to.
#[derive(Debug, Clone, Serialize)]
pub struct ContactProfile {
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerLine {
    pub name: String,
    pub rate: Decimal,
    pub quantity: Decimal,
    pub tax_percentage: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLedgerInvoice {
    pub customer_id: String,
    pub line_items: Vec<LedgerLine>,
    pub date: NaiveDate,
    pub due_date: NaiveDate,
    pub currency: String,
    /// Our idempotency reference: client and period.
    pub reference: String,
    pub draft: bool,
}

/// Invoice as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerInvoice {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    /// `draft|sent|viewed|paid|void|overdue|partially_paid`
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
struct MarkPaidRequest<'a> {
    amount: Decimal,
    date: NaiveDate,
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContactResponse {
    id: String,
}

#[async_trait]
pub trait AccountingLedger: Send + Sync {
    async fn get_or_create_contact(&self, profile: &ContactProfile) -> Result<String, ExternalError>;

    async fn create_invoice(
        &self,
        request: &CreateLedgerInvoice,
    ) -> Result<LedgerInvoice, ExternalError>;

    async fn get_invoice(&self, external_id: &str) -> Result<LedgerInvoice, ExternalError>;

    async fn mark_paid(
        &self,
        external_id: &str,
        amount: Decimal,
        date: NaiveDate,
        reference: &str,
    ) -> Result<(), ExternalError>;
}

/// REST client for the ledger.
#[derive(Clone)]
pub struct HttpAccountingLedger {
    api: JsonApi,
}

impl HttpAccountingLedger {
    pub fn new(api: JsonApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AccountingLedger for HttpAccountingLedger {
    #[tracing::instrument(skip(self, profile), fields(email = %profile.email))]
    async fn get_or_create_contact(&self, profile: &ContactProfile) -> Result<String, ExternalError> {
        let contact: ContactResponse = self.api.post("/contacts/lookup-or-create", profile).await?;
        Ok(contact.id)
    }

    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id, reference = %request.reference))]
    async fn create_invoice(
        &self,
        request: &CreateLedgerInvoice,
    ) -> Result<LedgerInvoice, ExternalError> {
        let invoice: LedgerInvoice = self.api.post("/invoices", request).await?;
        tracing::info!(external_id = %invoice.id, status = %invoice.status, "Ledger invoice created");
        Ok(invoice)
    }

    #[tracing::instrument(skip(self))]
    async fn get_invoice(&self, external_id: &str) -> Result<LedgerInvoice, ExternalError> {
        self.api.get(&format!("/invoices/{}", external_id)).await
    }

    #[tracing::instrument(skip(self))]
    async fn mark_paid(
        &self,
        external_id: &str,
        amount: Decimal,
        date: NaiveDate,
        reference: &str,
    ) -> Result<(), ExternalError> {
        self.api
            .post_empty(
                &format!("/invoices/{}/payments", external_id),
                &MarkPaidRequest {
                    amount,
                    date,
                    reference,
                },
            )
            .await
    }
}
