//! PostgreSQL store for billing-engine.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::store::Store;
use crate::error::{BillingError, Result};
use crate::models::{
    CancelType, CancellationRequest, Client, ClientCancellation, ClientProfile, ClientStatus,
    CommissionConfig, Invoice, InvoiceLine, InvoiceStatus, InvoicingRecord,
    InvoicingRecordStatus, Mandate, MismatchReason, OneTimeCharge, OrderLine, OrderState, Project,
    ProjectTask, Quote, QuoteLine, QuoteStatus, SignerIdentity, Subscription, SubscriptionStatus,
    SupplierInvoiceCheck, SupplierOrder, UnknownVariant,
};

macro_rules! client_columns {
    () => {
        "client_id, brand, company_name, contact_name, email, country, vat_number, is_business, \
         status, cancellation_requested_at, cancellation_effective_at, cancellation_signed_at, \
         cancellation_reason, payment_method, commission, accounting_contact_id, \
         vat_review_required, created_utc, updated_utc"
    };
}

macro_rules! subscription_columns {
    () => {
        "subscription_id, client_id, service_type, description, monthly_amount, \
         tax_rate_override, status, started_at, cancelled_at, created_utc, updated_utc"
    };
}

macro_rules! charge_columns {
    () => {
        "charge_id, client_id, subscription_id, source, description, amount, tax_rate_override, \
         invoiced, invoice_id, created_utc"
    };
}

macro_rules! invoice_columns {
    () => {
        "invoice_id, client_id, external_id, external_number, status, tax_mode, vat_rate, \
         subtotal, vat_amount, total, currency, period_start, period_end, lines, paid_at, \
         payment_reference, created_utc, updated_utc"
    };
}

macro_rules! cancellation_columns {
    () => {
        "request_id, client_id, subscription_id, cancel_type, token, reason, requested_at, \
         signed_at, signer_name, signer_email, signer_ip, effective_at, processed"
    };
}

macro_rules! quote_columns {
    () => {
        "quote_id, quote_number, client_id, profile, lines, status, signing_session, signed_at, \
         created_utc, updated_utc"
    };
}

macro_rules! mandate_columns {
    () => {
        "mandate_id, client_id, external_id, billing_request_id, status, created_utc, updated_utc"
    };
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    value.parse::<T>().map_err(BillingError::store)
}

// =============================================================================
// Row types
// =============================================================================

#[derive(FromRow)]
struct ClientRow {
    client_id: Uuid,
    brand: String,
    company_name: String,
    contact_name: String,
    email: String,
    country: String,
    vat_number: Option<String>,
    is_business: bool,
    status: String,
    cancellation_requested_at: Option<DateTime<Utc>>,
    cancellation_effective_at: Option<NaiveDate>,
    cancellation_signed_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    payment_method: String,
    commission: Option<Json<CommissionConfig>>,
    accounting_contact_id: Option<String>,
    vat_review_required: bool,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<ClientRow> for Client {
    type Error = BillingError;

    fn try_from(row: ClientRow) -> Result<Self> {
        Ok(Client {
            client_id: row.client_id,
            brand: row.brand,
            company_name: row.company_name,
            contact_name: row.contact_name,
            email: row.email,
            country: row.country.trim().to_string(),
            vat_number: row.vat_number,
            is_business: row.is_business,
            status: parse(&row.status)?,
            cancellation: ClientCancellation {
                requested_at: row.cancellation_requested_at,
                effective_at: row.cancellation_effective_at,
                signed_at: row.cancellation_signed_at,
                reason: row.cancellation_reason,
            },
            payment_method: parse(&row.payment_method)?,
            commission: row.commission.map(|json| json.0),
            accounting_contact_id: row.accounting_contact_id,
            vat_review_required: row.vat_review_required,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct SubscriptionRow {
    subscription_id: Uuid,
    client_id: Uuid,
    service_type: String,
    description: String,
    monthly_amount: Decimal,
    tax_rate_override: Option<Decimal>,
    status: String,
    started_at: NaiveDate,
    cancelled_at: Option<NaiveDate>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Subscription {
            subscription_id: row.subscription_id,
            client_id: row.client_id,
            service_type: row.service_type,
            description: row.description,
            monthly_amount: row.monthly_amount,
            tax_rate_override: row.tax_rate_override,
            status: parse(&row.status)?,
            started_at: row.started_at,
            cancelled_at: row.cancelled_at,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct ChargeRow {
    charge_id: Uuid,
    client_id: Uuid,
    subscription_id: Option<Uuid>,
    source: String,
    description: String,
    amount: Decimal,
    tax_rate_override: Option<Decimal>,
    invoiced: bool,
    invoice_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<ChargeRow> for OneTimeCharge {
    type Error = BillingError;

    fn try_from(row: ChargeRow) -> Result<Self> {
        Ok(OneTimeCharge {
            charge_id: row.charge_id,
            client_id: row.client_id,
            subscription_id: row.subscription_id,
            source: parse(&row.source)?,
            description: row.description,
            amount: row.amount,
            tax_rate_override: row.tax_rate_override,
            invoiced: row.invoiced,
            invoice_id: row.invoice_id,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    client_id: Uuid,
    external_id: String,
    external_number: Option<String>,
    status: String,
    tax_mode: String,
    vat_rate: Decimal,
    subtotal: Decimal,
    vat_amount: Decimal,
    total: Decimal,
    currency: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    lines: Json<Vec<InvoiceLine>>,
    paid_at: Option<NaiveDate>,
    payment_reference: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self> {
        Ok(Invoice {
            invoice_id: row.invoice_id,
            client_id: row.client_id,
            external_id: row.external_id,
            external_number: row.external_number,
            status: parse(&row.status)?,
            tax_mode: parse(&row.tax_mode)?,
            vat_rate: row.vat_rate,
            subtotal: row.subtotal,
            vat_amount: row.vat_amount,
            total: row.total,
            currency: row.currency.trim().to_string(),
            period_start: row.period_start,
            period_end: row.period_end,
            lines: row.lines.0,
            paid_at: row.paid_at,
            payment_reference: row.payment_reference,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct InvoicingRecordRow {
    client_id: Uuid,
    period_start: NaiveDate,
    status: String,
    invoice_id: Option<Uuid>,
    error_message: Option<String>,
    claimed_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<InvoicingRecordRow> for InvoicingRecord {
    type Error = BillingError;

    fn try_from(row: InvoicingRecordRow) -> Result<Self> {
        Ok(InvoicingRecord {
            client_id: row.client_id,
            period_start: row.period_start,
            status: parse(&row.status)?,
            invoice_id: row.invoice_id,
            error_message: row.error_message,
            claimed_utc: row.claimed_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct CancellationRow {
    request_id: Uuid,
    client_id: Uuid,
    subscription_id: Option<Uuid>,
    cancel_type: String,
    token: String,
    reason: Option<String>,
    requested_at: DateTime<Utc>,
    signed_at: Option<DateTime<Utc>>,
    signer_name: Option<String>,
    signer_email: Option<String>,
    signer_ip: Option<String>,
    effective_at: NaiveDate,
    processed: bool,
}

impl TryFrom<CancellationRow> for CancellationRequest {
    type Error = BillingError;

    fn try_from(row: CancellationRow) -> Result<Self> {
        let signer = match (row.signer_name, row.signer_email) {
            (Some(name), Some(email)) => Some(SignerIdentity {
                name,
                email,
                ip_address: row.signer_ip,
            }),
            _ => None,
        };

        Ok(CancellationRequest {
            request_id: row.request_id,
            client_id: row.client_id,
            subscription_id: row.subscription_id,
            cancel_type: parse(&row.cancel_type)?,
            token: row.token,
            reason: row.reason,
            requested_at: row.requested_at,
            signed_at: row.signed_at,
            signer,
            effective_at: row.effective_at,
            processed: row.processed,
        })
    }
}

#[derive(FromRow)]
struct QuoteRow {
    quote_id: Uuid,
    quote_number: String,
    client_id: Option<Uuid>,
    profile: Json<ClientProfile>,
    lines: Json<Vec<QuoteLine>>,
    status: String,
    signing_session: Option<String>,
    signed_at: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<QuoteRow> for Quote {
    type Error = BillingError;

    fn try_from(row: QuoteRow) -> Result<Self> {
        Ok(Quote {
            quote_id: row.quote_id,
            quote_number: row.quote_number,
            client_id: row.client_id,
            profile: row.profile.0,
            lines: row.lines.0,
            status: parse(&row.status)?,
            signing_session: row.signing_session,
            signed_at: row.signed_at,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct ProjectRow {
    project_id: Uuid,
    client_id: Uuid,
    quote_id: Uuid,
    name: String,
    tasks: Json<Vec<ProjectTask>>,
    created_utc: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            project_id: row.project_id,
            client_id: row.client_id,
            quote_id: row.quote_id,
            name: row.name,
            tasks: row.tasks.0,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    order_id: Uuid,
    client_id: Uuid,
    currency: String,
    lines: Json<Vec<OrderLine>>,
    state: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<OrderRow> for SupplierOrder {
    type Error = BillingError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(SupplierOrder {
            order_id: row.order_id,
            client_id: row.client_id,
            currency: row.currency.trim().to_string(),
            lines: row.lines.0,
            state: parse(&row.state)?,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct CheckRow {
    check_id: Uuid,
    order_id: Uuid,
    supplier_reference: String,
    claimed_total: Decimal,
    claimed_currency: String,
    expected_total: Decimal,
    tolerance_percent: Decimal,
    matched: bool,
    mismatch_reasons: Json<Vec<MismatchReason>>,
    checked_utc: DateTime<Utc>,
}

impl From<CheckRow> for SupplierInvoiceCheck {
    fn from(row: CheckRow) -> Self {
        SupplierInvoiceCheck {
            check_id: row.check_id,
            order_id: row.order_id,
            supplier_reference: row.supplier_reference,
            claimed_total: row.claimed_total,
            claimed_currency: row.claimed_currency.trim().to_string(),
            expected_total: row.expected_total,
            tolerance_percent: row.tolerance_percent,
            matched: row.matched,
            mismatch_reasons: row.mismatch_reasons.0,
            checked_utc: row.checked_utc,
        }
    }
}

#[derive(FromRow)]
struct MandateRow {
    mandate_id: Uuid,
    client_id: Uuid,
    external_id: Option<String>,
    billing_request_id: Option<String>,
    status: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<MandateRow> for Mandate {
    type Error = BillingError;

    fn try_from(row: MandateRow) -> Result<Self> {
        Ok(Mandate {
            mandate_id: row.mandate_id,
            client_id: row.client_id,
            external_id: row.external_id,
            billing_request_id: row.billing_request_id,
            status: parse(&row.status)?,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = BillingError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// =============================================================================
// Store
// =============================================================================

/// Connection pool wrapper implementing [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-engine"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(BillingError::store)?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Clients
    // =========================================================================

    #[instrument(skip(self, client), fields(client_id = %client.client_id))]
    async fn insert_client(&self, client: &Client) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_client"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO clients (",
            client_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(client.client_id)
        .bind(&client.brand)
        .bind(&client.company_name)
        .bind(&client.contact_name)
        .bind(&client.email)
        .bind(&client.country)
        .bind(&client.vat_number)
        .bind(client.is_business)
        .bind(client.status.as_str())
        .bind(client.cancellation.requested_at)
        .bind(client.cancellation.effective_at)
        .bind(client.cancellation.signed_at)
        .bind(&client.cancellation.reason)
        .bind(client.payment_method.as_str())
        .bind(client.commission.clone().map(Json))
        .bind(&client.accounting_contact_id)
        .bind(client.vat_review_required)
        .bind(client.created_utc)
        .bind(client.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        info!(status = client.status.as_str(), "Client created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let row = sqlx::query_as::<_, ClientRow>(concat!(
            "SELECT ",
            client_columns!(),
            " FROM clients WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Client::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_clients_by_status(&self, statuses: &[ClientStatus]) -> Result<Vec<Client>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_clients_by_status"])
            .start_timer();

        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, ClientRow>(concat!(
            "SELECT ",
            client_columns!(),
            " FROM clients WHERE status = ANY($1) ORDER BY created_utc"
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, client), fields(client_id = %client.client_id, expected = expected.as_str()))]
    async fn update_client(&self, client: &Client, expected: ClientStatus) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_client"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE clients SET
                brand = $2, company_name = $3, contact_name = $4, email = $5, country = $6,
                vat_number = $7, is_business = $8, status = $9,
                cancellation_requested_at = $10, cancellation_effective_at = $11,
                cancellation_signed_at = $12, cancellation_reason = $13,
                payment_method = $14, commission = $15, accounting_contact_id = $16,
                vat_review_required = $17, updated_utc = $18
            WHERE client_id = $1 AND status = $19
            "#,
        )
        .bind(client.client_id)
        .bind(&client.brand)
        .bind(&client.company_name)
        .bind(&client.contact_name)
        .bind(&client.email)
        .bind(&client.country)
        .bind(&client.vat_number)
        .bind(client.is_business)
        .bind(client.status.as_str())
        .bind(client.cancellation.requested_at)
        .bind(client.cancellation.effective_at)
        .bind(client.cancellation.signed_at)
        .bind(&client.cancellation.reason)
        .bind(client.payment_method.as_str())
        .bind(client.commission.clone().map(Json))
        .bind(&client.accounting_contact_id)
        .bind(client.vat_review_required)
        .bind(client.updated_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO subscriptions (",
            subscription_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(subscription.subscription_id)
        .bind(subscription.client_id)
        .bind(&subscription.service_type)
        .bind(&subscription.description)
        .bind(subscription.monthly_amount)
        .bind(subscription.tax_rate_override)
        .bind(subscription.status.as_str())
        .bind(subscription.started_at)
        .bind(subscription.cancelled_at)
        .bind(subscription.created_utc)
        .bind(subscription.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_subscription(&self, subscription_id: Uuid) -> Result<Option<Subscription>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let row = sqlx::query_as::<_, SubscriptionRow>(concat!(
            "SELECT ",
            subscription_columns!(),
            " FROM subscriptions WHERE subscription_id = $1"
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Subscription::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_subscriptions(&self, client_id: Uuid) -> Result<Vec<Subscription>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let rows = sqlx::query_as::<_, SubscriptionRow>(concat!(
            "SELECT ",
            subscription_columns!(),
            " FROM subscriptions WHERE client_id = $1 ORDER BY created_utc"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self), fields(status = status.as_str()))]
    async fn list_subscriptions_by_status(
        &self,
        status: SubscriptionStatus,
    ) -> Result<Vec<Subscription>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions_by_status"])
            .start_timer();

        let rows = sqlx::query_as::<_, SubscriptionRow>(concat!(
            "SELECT ",
            subscription_columns!(),
            " FROM subscriptions WHERE status = $1 ORDER BY created_utc"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = %subscription.subscription_id))]
    async fn update_subscription(
        &self,
        subscription: &Subscription,
        expected: SubscriptionStatus,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                service_type = $2, description = $3, monthly_amount = $4, tax_rate_override = $5,
                status = $6, started_at = $7, cancelled_at = $8, updated_utc = $9
            WHERE subscription_id = $1 AND status = $10
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(&subscription.service_type)
        .bind(&subscription.description)
        .bind(subscription.monthly_amount)
        .bind(subscription.tax_rate_override)
        .bind(subscription.status.as_str())
        .bind(subscription.started_at)
        .bind(subscription.cancelled_at)
        .bind(subscription.updated_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // One-time charges
    // =========================================================================

    #[instrument(skip(self, charge), fields(client_id = %charge.client_id, source = charge.source.as_str()))]
    async fn insert_charge(&self, charge: &OneTimeCharge) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_charge"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO one_time_charges (",
            charge_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(charge.charge_id)
        .bind(charge.client_id)
        .bind(charge.subscription_id)
        .bind(charge.source.as_str())
        .bind(&charge.description)
        .bind(charge.amount)
        .bind(charge.tax_rate_override)
        .bind(charge.invoiced)
        .bind(charge.invoice_id)
        .bind(charge.created_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_unbilled_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unbilled_charges"])
            .start_timer();

        let rows = sqlx::query_as::<_, ChargeRow>(concat!(
            "SELECT ",
            charge_columns!(),
            " FROM one_time_charges WHERE client_id = $1 AND NOT invoiced ORDER BY created_utc"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn list_charges(&self, client_id: Uuid) -> Result<Vec<OneTimeCharge>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_charges"])
            .start_timer();

        let rows = sqlx::query_as::<_, ChargeRow>(concat!(
            "SELECT ",
            charge_columns!(),
            " FROM one_time_charges WHERE client_id = $1 ORDER BY created_utc"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, charge_ids), fields(count = charge_ids.len()))]
    async fn mark_charges_invoiced(&self, charge_ids: &[Uuid], invoice_id: Uuid) -> Result<u64> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_charges_invoiced"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE one_time_charges SET invoiced = TRUE, invoice_id = $2
            WHERE charge_id = ANY($1) AND NOT invoiced
            "#,
        )
        .bind(charge_ids)
        .bind(invoice_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, client_id = %invoice.client_id))]
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO invoices (",
            invoice_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(invoice.invoice_id)
        .bind(invoice.client_id)
        .bind(&invoice.external_id)
        .bind(&invoice.external_number)
        .bind(invoice.status.as_str())
        .bind(invoice.tax_mode.as_str())
        .bind(invoice.vat_rate)
        .bind(invoice.subtotal)
        .bind(invoice.vat_amount)
        .bind(invoice.total)
        .bind(&invoice.currency)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(Json(&invoice.lines))
        .bind(invoice.paid_at)
        .bind(&invoice.payment_reference)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE invoice_id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_invoice_by_external_id(&self, external_id: &str) -> Result<Option<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_by_external_id"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_invoices(&self, client_id: Uuid) -> Result<Vec<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE client_id = $1 ORDER BY created_utc"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn list_open_invoices(&self) -> Result<Vec<Invoice>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_open_invoices"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM invoices WHERE status NOT IN ('paid', 'cancelled') ORDER BY created_utc"
        ))
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.invoice_id, to = invoice.status.as_str()))]
    async fn update_invoice_status(
        &self,
        invoice: &Invoice,
        expected: InvoiceStatus,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice_status"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices SET status = $2, paid_at = $3, payment_reference = $4, updated_utc = $5
            WHERE invoice_id = $1 AND status = $6
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.status.as_str())
        .bind(invoice.paid_at)
        .bind(&invoice.payment_reference)
        .bind(invoice.updated_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Invoicing records
    // =========================================================================

    #[instrument(skip(self, now, stale_before))]
    async fn claim_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_invoicing_period"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO invoicing_records (client_id, period_start, status, claimed_utc, updated_utc)
            VALUES ($1, $2, 'claimed', $3, $3)
            ON CONFLICT (client_id, period_start) DO UPDATE
                SET status = 'claimed', error_message = NULL, claimed_utc = $3, updated_utc = $3
                WHERE invoicing_records.status = 'failed'
                   OR (invoicing_records.status = 'claimed' AND invoicing_records.claimed_utc < $4)
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
    ) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_invoicing_period"])
            .start_timer();

        sqlx::query(
            r#"
            DELETE FROM invoicing_records
            WHERE client_id = $1 AND period_start = $2 AND status = 'claimed'
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, now))]
    async fn complete_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        invoice_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_invoicing_period"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE invoicing_records
            SET status = $3, invoice_id = $4, error_message = NULL, updated_utc = $5
            WHERE client_id = $1 AND period_start = $2
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .bind(InvoicingRecordStatus::Completed.as_str())
        .bind(invoice_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, now))]
    async fn fail_invoicing_period(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_invoicing_period"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE invoicing_records SET status = $3, error_message = $4, updated_utc = $5
            WHERE client_id = $1 AND period_start = $2
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .bind(InvoicingRecordStatus::Failed.as_str())
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoicing_record(
        &self,
        client_id: Uuid,
        period_start: NaiveDate,
    ) -> Result<Option<InvoicingRecord>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoicing_record"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoicingRecordRow>(
            r#"
            SELECT client_id, period_start, status, invoice_id, error_message, claimed_utc, updated_utc
            FROM invoicing_records
            WHERE client_id = $1 AND period_start = $2
            "#,
        )
        .bind(client_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(InvoicingRecord::try_from).transpose()
    }

    // =========================================================================
    // Cancellation requests
    // =========================================================================

    #[instrument(skip(self, request), fields(client_id = %request.client_id, cancel_type = request.cancel_type.as_str()))]
    async fn insert_cancellation(&self, request: &CancellationRequest) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_cancellation"])
            .start_timer();

        let signer = request.signer.as_ref();
        let result = sqlx::query(concat!(
            "INSERT INTO cancellation_requests (",
            cancellation_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(request.request_id)
        .bind(request.client_id)
        .bind(request.subscription_id)
        .bind(request.cancel_type.as_str())
        .bind(&request.token)
        .bind(&request.reason)
        .bind(request.requested_at)
        .bind(request.signed_at)
        .bind(signer.map(|s| s.name.as_str()))
        .bind(signer.map(|s| s.email.as_str()))
        .bind(signer.and_then(|s| s.ip_address.as_deref()))
        .bind(request.effective_at)
        .bind(request.processed)
        .execute(&self.pool)
        .await;

        timer.observe_duration();
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(BillingError::Conflict(format!(
                "client {} already has an open {} cancellation",
                request.client_id,
                request.cancel_type.as_str()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, token))]
    async fn get_cancellation_by_token(&self, token: &str) -> Result<Option<CancellationRequest>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_cancellation_by_token"])
            .start_timer();

        let row = sqlx::query_as::<_, CancellationRow>(concat!(
            "SELECT ",
            cancellation_columns!(),
            " FROM cancellation_requests WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(CancellationRequest::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_cancellations(&self, client_id: Uuid) -> Result<Vec<CancellationRequest>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_cancellations"])
            .start_timer();

        let rows = sqlx::query_as::<_, CancellationRow>(concat!(
            "SELECT ",
            cancellation_columns!(),
            " FROM cancellation_requests WHERE client_id = $1 ORDER BY requested_at"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self), fields(cancel_type = cancel_type.as_str()))]
    async fn find_open_cancellation(
        &self,
        client_id: Uuid,
        cancel_type: CancelType,
    ) -> Result<Option<CancellationRequest>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_open_cancellation"])
            .start_timer();

        let row = sqlx::query_as::<_, CancellationRow>(concat!(
            "SELECT ",
            cancellation_columns!(),
            " FROM cancellation_requests WHERE client_id = $1 AND cancel_type = $2 AND NOT processed"
        ))
        .bind(client_id)
        .bind(cancel_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(CancellationRequest::try_from).transpose()
    }

    #[instrument(skip(self, signer, signed_at))]
    async fn sign_cancellation(
        &self,
        request_id: Uuid,
        signed_at: DateTime<Utc>,
        signer: &SignerIdentity,
        effective_at: NaiveDate,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sign_cancellation"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE cancellation_requests
            SET signed_at = $2, signer_name = $3, signer_email = $4, signer_ip = $5, effective_at = $6
            WHERE request_id = $1 AND signed_at IS NULL
            "#,
        )
        .bind(request_id)
        .bind(signed_at)
        .bind(&signer.name)
        .bind(&signer.email)
        .bind(&signer.ip_address)
        .bind(effective_at)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_cancellation_processed(&self, request_id: Uuid) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_cancellation_processed"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE cancellation_requests SET processed = TRUE WHERE request_id = $1 AND NOT processed",
        )
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Quotes and projects
    // =========================================================================

    #[instrument(skip(self, quote), fields(quote_number = %quote.quote_number))]
    async fn insert_quote(&self, quote: &Quote) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_quote"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO quotes (",
            quote_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(quote.quote_id)
        .bind(&quote.quote_number)
        .bind(quote.client_id)
        .bind(Json(&quote.profile))
        .bind(Json(&quote.lines))
        .bind(quote.status.as_str())
        .bind(&quote.signing_session)
        .bind(quote.signed_at)
        .bind(quote.created_utc)
        .bind(quote.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_quote(&self, quote_id: Uuid) -> Result<Option<Quote>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote"])
            .start_timer();

        let row = sqlx::query_as::<_, QuoteRow>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quotes WHERE quote_id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Quote::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_quote_by_number(&self, quote_number: &str) -> Result<Option<Quote>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_quote_by_number"])
            .start_timer();

        let row = sqlx::query_as::<_, QuoteRow>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quotes WHERE quote_number = $1"
        ))
        .bind(quote_number)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Quote::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_quote_for_client(&self, client_id: Uuid) -> Result<Option<Quote>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_quote_for_client"])
            .start_timer();

        let row = sqlx::query_as::<_, QuoteRow>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quotes WHERE client_id = $1 ORDER BY created_utc DESC LIMIT 1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Quote::try_from).transpose()
    }

    #[instrument(skip(self, quote), fields(quote_number = %quote.quote_number))]
    async fn update_quote(&self, quote: &Quote, expected: QuoteStatus) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_quote"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE quotes SET
                client_id = $2, profile = $3, lines = $4, status = $5, signing_session = $6,
                signed_at = $7, updated_utc = $8
            WHERE quote_id = $1 AND status = $9
            "#,
        )
        .bind(quote.quote_id)
        .bind(quote.client_id)
        .bind(Json(&quote.profile))
        .bind(Json(&quote.lines))
        .bind(quote.status.as_str())
        .bind(&quote.signing_session)
        .bind(quote.signed_at)
        .bind(quote.updated_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, project), fields(client_id = %project.client_id))]
    async fn insert_project(&self, project: &Project) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_project"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO projects (project_id, client_id, quote_id, name, tasks, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(project.project_id)
        .bind(project.client_id)
        .bind(project.quote_id)
        .bind(&project.name)
        .bind(Json(&project.tasks))
        .bind(project.created_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_projects(&self, client_id: Uuid) -> Result<Vec<Project>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_projects"])
            .start_timer();

        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT project_id, client_id, quote_id, name, tasks, created_utc
            FROM projects WHERE client_id = $1 ORDER BY created_utc
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Project::from).collect())
    }

    // =========================================================================
    // Supplier orders
    // =========================================================================

    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn insert_order(&self, order: &SupplierOrder) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_order"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO supplier_orders (order_id, client_id, currency, lines, state, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.order_id)
        .bind(order.client_id)
        .bind(&order.currency)
        .bind(Json(&order.lines))
        .bind(order.state.as_str())
        .bind(order.created_utc)
        .bind(order.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: Uuid) -> Result<Option<SupplierOrder>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT order_id, client_id, currency, lines, state, created_utc, updated_utc
            FROM supplier_orders WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(SupplierOrder::try_from).transpose()
    }

    #[instrument(skip(self, now), fields(expected = expected.as_str(), next = next.as_str()))]
    async fn update_order_state(
        &self,
        order_id: Uuid,
        expected: OrderState,
        next: OrderState,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_order_state"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE supplier_orders SET state = $2, updated_utc = $3 WHERE order_id = $1 AND state = $4",
        )
        .bind(order_id)
        .bind(next.as_str())
        .bind(now)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, check), fields(order_id = %check.order_id, matched = check.matched))]
    async fn insert_supplier_check(&self, check: &SupplierInvoiceCheck) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_supplier_check"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO supplier_invoice_checks (
                check_id, order_id, supplier_reference, claimed_total, claimed_currency,
                expected_total, tolerance_percent, matched, mismatch_reasons, checked_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(check.check_id)
        .bind(check.order_id)
        .bind(&check.supplier_reference)
        .bind(check.claimed_total)
        .bind(&check.claimed_currency)
        .bind(check.expected_total)
        .bind(check.tolerance_percent)
        .bind(check.matched)
        .bind(Json(&check.mismatch_reasons))
        .bind(check.checked_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_supplier_checks(&self, order_id: Uuid) -> Result<Vec<SupplierInvoiceCheck>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_supplier_checks"])
            .start_timer();

        let rows = sqlx::query_as::<_, CheckRow>(
            r#"
            SELECT check_id, order_id, supplier_reference, claimed_total, claimed_currency,
                   expected_total, tolerance_percent, matched, mismatch_reasons, checked_utc
            FROM supplier_invoice_checks WHERE order_id = $1 ORDER BY checked_utc
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows.into_iter().map(SupplierInvoiceCheck::from).collect())
    }

    // =========================================================================
    // Mandates
    // =========================================================================

    #[instrument(skip(self, mandate), fields(client_id = %mandate.client_id))]
    async fn insert_mandate(&self, mandate: &Mandate) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_mandate"])
            .start_timer();

        sqlx::query(concat!(
            "INSERT INTO mandates (",
            mandate_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(mandate.mandate_id)
        .bind(mandate.client_id)
        .bind(&mandate.external_id)
        .bind(&mandate.billing_request_id)
        .bind(mandate.status.as_str())
        .bind(mandate.created_utc)
        .bind(mandate.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_mandate_for_client(&self, client_id: Uuid) -> Result<Option<Mandate>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_mandate_for_client"])
            .start_timer();

        let row = sqlx::query_as::<_, MandateRow>(concat!(
            "SELECT ",
            mandate_columns!(),
            " FROM mandates WHERE client_id = $1 ORDER BY created_utc DESC LIMIT 1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Mandate::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_mandate_by_external_id(&self, external_id: &str) -> Result<Option<Mandate>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_mandate_by_external_id"])
            .start_timer();

        let row = sqlx::query_as::<_, MandateRow>(concat!(
            "SELECT ",
            mandate_columns!(),
            " FROM mandates WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Mandate::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_mandate_by_billing_request(
        &self,
        billing_request_id: &str,
    ) -> Result<Option<Mandate>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_mandate_by_billing_request"])
            .start_timer();

        let row = sqlx::query_as::<_, MandateRow>(concat!(
            "SELECT ",
            mandate_columns!(),
            " FROM mandates WHERE billing_request_id = $1"
        ))
        .bind(billing_request_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(Mandate::try_from).transpose()
    }

    #[instrument(skip(self, mandate), fields(mandate_id = %mandate.mandate_id, status = mandate.status.as_str()))]
    async fn update_mandate(&self, mandate: &Mandate) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_mandate"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE mandates SET external_id = $2, billing_request_id = $3, status = $4, updated_utc = $5
            WHERE mandate_id = $1
            "#,
        )
        .bind(mandate.mandate_id)
        .bind(&mandate.external_id)
        .bind(&mandate.billing_request_id)
        .bind(mandate.status.as_str())
        .bind(mandate.updated_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        if result.rows_affected() == 0 {
            return Err(BillingError::not_found("mandate", mandate.mandate_id));
        }
        Ok(())
    }

    // =========================================================================
    // Webhook events
    // =========================================================================

    #[instrument(skip(self))]
    async fn is_event_processed(&self, source: &str, event_id: &str) -> Result<bool> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["is_event_processed"])
            .start_timer();

        let found: Option<(String,)> = sqlx::query_as(
            "SELECT event_id FROM processed_events WHERE source = $1 AND event_id = $2",
        )
        .bind(source)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(found.is_some())
    }

    #[instrument(skip(self, now))]
    async fn mark_event_processed(
        &self,
        source: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_event_processed"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO processed_events (source, event_id, processed_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, event_id) DO NOTHING
            "#,
        )
        .bind(source)
        .bind(event_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }
}
