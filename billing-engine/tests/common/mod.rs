#![allow(dead_code)]

use async_trait::async_trait;
use billing_engine::config::BillingPolicy;
use billing_engine::models::{
    Client, ClientStatus, CommissionConfig, CreateClient, CreateSubscription, PaymentMethod,
    Subscription,
};
use billing_engine::rules::TaxResolver;
use billing_engine::services::accounting::{ContactProfile, CreateLedgerInvoice, LedgerInvoice};
use billing_engine::services::direct_debit::{AuthorizationFlow, FlowRequest};
use billing_engine::services::signing::{Signer, SigningDocument, SigningSession};
use billing_engine::services::vat_registry::RegistryResult;
use billing_engine::services::{
    AccountingLedger, Clock, DirectDebitProcessor, FixedClock, InMemoryStore, Notification,
    Notifier, SignatureService, Store, VatRegistry,
};
use billing_engine::startup::{AppState, Application, WebhookSecrets};
use billing_engine::workflows::{Collaborators, Engine, EngineSettings};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::Secret;
use service_core::external::{ExternalError, RetryConfig};
use service_core::utils::signature::sign_payload;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

pub const HOME_COUNTRY: &str = "LU";
pub const PUBLIC_BASE_URL: &str = "https://billing.test";
pub const SIGNING_SECRET: &str = "signing-webhook-secret";
pub const DIRECT_DEBIT_SECRET: &str = "direct-debit-webhook-secret";

static INIT_METRICS: Once = Once::new();

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Ledger fake that records every call.
#[derive(Default)]
pub struct FakeLedger {
    pub contacts: Mutex<Vec<ContactProfile>>,
    pub invoices: Mutex<Vec<CreateLedgerInvoice>>,
    pub remote_status: Mutex<HashMap<String, String>>,
    pub payments: Mutex<Vec<(String, Decimal, String)>>,
    pub failing: AtomicBool,
}

impl FakeLedger {
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    pub fn set_status(&self, external_id: &str, status: &str) {
        self.remote_status
            .lock()
            .unwrap()
            .insert(external_id.to_string(), status.to_string());
    }

    pub fn created(&self) -> Vec<CreateLedgerInvoice> {
        self.invoices.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), ExternalError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ExternalError::retryable("accounting", "ledger unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountingLedger for FakeLedger {
    async fn get_or_create_contact(
        &self,
        profile: &ContactProfile,
    ) -> Result<String, ExternalError> {
        self.check()?;
        let mut contacts = self.contacts.lock().unwrap();
        contacts.push(profile.clone());
        Ok(format!("CONTACT-{}", contacts.len()))
    }

    async fn create_invoice(
        &self,
        request: &CreateLedgerInvoice,
    ) -> Result<LedgerInvoice, ExternalError> {
        self.check()?;
        let mut invoices = self.invoices.lock().unwrap();
        invoices.push(request.clone());
        let n = invoices.len();
        Ok(LedgerInvoice {
            id: format!("INV-{}", n),
            number: Some(format!("2024-{:04}", n)),
            status: "draft".to_string(),
        })
    }

    async fn get_invoice(&self, external_id: &str) -> Result<LedgerInvoice, ExternalError> {
        self.check()?;
        let status = self
            .remote_status
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or_else(|| "draft".to_string());
        Ok(LedgerInvoice {
            id: external_id.to_string(),
            number: None,
            status,
        })
    }

    async fn mark_paid(
        &self,
        external_id: &str,
        amount: Decimal,
        _date: NaiveDate,
        reference: &str,
    ) -> Result<(), ExternalError> {
        self.check()?;
        self.payments.lock().unwrap().push((
            external_id.to_string(),
            amount,
            reference.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeDirectDebit {
    pub flows: Mutex<Vec<FlowRequest>>,
    pub cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl DirectDebitProcessor for FakeDirectDebit {
    async fn create_flow(&self, request: &FlowRequest) -> Result<AuthorizationFlow, ExternalError> {
        let mut flows = self.flows.lock().unwrap();
        flows.push(request.clone());
        let n = flows.len();
        Ok(AuthorizationFlow {
            billing_request_id: format!("BRQ{}", n),
            authorization_url: format!("https://pay.test/flow/BRQ{}", n),
        })
    }

    async fn cancel_mandate(&self, mandate_id: &str) -> Result<(), ExternalError> {
        self.cancelled.lock().unwrap().push(mandate_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSigning {
    pub sessions: Mutex<Vec<(Vec<SigningDocument>, Signer)>>,
}

#[async_trait]
impl SignatureService for FakeSigning {
    async fn init_signing_session(
        &self,
        documents: &[SigningDocument],
        signer: &Signer,
    ) -> Result<SigningSession, ExternalError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push((documents.to_vec(), signer.clone()));
        let n = sessions.len();
        Ok(SigningSession {
            session_id: format!("session-{}", n),
            slug: format!("sign-{}", n),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Valid,
    Invalid,
    Down,
}

pub struct FakeVatRegistry {
    pub mode: Mutex<RegistryMode>,
    pub lookups: Mutex<Vec<String>>,
}

impl Default for FakeVatRegistry {
    fn default() -> Self {
        Self {
            mode: Mutex::new(RegistryMode::Valid),
            lookups: Mutex::new(Vec::new()),
        }
    }
}

impl FakeVatRegistry {
    pub fn set(&self, mode: RegistryMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl VatRegistry for FakeVatRegistry {
    async fn check(&self, country_code: &str, number: &str) -> Result<RegistryResult, ExternalError> {
        self.lookups
            .lock()
            .unwrap()
            .push(format!("{}{}", country_code, number));
        match *self.mode.lock().unwrap() {
            RegistryMode::Valid => Ok(RegistryResult {
                valid: true,
                name: Some("Registered SARL".to_string()),
            }),
            RegistryMode::Invalid => Ok(RegistryResult {
                valid: false,
                name: None,
            }),
            RegistryMode::Down => Err(ExternalError::retryable("vat_registry", "timeout")),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn templates(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|n| n.template()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ExternalError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Engine wired to an in-memory store, a settable clock and recording fakes.
pub struct TestApp {
    pub engine: Engine,
    pub store: Arc<InMemoryStore>,
    pub clock: FixedClock,
    pub ledger: Arc<FakeLedger>,
    pub direct_debit: Arc<FakeDirectDebit>,
    pub signing: Arc<FakeSigning>,
    pub vat_registry: Arc<FakeVatRegistry>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn new(today: NaiveDate) -> Self {
        INIT_METRICS.call_once(billing_engine::services::init_metrics);

        let store = Arc::new(InMemoryStore::new());
        let clock = FixedClock::at_date(today);
        let ledger = Arc::new(FakeLedger::default());
        let direct_debit = Arc::new(FakeDirectDebit::default());
        let signing = Arc::new(FakeSigning::default());
        let vat_registry = Arc::new(FakeVatRegistry::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let collaborators = Collaborators {
            ledger: ledger.clone(),
            direct_debit: direct_debit.clone(),
            signing: signing.clone(),
            vat_registry: vat_registry.clone(),
            notifier: notifier.clone(),
        };
        let settings = EngineSettings {
            tax: TaxResolver::new(HOME_COUNTRY, dec!(17)),
            policy: BillingPolicy::default(),
            public_base_url: PUBLIC_BASE_URL.to_string(),
            retry: RetryConfig::no_retry(),
        };
        let clock_handle: Arc<dyn Clock> = Arc::new(clock.clone());
        let engine = Engine::new(store.clone(), clock_handle, collaborators, settings);

        Self {
            engine,
            store,
            clock,
            ledger,
            direct_debit,
            signing,
            vat_registry,
            notifier,
        }
    }

    pub fn set_today(&self, date: NaiveDate) {
        self.clock.set_date(date);
    }

    pub async fn seed_client(&self, input: CreateClient) -> Client {
        let client = Client::new(input, self.clock.now());
        self.store.insert_client(&client).await.unwrap();
        client
    }

    /// Active Luxembourg business.
    pub async fn domestic_client(&self) -> Client {
        self.seed_client(client_input("LU", Some("LU12345678"), ClientStatus::Active))
            .await
    }

    /// Active French business with a reverse-charge VAT id.
    pub async fn french_client(&self) -> Client {
        self.seed_client(client_input("FR", Some("FR12345678"), ClientStatus::Active))
            .await
    }

    pub async fn seed_subscription(
        &self,
        client_id: Uuid,
        monthly_amount: Decimal,
        started_at: NaiveDate,
    ) -> Subscription {
        let subscription = Subscription::new(
            CreateSubscription {
                client_id,
                service_type: "hosting".to_string(),
                description: "Managed hosting".to_string(),
                monthly_amount,
                tax_rate_override: None,
                started_at,
            },
            self.clock.now(),
        );
        self.store.insert_subscription(&subscription).await.unwrap();
        subscription
    }

    pub async fn client(&self, client_id: Uuid) -> Client {
        self.store.get_client(client_id).await.unwrap().unwrap()
    }

    pub fn state(&self) -> AppState {
        AppState {
            engine: self.engine.clone(),
            secrets: WebhookSecrets {
                signing: Secret::new(SIGNING_SECRET.to_string()),
                direct_debit: Secret::new(DIRECT_DEBIT_SECRET.to_string()),
            },
            service_name: "billing-engine-test".to_string(),
        }
    }

    /// Serve the engine over HTTP on a random port and return its base address.
    pub async fn spawn_http(&self) -> String {
        let app = Application::with_state(self.state(), "127.0.0.1:0".parse().unwrap())
            .await
            .expect("Failed to bind test application");
        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            app.run_until_stopped(std::future::pending()).await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }
        address
    }
}

pub fn client_input(country: &str, vat_number: Option<&str>, status: ClientStatus) -> CreateClient {
    CreateClient {
        brand: "northwind".to_string(),
        company_name: format!("Acme {}", country),
        contact_name: "Jo Doe".to_string(),
        email: "billing@acme.test".to_string(),
        country: country.to_string(),
        vat_number: vat_number.map(str::to_string),
        is_business: true,
        status,
        payment_method: PaymentMethod::BankTransfer,
        commission: None,
    }
}

pub fn hybrid_commission() -> CommissionConfig {
    CommissionConfig::Hybrid {
        base_fee: dec!(50),
        threshold: dec!(1000),
        percent: dec!(10),
    }
}

pub fn sign(secret: &str, body: &str) -> String {
    sign_payload(secret, body.as_bytes()).unwrap()
}
