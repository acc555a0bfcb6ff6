//! Services module for billing-engine: storage, time, metrics and collaborator clients.

pub mod accounting;
pub mod clock;
pub mod database;
pub mod direct_debit;
pub mod http_client;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod signing;
pub mod store;
pub mod vat_registry;

pub use accounting::{AccountingLedger, HttpAccountingLedger};
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgStore;
pub use direct_debit::{DirectDebitProcessor, HttpDirectDebit};
pub use http_client::JsonApi;
pub use memory::InMemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{HttpNotifier, LogNotifier, Notification, Notifier};
pub use signing::{HttpSignatureService, SignatureService};
pub use store::Store;
pub use vat_registry::{HttpVatRegistry, VatRegistry};
