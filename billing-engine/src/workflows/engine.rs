//! Shared context handed to every workflow.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use service_core::external::{call_with_retry, non_critical, ExternalError, RetryConfig};
use uuid::Uuid;

use crate::config::BillingPolicy;
use crate::error::{BillingError, Result};
use crate::models::Client;
use crate::rules::TaxResolver;
use crate::services::metrics::record_external_failure;
use crate::services::{
    AccountingLedger, Clock, DirectDebitProcessor, Notifier, SignatureService, Store, VatRegistry,
};

/// External systems the workflows talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn AccountingLedger>,
    pub direct_debit: Arc<dyn DirectDebitProcessor>,
    pub signing: Arc<dyn SignatureService>,
    pub vat_registry: Arc<dyn VatRegistry>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tax: TaxResolver,
    pub policy: BillingPolicy,
    /// Base URL for links sent to clients (cancellation signing).
    pub public_base_url: String,
    /// Retry policy for critical collaborator calls.
    pub retry: RetryConfig,
}

#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) collaborators: Collaborators,
    pub(crate) settings: EngineSettings,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            collaborators,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub(crate) async fn load_client(&self, client_id: Uuid) -> Result<Client> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or_else(|| BillingError::not_found("client", client_id))
    }

    /// Run a critical collaborator call under the configured retry policy.
    pub(crate) async fn critical<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ExternalError>>,
    {
        call_with_retry(&self.settings.retry, operation, f)
            .await
            .map_err(|e| {
                let kind = if e.is_retryable() { "retryable" } else { "fatal" };
                record_external_failure(e.service, kind);
                BillingError::External(e)
            })
    }
}

/// Pass a non-critical step's result through `non_critical`, counting the
/// failure.
pub(crate) fn best_effort<T>(
    operation: &str,
    result: std::result::Result<T, ExternalError>,
) -> Option<T> {
    if let Err(e) = &result {
        record_external_failure(e.service, "non_critical");
    }
    non_critical(operation, result)
}
