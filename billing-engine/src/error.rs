//! Error taxonomy for the billing engine.

use service_core::error::AppError;
use service_core::external::ExternalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad input shape; nothing was applied.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation was already performed or raced with another writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A state machine rejected the event in its current state.
    #[error("Cannot apply {event} to {entity} in state {from}")]
    IllegalTransition {
        entity: &'static str,
        from: &'static str,
        event: &'static str,
    },

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("Store error: {0}")]
    Store(anyhow::Error),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        BillingError::Store(err.into())
    }

    /// Short label used for metrics and run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "validation",
            BillingError::NotFound { .. } => "not_found",
            BillingError::Conflict(_) => "conflict",
            BillingError::IllegalTransition { .. } => "illegal_transition",
            BillingError::External(e) if e.is_retryable() => "external_retryable",
            BillingError::External(_) => "external_fatal",
            BillingError::Store(_) => "store",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Store(anyhow::Error::new(err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ BillingError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(e.to_string())),
            BillingError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            e @ BillingError::IllegalTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            BillingError::External(e) => AppError::from(e),
            BillingError::Store(e) => AppError::DatabaseError(e),
        }
    }
}

pub type Result<T, E = BillingError> = std::result::Result<T, E>;
