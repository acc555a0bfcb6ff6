//! Outcome classification and retry for calls to external collaborators.
//!
//! Every call to an accounting ledger, payment processor, signature service or
//! registry resolves to `Ok`, a retryable failure or a fatal failure. Batch
//! jobs use the classification to decide whether an entity is worth another
//! attempt on the next run; `call_with_retry` retries retryable failures in place.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

/// Whether a failed external call may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, 5xx, rate limiting, connection errors.
    Retryable,
    /// Rejected input, unknown resource, auth failure.
    Fatal,
}

/// A failed call to an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalError {
    pub service: &'static str,
    pub kind: FailureKind,
    pub message: String,
}

impl ExternalError {
    pub fn retryable(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn fatal(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    /// Classify an HTTP status returned by a collaborator.
    pub fn from_status(service: &'static str, status: u16, body: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, body.into());
        if status == 408 || status == 429 || status >= 500 {
            Self::retryable(service, message)
        } else {
            Self::fatal(service, message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Retryable => "retryable",
            FailureKind::Fatal => "fatal",
        };
        write!(f, "{} call failed ({}): {}", self.service, kind, self.message)
    }
}

impl std::error::Error for ExternalError {}

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Smaller backoffs for calls on an interactive request path.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = (backoff_ms as f64 * 0.25 * rand::thread_rng().gen_range(0.0..1.0)) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

/// Execute an external call, retrying retryable failures with backoff.
///
/// Fatal failures are returned immediately.
pub async fn call_with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    f: F,
) -> Result<T, ExternalError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "External call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => {
                warn!(
                    operation = operation_name,
                    service = err.service,
                    error = %err.message,
                    "External call failed with fatal error, not retrying"
                );
                return Err(err);
            }
            Err(err) if attempt >= config.max_retries => {
                warn!(
                    operation = operation_name,
                    service = err.service,
                    attempt = attempt + 1,
                    error = %err.message,
                    "External call failed after max retries"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = config.backoff_duration(attempt);
                warn!(
                    operation = operation_name,
                    service = err.service,
                    attempt = attempt + 1,
                    error = %err.message,
                    backoff_ms = backoff.as_millis() as u64,
                    "External call failed, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Swallow the failure of a step that must not abort the surrounding work.
///
/// The failure is logged with the operation name and `None` is returned.
pub fn non_critical<T>(operation_name: &str, result: Result<T, ExternalError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                operation = operation_name,
                service = err.service,
                retryable = err.is_retryable(),
                error = %err.message,
                "Non-critical external step failed, continuing"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_duration() {
        let config = RetryConfig {
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(2), Duration::from_millis(400));
    }

    #[test]
    fn test_status_classification() {
        assert!(ExternalError::from_status("ledger", 503, "down").is_retryable());
        assert!(ExternalError::from_status("ledger", 429, "slow down").is_retryable());
        assert!(!ExternalError::from_status("ledger", 422, "bad line").is_retryable());
        assert!(!ExternalError::from_status("ledger", 404, "missing").is_retryable());
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry(&RetryConfig::quick(), "test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExternalError::fatal("ledger", "rejected")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_recovers() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            add_jitter: false,
            ..RetryConfig::quick()
        };
        let result = call_with_retry(&config, "test_op", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ExternalError::retryable("ledger", "timeout"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_non_critical_swallows_failure() {
        let result: Option<u8> =
            non_critical("registry_check", Err(ExternalError::retryable("vies", "down")));
        assert!(result.is_none());
    }
}
