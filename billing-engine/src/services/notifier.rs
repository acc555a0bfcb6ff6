//! Outbound client notifications.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use service_core::external::ExternalError;

use super::http_client::JsonApi;
use crate::models::CancelType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Signing link for a freshly initiated cancellation.
    CancellationRequested {
        to: String,
        company_name: String,
        cancel_type: CancelType,
        signing_url: String,
        effective_at: NaiveDate,
    },
    /// Confirmation once the cancellation is signed.
    CancellationSigned {
        to: String,
        company_name: String,
        cancel_type: CancelType,
        effective_at: NaiveDate,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::CancellationRequested { to, .. }
            | Notification::CancellationSigned { to, .. } => to,
        }
    }

    pub fn template(&self) -> &'static str {
        match self {
            Notification::CancellationRequested { .. } => "cancellation_requested",
            Notification::CancellationSigned { .. } => "cancellation_signed",
        }
    }

    fn subject(&self) -> String {
        match self {
            Notification::CancellationRequested { company_name, .. } => {
                format!("Please sign the cancellation for {}", company_name)
            }
            Notification::CancellationSigned { company_name, .. } => {
                format!("Cancellation confirmed for {}", company_name)
            }
        }
    }

    fn body(&self) -> String {
        let scope = |t: &CancelType| match t {
            CancelType::Client => "your account",
            CancelType::Service => "the selected service",
        };
        match self {
            Notification::CancellationRequested {
                cancel_type,
                signing_url,
                effective_at,
                ..
            } => format!(
                "A cancellation of {} was requested. Sign it at {} . Provisional effective date: {}.",
                scope(cancel_type),
                signing_url,
                effective_at
            ),
            Notification::CancellationSigned {
                cancel_type,
                effective_at,
                ..
            } => format!(
                "The cancellation of {} is signed and takes effect on {}. Billing continues until then.",
                scope(cancel_type),
                effective_at
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ExternalError>;
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    template: &'a str,
    subject: String,
    body: String,
}

/// Posts messages to a mail relay.
#[derive(Clone)]
pub struct HttpNotifier {
    api: JsonApi,
}

impl HttpNotifier {
    pub fn new(api: JsonApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(skip(self, notification), fields(template = notification.template()))]
    async fn send(&self, notification: &Notification) -> Result<(), ExternalError> {
        let message = RelayMessage {
            to: notification.recipient(),
            template: notification.template(),
            subject: notification.subject(),
            body: notification.body(),
        };
        self.api.post_empty("/messages", &message).await
    }
}

/// Logs instead of sending; used when no relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), ExternalError> {
        tracing::info!(
            template = notification.template(),
            to = notification.recipient(),
            subject = %notification.subject(),
            "Notification not delivered: no relay configured"
        );
        Ok(())
    }
}
