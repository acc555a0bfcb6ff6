//! Direct-debit mandate and payment processor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_core::external::ExternalError;
use std::collections::HashMap;

use super::http_client::JsonApi;

#[derive(Debug, Clone, Serialize)]
pub struct FlowRequest {
    /// Our client id, echoed back in mandate events.
    pub client_reference: String,
    pub company_name: String,
    pub email: String,
    pub redirect_url: String,
}

/// Hosted authorization page for a new mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationFlow {
    pub billing_request_id: String,
    pub authorization_url: String,
}

#[async_trait]
pub trait DirectDebitProcessor: Send + Sync {
    /// Create a billing request and its hosted flow.
    async fn create_flow(&self, request: &FlowRequest) -> Result<AuthorizationFlow, ExternalError>;

    async fn cancel_mandate(&self, mandate_id: &str) -> Result<(), ExternalError>;
}

/// Webhook body: a batch of events.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectDebitWebhook {
    pub events: Vec<DirectDebitEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectDebitEvent {
    pub id: String,
    /// `mandates` or `payments`
    pub resource_type: String,
    pub action: String,
    #[serde(default)]
    pub links: EventLinks,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DirectDebitEvent {
    /// `resource_type.action`, e.g. `payments.confirmed`.
    pub fn kind(&self) -> String {
        format!("{}.{}", self.resource_type, self.action)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLinks {
    pub mandate: Option<String>,
    pub payment: Option<String>,
    pub billing_request: Option<String>,
}

#[derive(Clone)]
pub struct HttpDirectDebit {
    api: JsonApi,
}

impl HttpDirectDebit {
    pub fn new(api: JsonApi) -> Self {
        Self { api }
    }
}

#[derive(Debug, Serialize)]
struct EmptyBody {}

#[async_trait]
impl DirectDebitProcessor for HttpDirectDebit {
    #[tracing::instrument(skip(self, request), fields(client_reference = %request.client_reference))]
    async fn create_flow(&self, request: &FlowRequest) -> Result<AuthorizationFlow, ExternalError> {
        self.api.post("/billing_request_flows", request).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_mandate(&self, mandate_id: &str) -> Result<(), ExternalError> {
        self.api
            .post_empty(&format!("/mandates/{}/actions/cancel", mandate_id), &EmptyBody {})
            .await
    }
}
