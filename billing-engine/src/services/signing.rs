//! E-signature collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::external::ExternalError;
use std::collections::HashMap;

use super::http_client::JsonApi;

/// Metadata key carrying our quote number on signed documents.
pub const QUOTE_NUMBER_KEY: &str = "quote_number";

#[derive(Debug, Clone, Serialize)]
pub struct SigningDocument {
    pub name: String,
    pub url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Signer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SigningSession {
    pub session_id: String,
    pub slug: String,
}

#[derive(Debug, Serialize)]
struct InitSessionRequest<'a> {
    documents: &'a [SigningDocument],
    signer: &'a Signer,
}

#[async_trait]
pub trait SignatureService: Send + Sync {
    async fn init_signing_session(
        &self,
        documents: &[SigningDocument],
        signer: &Signer,
    ) -> Result<SigningSession, ExternalError>;
}

/// Webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningEvent {
    pub event_id: String,
    /// `submission.completed` is the only type acted on.
    pub event_type: String,
    pub data: SubmissionData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionData {
    pub submission_id: String,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: Vec<SignedDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedDocument {
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SigningEvent {
    pub const SUBMISSION_COMPLETED: &'static str = "submission.completed";

    /// First quote number found in the signed documents' metadata.
    pub fn quote_number(&self) -> Option<&str> {
        self.data
            .documents
            .iter()
            .find_map(|doc| doc.metadata.get(QUOTE_NUMBER_KEY))
            .map(String::as_str)
    }
}

#[derive(Clone)]
pub struct HttpSignatureService {
    api: JsonApi,
}

impl HttpSignatureService {
    pub fn new(api: JsonApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SignatureService for HttpSignatureService {
    #[tracing::instrument(skip(self, documents, signer), fields(documents = documents.len()))]
    async fn init_signing_session(
        &self,
        documents: &[SigningDocument],
        signer: &Signer,
    ) -> Result<SigningSession, ExternalError> {
        self.api
            .post("/submissions", &InitSessionRequest { documents, signer })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_number_is_read_from_document_metadata() {
        let body = r#"{
            "event_id": "evt_1",
            "event_type": "submission.completed",
            "data": {
                "submission_id": "sub_1",
                "completed_at": "2025-01-15T10:00:00Z",
                "documents": [
                    {"name": "terms.pdf"},
                    {"name": "quote.pdf", "metadata": {"quote_number": "Q-2025-001"}}
                ]
            }
        }"#;
        let event: SigningEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.event_type, SigningEvent::SUBMISSION_COMPLETED);
        assert_eq!(event.quote_number(), Some("Q-2025-001"));
    }
}
