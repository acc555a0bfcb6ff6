//! VAT registry lookup (VIES-style REST).

use async_trait::async_trait;
use serde::Deserialize;
use service_core::external::{non_critical, ExternalError};

use super::http_client::JsonApi;
use crate::rules::tax::{RegistryVerdict, VatId};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryResult {
    #[serde(rename = "isValid")]
    pub valid: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait VatRegistry: Send + Sync {
    async fn check(&self, country_code: &str, number: &str) -> Result<RegistryResult, ExternalError>;
}

/// Best-effort lookup: a failed call becomes `Unavailable`, never an error.
pub async fn lookup(registry: &dyn VatRegistry, vat_id: &VatId) -> RegistryVerdict {
    let result = registry.check(&vat_id.prefix, &vat_id.number).await;
    match non_critical("vat_registry_check", result) {
        Some(RegistryResult { valid: true, .. }) => RegistryVerdict::Valid,
        Some(RegistryResult { valid: false, .. }) => RegistryVerdict::Invalid,
        None => RegistryVerdict::Unavailable,
    }
}

#[derive(Clone)]
pub struct HttpVatRegistry {
    api: JsonApi,
}

impl HttpVatRegistry {
    pub fn new(api: JsonApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl VatRegistry for HttpVatRegistry {
    #[tracing::instrument(skip(self))]
    async fn check(&self, country_code: &str, number: &str) -> Result<RegistryResult, ExternalError> {
        self.api
            .get(&format!("/ms/{}/vat/{}", country_code, number))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Down;

    #[async_trait]
    impl VatRegistry for Down {
        async fn check(&self, _: &str, _: &str) -> Result<RegistryResult, ExternalError> {
            Err(ExternalError::retryable("vat_registry", "timeout"))
        }
    }

    struct Says(bool);

    #[async_trait]
    impl VatRegistry for Says {
        async fn check(&self, _: &str, _: &str) -> Result<RegistryResult, ExternalError> {
            Ok(RegistryResult {
                valid: self.0,
                name: None,
            })
        }
    }

    #[tokio::test]
    async fn lookup_maps_outcomes_to_verdicts() {
        let id = VatId::parse("FR12345678").unwrap();
        assert_eq!(lookup(&Says(true), &id).await, RegistryVerdict::Valid);
        assert_eq!(lookup(&Says(false), &id).await, RegistryVerdict::Invalid);
        assert_eq!(lookup(&Down, &id).await, RegistryVerdict::Unavailable);
    }

    #[test]
    fn registry_response_parses() {
        let result: RegistryResult =
            serde_json::from_str(r#"{"isValid": true, "name": "ACME SARL"}"#).unwrap();
        assert!(result.valid);
        assert_eq!(result.name.as_deref(), Some("ACME SARL"));
    }
}
