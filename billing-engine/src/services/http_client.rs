//! JSON-over-HTTP plumbing shared by the collaborator clients.

use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use service_core::external::ExternalError;
use std::time::Duration;

/// Base URL, optional bearer key and a pooled client for one collaborator.
#[derive(Clone)]
pub struct JsonApi {
    service: &'static str,
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl JsonApi {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::fatal(service, format!("client setup: {}", e)))?;

        Ok(Self {
            service,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ExternalError> {
        let request = self.authorized(self.client.get(self.url(path)));
        self.send(request).await
    }

    pub async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ExternalError> {
        let request = self.authorized(self.client.post(self.url(path))).json(body);
        self.send(request).await
    }

    /// POST whose response body is ignored.
    pub async fn post_empty<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ExternalError> {
        let request = self.authorized(self.client.post(self.url(path))).json(body);
        self.execute(request).await.map(|_| ())
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, ExternalError> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            ExternalError::fatal(self.service, format!("unexpected response body: {}", e))
        })
    }

    async fn execute(&self, request: RequestBuilder) -> Result<String, ExternalError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        tracing::debug!(service = self.service, status = %status, "Collaborator response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(ExternalError::from_status(self.service, status.as_u16(), body))
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ExternalError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ExternalError::retryable(self.service, err.to_string())
        } else {
            ExternalError::fatal(self.service, err.to_string())
        }
    }
}
