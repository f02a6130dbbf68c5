use crate::auth::CredentialProvider;
use crate::config::BackendConfig;
use crate::error::ClientError;
use crate::models::{ConsentRecord, ConsentStatus, SecurityStatus, VitalSample};
use crate::subject::SubjectId;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

pub const SECURITY_STATUS_PATH: &str = "/api/security/status";
pub const CONSENT_CHECK_PATH: &str = "/api/consent/check";

/// Request/response calls the monitor makes against the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Historical samples for `subject`, oldest first.
    async fn fetch_history(&self, subject: &SubjectId) -> Result<Vec<VitalSample>, ClientError>;

    async fn security_status(&self) -> Result<SecurityStatus, ClientError>;

    /// Consent state between `subject` and the viewing account. No record
    /// on the backend reads as `ConsentStatus::None`.
    async fn consent_status(&self, subject: &SubjectId, viewer: &str) -> Result<ConsentStatus, ClientError>;
}

/// `BackendApi` over HTTP. Every request carries the bearer credential
/// the provider holds at the time of the call.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ClientError> {
        Self::with_base_url(
            config.rest_base_url(),
            Duration::from_millis(config.request_timeout_ms),
            credentials,
        )
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match self.credentials.authorization_header() {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_history(&self, subject: &SubjectId) -> Result<Vec<VitalSample>, ClientError> {
        let path = subject.history_path();
        let samples: Vec<VitalSample> = self.send_json(&path, self.get(&path)).await?;
        let total = samples.len();

        let accepted: Vec<VitalSample> = samples
            .into_iter()
            .filter(|s| s.validate().is_ok())
            .collect();
        if accepted.len() < total {
            tracing::warn!(
                subject = %subject,
                dropped = total - accepted.len(),
                "History contained out-of-range samples"
            );
        }
        Ok(accepted)
    }

    async fn security_status(&self) -> Result<SecurityStatus, ClientError> {
        self.send_json(SECURITY_STATUS_PATH, self.get(SECURITY_STATUS_PATH))
            .await
    }

    async fn consent_status(&self, subject: &SubjectId, viewer: &str) -> Result<ConsentStatus, ClientError> {
        let request = self
            .get(CONSENT_CHECK_PATH)
            .query(&[("patientId", subject.policy_key()), ("doctorId", viewer)]);
        match self.send_json::<ConsentRecord>(CONSENT_CHECK_PATH, request).await {
            Ok(record) => Ok(record.status),
            Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(ConsentStatus::None)
            }
            Err(e) => Err(e),
        }
    }
}
