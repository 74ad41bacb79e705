use crate::config::AppConfig;
use crate::types::{BackendRequest, BackendResponse};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::debug;

/// Outcome of one backend call that didn't produce labels.
#[derive(Debug)]
pub enum BackendError {
    /// The backend is already serving another call (HTTP 429). Handled by the
    /// dispatcher's backoff loop, never surfaced to clients.
    Throttled,
    NetworkError(reqwest::Error),
    HttpError {
        status: reqwest::StatusCode,
        body: String,
    },
    ParseError(reqwest::Error),
}

impl BackendError {
    pub fn message(&self) -> String {
        match self {
            BackendError::Throttled => "Backend throttled".to_string(),
            BackendError::NetworkError(e) => format!("Network error: {e}"),
            BackendError::HttpError { status, body } => format!("HTTP {status}: {body}"),
            BackendError::ParseError(e) => format!("Parse error: {e}"),
        }
    }
}

/// The dispatcher is the only caller, and it issues exactly one call at a
/// time. Trait so tests can script outcomes without a live backend.
#[async_trait]
pub trait ClassifyBackend: Send + Sync {
    async fn classify(&self, sequences: &[String]) -> Result<Vec<String>, BackendError>;
}

/// reqwest-backed client for the real classification service.
pub struct HttpBackendClient {
    client: reqwest::Client,
    backend_url: String,
}

impl HttpBackendClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        // One keep-alive connection is all we need: the backend serves a
        // single call at a time and so does the dispatcher.
        let client = reqwest::Client::builder()
            .timeout(config.backend_timeout())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            backend_url: config.backend_url.clone(),
        })
    }
}

#[async_trait]
impl ClassifyBackend for HttpBackendClient {
    async fn classify(&self, sequences: &[String]) -> Result<Vec<String>, BackendError> {
        debug!(
            "Calling classification backend {} with {} sequences",
            self.backend_url,
            sequences.len()
        );

        let request = BackendRequest {
            sequences: sequences.to_vec(),
        };

        let response = self
            .client
            .post(&self.backend_url)
            .json(&request)
            .send()
            .await
            .map_err(BackendError::NetworkError)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            // body is irrelevant, the batch just gets retried
            return Err(BackendError::Throttled);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpError { status, body });
        }

        let parsed: BackendResponse = response.json().await.map_err(BackendError::ParseError)?;
        Ok(parsed.results)
    }
}
