//! Thin REST client for the two endpoints this layer reads: the command
//! output tail and the health check.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::SyncConfig;
use crate::poll::{Cursor, PollPage};

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("config error: {0}")]
    Config(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        if value.is_decode() {
            return Self::InvalidResponse(value.to_string());
        }
        Self::Request(value.to_string())
    }
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Config(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// One line of command output as served by the tail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub offset: u64,
    pub text: String,
    #[serde(default)]
    pub stream: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self, ApiError> {
        Self::with_timeout(config.api_base(), config.api_key.clone(), config.request_timeout())
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::Config("base url cannot be empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        trace!(path, "GET");
        let response = self.get(path).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// Output lines of `command_id` strictly after `cursor`.
    pub async fn fetch_command_output(
        &self,
        command_id: &str,
        cursor: Option<Cursor>,
    ) -> Result<PollPage<OutputLine>, ApiError> {
        let path = format!("/api/commands/{}/output", urlencoding::encode(command_id));
        let query: Vec<(&str, String)> = cursor
            .map(|cursor| vec![("cursor", cursor.value().to_string())])
            .unwrap_or_default();
        self.get_json(&path, &query).await
    }

    /// Status code of the health endpoint. Transport failures are errors;
    /// any HTTP response, successful or not, is returned as a status.
    pub async fn health(&self) -> Result<StatusCode, ApiError> {
        let response = self.get("/api/health").send().await?;
        Ok(response.status())
    }
}
