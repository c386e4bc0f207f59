//! Client for the IAM provider's action dispatch gateway.
//!
//! Every provider call is `POST {gateway}/dispatch` with `{"type": action, "payload": ...}`.
//! Successful responses carry the answer under `result`; failures carry
//! `{"error": {"code", "message"}}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Provider rejected request: {code}: {message}")]
    Rejected { code: String, message: String },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider connection error: {0}")]
    Connection(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Invalid provider configuration: {0}")]
    Configuration(String),
}

/// Provider action dispatch.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Run `action` with `payload` and return the `result` value.
    async fn dispatch(&self, action: &str, payload: Value) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Serialize)]
struct DispatchRequest<'a> {
    #[serde(rename = "type")]
    action: &'a str,
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct DispatchError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DispatchResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<DispatchError>,
}

#[derive(Clone)]
pub struct HttpUpstreamClient {
    http: Client,
    endpoint: Url,
    key: String,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let gateway = Url::parse(&config.gateway)
            .map_err(|e| UpstreamError::Configuration(format!("gateway {}: {}", config.gateway, e)))?;
        let endpoint = gateway
            .join("/dispatch")
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            key: config.key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Connection(e.to_string())
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn dispatch(&self, action: &str, payload: Value) -> Result<Value, UpstreamError> {
        debug!(action, "Dispatching provider action");

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, &self.key)
            .json(&DispatchRequest { action, payload })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body: DispatchResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("{} ({})", e, status)))?;

        if let Some(error) = body.error {
            let rejected = UpstreamError::Rejected {
                code: error.code.unwrap_or_else(|| "GLOBAL.ERROR".to_string()),
                message: error.message.unwrap_or_else(|| status.to_string()),
            };
            warn!(action, error = %rejected, "Provider action failed");
            return Err(rejected);
        }
        if !status.is_success() {
            return Err(UpstreamError::InvalidResponse(format!("status {}", status)));
        }

        Ok(body.result)
    }
}
