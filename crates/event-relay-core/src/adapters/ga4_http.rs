//! # GA4 Measurement Protocol Sink
//!
//! [`AnalyticsSink`] implementation over HTTP using `reqwest`.
//!
//! Every response body is read in full before classification, because the
//! validation endpoint reports problems inside a 2xx body.

use crate::dispatch::{AnalyticsSink, Ga4Credentials, SinkError, SinkResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Production collection endpoint.
pub const GA4_COLLECT_URL: &str = "https://www.google-analytics.com/mp/collect";

/// Validation (debug) endpoint.
pub const GA4_DEBUG_URL: &str = "https://www.google-analytics.com/debug/mp/collect";

/// Endpoint and timeout settings for [`Ga4HttpSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ga4SinkConfig {
    pub collect_url: String,
    pub debug_url: String,
    pub timeout: Duration,
}

impl Default for Ga4SinkConfig {
    fn default() -> Self {
        Self {
            collect_url: GA4_COLLECT_URL.to_string(),
            debug_url: GA4_DEBUG_URL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the GA4 Measurement Protocol.
#[derive(Debug, Clone)]
pub struct Ga4HttpSink {
    client: reqwest::Client,
    config: Ga4SinkConfig,
}

impl Ga4HttpSink {
    /// Build the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Transport`] if the HTTP client cannot be created.
    pub fn new(config: Ga4SinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("event-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Transport {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    async fn post(
        &self,
        url: &str,
        credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError> {
        let response = self
            .client
            .post(url)
            .query(&[
                ("measurement_id", credentials.measurement_id.as_str()),
                ("api_secret", credentials.api_secret.as_str()),
            ])
            .json(payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        debug!(status, body_len = body.len(), "GA4 responded");
        Ok(SinkResponse { status, body })
    }

    fn classify(&self, error: reqwest::Error) -> SinkError {
        if error.is_timeout() {
            SinkError::Timeout {
                timeout_ms: self.config.timeout.as_millis() as u64,
            }
        } else {
            // Strip the URL so the api secret in the query never leaks into logs
            SinkError::Transport {
                message: error.without_url().to_string(),
            }
        }
    }
}

#[async_trait]
impl AnalyticsSink for Ga4HttpSink {
    #[instrument(skip(self, credentials, payload), fields(measurement_id = %credentials.measurement_id))]
    async fn send(
        &self,
        credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError> {
        self.post(&self.config.collect_url, credentials, payload).await
    }

    #[instrument(skip(self, credentials, payload), fields(measurement_id = %credentials.measurement_id))]
    async fn validate(
        &self,
        credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError> {
        let response = self.post(&self.config.debug_url, credentials, payload).await?;

        if !response.is_success() {
            return Err(SinkError::InvalidResponse {
                status: response.status,
                message: response.body,
            });
        }

        let has_messages = serde_json::from_str::<Value>(&response.body)
            .ok()
            .and_then(|body| body.get("validationMessages").cloned())
            .and_then(|messages| messages.as_array().map(|m| !m.is_empty()))
            .unwrap_or(false);

        if has_messages {
            return Err(SinkError::InvalidResponse {
                status: response.status,
                message: response.body,
            });
        }

        Ok(response)
    }
}

#[cfg(test)]
#[path = "ga4_http_tests.rs"]
mod tests;
