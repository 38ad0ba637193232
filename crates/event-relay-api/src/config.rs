//! Configuration types for the HTTP service

use event_relay_core::{
    webhook::DEFAULT_SIGNATURE_HEADER, ChaChaTokenCipher, DispatchConfig, Ga4SinkConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Inclusive bounds for the outbound sink timeout, in seconds.
pub const SINK_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=9;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook intake settings
    pub webhook: WebhookConfig,

    /// Dispatch worker pool and sink settings
    pub dispatch: DispatchSettings,

    /// Token encryption settings
    pub security: SecurityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the configuration before the service starts.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook.secret.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                key: "webhook.secret".to_string(),
            });
        }

        if !self.webhook.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhook.endpoint_path must start with '/': {}",
                    self.webhook.endpoint_path
                ),
            });
        }

        if self.webhook.signature_header.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                key: "webhook.signature_header".to_string(),
            });
        }

        if !SINK_TIMEOUT_RANGE.contains(&self.dispatch.sink_timeout_seconds) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "dispatch.sink_timeout_seconds must be between {} and {}, got {}",
                    SINK_TIMEOUT_RANGE.start(),
                    SINK_TIMEOUT_RANGE.end(),
                    self.dispatch.sink_timeout_seconds
                ),
            });
        }

        if self.dispatch.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "dispatch.workers must be greater than zero".to_string(),
            });
        }

        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "dispatch.queue_capacity must be greater than zero".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }

        self.security.cipher()?;
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout_seconds: 30,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Webhook intake configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Header carrying the HMAC digest
    pub signature_header: String,

    /// Accept a digest in `Authorization` when the signature header is absent
    pub allow_authorization_signature: bool,

    /// Shared HMAC secret
    pub secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/salla".to_string(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            allow_authorization_signature: true,
            secret: String::new(),
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("endpoint_path", &self.endpoint_path)
            .field("signature_header", &self.signature_header)
            .field(
                "allow_authorization_signature",
                &self.allow_authorization_signature,
            )
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Dispatch worker pool and GA4 endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Number of dispatch workers
    pub workers: usize,

    /// Jobs the queue holds before submissions are dropped
    pub queue_capacity: usize,

    /// Per-request timeout for the analytics sink
    pub sink_timeout_seconds: u64,

    /// GA4 collection endpoint
    pub collect_url: String,

    /// GA4 validation endpoint
    pub debug_url: String,
}

impl DispatchSettings {
    pub fn pool(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn sink(&self) -> Ga4SinkConfig {
        Ga4SinkConfig {
            collect_url: self.collect_url.clone(),
            debug_url: self.debug_url.clone(),
            timeout: Duration::from_secs(self.sink_timeout_seconds),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let pool = DispatchConfig::default();
        let sink = Ga4SinkConfig::default();
        Self {
            workers: pool.workers,
            queue_capacity: pool.queue_capacity,
            sink_timeout_seconds: sink.timeout.as_secs(),
            collect_url: sink.collect_url,
            debug_url: sink.debug_url,
        }
    }
}

/// Token encryption configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Identifier written into every ciphertext envelope
    pub key_id: String,

    /// Base64 encoded 32-byte key
    pub encryption_key: String,
}

impl SecurityConfig {
    /// Build the token cipher from the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] for an empty key and
    /// [`ConfigError::Invalid`] when the key does not decode to 32 bytes.
    pub fn cipher(&self) -> Result<ChaChaTokenCipher, ConfigError> {
        if self.encryption_key.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                key: "security.encryption_key".to_string(),
            });
        }

        ChaChaTokenCipher::from_base64(self.key_id.clone(), self.encryption_key.trim()).map_err(
            |e| ConfigError::Invalid {
                message: format!("security.encryption_key: {}", e),
            },
        )
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_id: "v1".to_string(),
            encryption_key: String::new(),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("key_id", &self.key_id)
            .field("encryption_key", &"<REDACTED>")
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    MissingValue { key: String },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
