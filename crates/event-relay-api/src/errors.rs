//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use event_relay_core::{IngestError, RetryError, StorageError, StoreStatus};
use tracing::{error, warn};

/// Handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: missing or malformed input
/// - `401 Unauthorized`: webhook signature did not verify
/// - `403 Forbidden`: tenant is not accepting events
/// - `404 Not Found`: the addressed record does not exist
/// - `500 Internal Server Error`: storage or cipher faults
///
/// Internal details are logged server-side; clients get a generic message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid signature")]
    Unauthorized,

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Store not active")]
    StoreNotActive { status: StoreStatus },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::StoreNotActive { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::Unauthorized => Self::Unauthorized,
            IngestError::InvalidPayload { reason } => Self::BadRequest {
                message: format!("Invalid payload: {}", reason),
            },
            IngestError::StoreNotActive { status } => Self::StoreNotActive { status },
            IngestError::Storage(e) => Self::Internal {
                message: e.to_string(),
            },
            IngestError::Cipher(e) => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        Self::Internal {
            message: error.to_string(),
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(error: RetryError) -> Self {
        match error {
            RetryError::NotFound(id) => Self::NotFound {
                message: format!("Event not found: {}", id),
            },
            RetryError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            Self::Internal { message } => {
                error!(error = %message, "Internal server error occurred");
                serde_json::json!({
                    "error": "Internal server error",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })
            }
            Self::StoreNotActive { status: store_status } => {
                warn!(store_status = %store_status, "Rejected event for inactive store");
                serde_json::json!({
                    "error": self.to_string(),
                    "status": store_status,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })
            }
            _ => serde_json::json!({
                "error": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),

    #[error("Failed to bind to {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
