//! # Dispatch Module
//!
//! Maps stored events to the analytics sink's wire payload, performs the
//! delivery and records the outcome on the event record.
//!
//! Dispatch never returns an error to its caller. Every failure is
//! translated into a `skipped` or `failed` status with a coded reason in
//! `last_error`, so the only place a dispatch problem is visible is the
//! stored record.

use crate::events::{EventPatch, EventRecord, NormalizedEvent};
use crate::store::{
    EventFilter, EventRepository, SinkSettingsRepository, StorageError, StoreStatus,
    TenantRepository,
};
use crate::RecordId;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

pub mod ga4;
pub mod worker;

pub use worker::{DispatchConfig, DispatchJob, DispatchQueue, DispatchWorkers, QueueRejected};

/// Platform tag recorded in `last_platform`.
pub const GA4_PLATFORM: &str = "ga4";

/// The only event type forwarded to the sink.
pub const DISPATCHABLE_EVENT_TYPE: &str = "order.created";

/// Reason code for an event whose order object is missing.
pub const ORDER_PAYLOAD_MISSING: &str = "ORDER_PAYLOAD_MISSING";

// ============================================================================
// Sink Interface
// ============================================================================

/// Destination credentials passed to the sink with every call.
#[derive(Clone, PartialEq, Eq)]
pub struct Ga4Credentials {
    pub measurement_id: String,
    pub api_secret: String,
}

impl fmt::Debug for Ga4Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ga4Credentials")
            .field("measurement_id", &self.measurement_id)
            .field("api_secret", &"<REDACTED>")
            .finish()
    }
}

/// Response read in full from the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkResponse {
    pub status: u16,
    pub body: String,
}

impl SinkResponse {
    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors raised by an analytics sink before a usable response is obtained
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Sink transport error: {message}")]
    Transport { message: String },

    #[error("Sink rejected request with status {status}: {message}")]
    InvalidResponse { status: u16, message: String },
}

/// Outbound analytics collection endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Deliver a payload to the collection endpoint.
    ///
    /// A non-2xx answer is returned as a response, not an error.
    async fn send(
        &self,
        credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError>;

    /// Submit a payload to the validation endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidResponse`] when the endpoint reports
    /// validation messages, even with a 2xx status.
    async fn validate(
        &self,
        credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError>;
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why an event was not eligible for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    StoreUninstalled,
    EventTypeUnsupported,
    SettingsNotFound,
    EventDisabled,
    NotConfigured,
}

impl SkipReason {
    /// Code recorded in `last_error`
    pub fn code(&self) -> &'static str {
        match self {
            Self::StoreUninstalled => "STORE_UNINSTALLED",
            Self::EventTypeUnsupported => "EVENT_TYPE_UNSUPPORTED",
            Self::SettingsNotFound => "GA4_SETTINGS_NOT_FOUND",
            Self::EventDisabled => "EVENT_DISABLED",
            Self::NotConfigured => "GA4_NOT_CONFIGURED",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Terminal classification of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { http_status: u16 },
    Failed {
        http_status: Option<u16>,
        error: String,
    },
    Skipped(SkipReason),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Errors from a manual retry request
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Event record not found: {0}")]
    NotFound(RecordId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Delivers stored events to the analytics sink.
#[derive(Clone)]
pub struct Dispatcher {
    events: Arc<dyn EventRepository>,
    tenants: Arc<dyn TenantRepository>,
    settings: Arc<dyn SinkSettingsRepository>,
    sink: Arc<dyn AnalyticsSink>,
}

impl Dispatcher {
    pub fn new(
        events: Arc<dyn EventRepository>,
        tenants: Arc<dyn TenantRepository>,
        settings: Arc<dyn SinkSettingsRepository>,
        sink: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            events,
            tenants,
            settings,
            sink,
        }
    }

    /// Dispatch one stored event and record the outcome.
    #[instrument(
        skip(self, event),
        fields(store_id = %event.store_id, event_type = %event.event_type)
    )]
    pub async fn dispatch(&self, event: &NormalizedEvent, record_id: &RecordId) -> DispatchOutcome {
        let (outcome, patch) = self.classify_and_send(event).await;

        match &outcome {
            DispatchOutcome::Sent { http_status } => {
                info!(record_id = %record_id, http_status, "Event delivered to GA4");
            }
            DispatchOutcome::Failed { http_status, error } => {
                warn!(
                    record_id = %record_id,
                    http_status = ?http_status,
                    error = %error,
                    "GA4 delivery failed"
                );
            }
            DispatchOutcome::Skipped(reason) => {
                info!(record_id = %record_id, reason = %reason, "Event skipped");
            }
        }

        if let Err(e) = self.events.update_by_key(record_id, &patch).await {
            error!(
                record_id = %record_id,
                error = %e,
                "Failed to record dispatch outcome"
            );
        }

        outcome
    }

    /// Re-queue a stored event and dispatch it before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::NotFound`] for an unknown record and
    /// [`RetryError::Storage`] when the record cannot be read or reset.
    #[instrument(skip(self))]
    pub async fn retry(&self, record_id: &RecordId) -> Result<DispatchOutcome, RetryError> {
        let record: EventRecord = self
            .events
            .find_one(&EventFilter::by_id(*record_id))
            .await?
            .ok_or(RetryError::NotFound(*record_id))?;

        let patch = EventPatch::manual_retry(record.event.retries.saturating_add(1));
        let reset = self.events.update_by_key(record_id, &patch).await?;

        info!(
            record_id = %record_id,
            retries = reset.event.retries,
            "Manual retry requested"
        );

        Ok(self.dispatch(&reset.event, record_id).await)
    }

    async fn classify_and_send(&self, event: &NormalizedEvent) -> (DispatchOutcome, EventPatch) {
        let skip = |reason: SkipReason| {
            (
                DispatchOutcome::Skipped(reason),
                EventPatch::skipped(GA4_PLATFORM, reason.code()),
            )
        };

        // Tenant may have been uninstalled since ingestion
        match self.tenants.find(&event.store_id).await {
            Ok(Some(tenant)) if tenant.status == StoreStatus::Uninstalled => {
                return skip(SkipReason::StoreUninstalled);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Tenant lookup failed during dispatch, continuing");
            }
        }

        if event.event_type != DISPATCHABLE_EVENT_TYPE {
            return skip(SkipReason::EventTypeUnsupported);
        }

        let settings = match self.settings.find(&event.store_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => return skip(SkipReason::SettingsNotFound),
            Err(e) => {
                let message = format!("GA4 settings lookup failed: {}", e);
                return (
                    DispatchOutcome::Failed {
                        http_status: None,
                        error: message.clone(),
                    },
                    EventPatch::failed(GA4_PLATFORM, None, &message, None, event.retries),
                );
            }
        };

        if !settings.enabled {
            return skip(SkipReason::EventDisabled);
        }
        if !settings.is_configured() {
            return skip(SkipReason::NotConfigured);
        }

        let Some(order) = ga4::order_object(&event.payload) else {
            return (
                DispatchOutcome::Failed {
                    http_status: None,
                    error: ORDER_PAYLOAD_MISSING.to_string(),
                },
                EventPatch::failed(
                    GA4_PLATFORM,
                    None,
                    ORDER_PAYLOAD_MISSING,
                    None,
                    event.retries,
                ),
            );
        };

        let credentials = Ga4Credentials {
            measurement_id: settings.measurement_id.trim().to_string(),
            api_secret: settings.api_secret.trim().to_string(),
        };
        let payload = ga4::purchase_payload(&event.store_id, order);
        let bumped = event.retries.saturating_add(1);

        match self.sink.send(&credentials, &payload).await {
            Ok(response) if response.is_success() => (
                DispatchOutcome::Sent {
                    http_status: response.status,
                },
                EventPatch::sent(GA4_PLATFORM, response.status, &response.body),
            ),
            Ok(response) => {
                let message = format!("GA4 responded with HTTP {}", response.status);
                (
                    DispatchOutcome::Failed {
                        http_status: Some(response.status),
                        error: message.clone(),
                    },
                    EventPatch::failed(
                        GA4_PLATFORM,
                        Some(response.status),
                        &message,
                        Some(&response.body),
                        bumped,
                    ),
                )
            }
            Err(e) => {
                let (status, body) = match &e {
                    SinkError::InvalidResponse { status, message } => {
                        (Some(*status), Some(message.as_str()))
                    }
                    _ => (None, None),
                };
                let message = e.to_string();
                (
                    DispatchOutcome::Failed {
                        http_status: status,
                        error: message.clone(),
                    },
                    EventPatch::failed(GA4_PLATFORM, status, &message, body, bumped),
                )
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
