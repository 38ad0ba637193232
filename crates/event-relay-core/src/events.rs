//! # Event Records
//!
//! The canonical [`NormalizedEvent`], its persisted form and the delivery
//! status state machine.
//!
//! ```text
//! pending ──► sent | failed | skipped
//!    ▲                 │
//!    └── manual retry ─┘
//! ```

use crate::{EventId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::webhook::SOURCE_TAG;

/// Maximum stored length of `last_error`, in bytes.
pub const MAX_ERROR_LEN: usize = 2 * 1024;

/// Maximum stored length of `last_response`, in bytes.
pub const MAX_RESPONSE_LEN: usize = 5 * 1024;

/// Marker written to `last_error` when an operator re-queues an event.
pub const MANUAL_RETRY_MARKER: &str = "MANUAL_RETRY";

// ============================================================================
// Status
// ============================================================================

/// Delivery status of a stored event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl EventStatus {
    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Whether dispatch has reached a final classification
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// All statuses, in display order
    pub fn all() -> [EventStatus; 4] {
        [Self::Pending, Self::Sent, Self::Failed, Self::Skipped]
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = crate::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(crate::ParseError::InvalidFormat {
                expected: "pending, sent, failed or skipped".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Normalized Event
// ============================================================================

/// Canonical representation of a business webhook.
///
/// The tuple `(store_id, external_id, event_type)` is the deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_id: EventId,
    pub store_id: String,
    pub external_id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub status: EventStatus,
    pub retries: u32,
    pub last_attempt_at: Option<Timestamp>,
    pub last_platform: Option<String>,
    pub last_http_status: Option<u16>,
    pub last_error: Option<String>,
    pub last_response: Option<String>,
}

impl NormalizedEvent {
    /// Fresh event in the initial `pending` state.
    pub fn pending(
        store_id: impl Into<String>,
        external_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            store_id: store_id.into(),
            external_id: external_id.into(),
            source: SOURCE_TAG.to_string(),
            event_type: event_type.into(),
            payload,
            status: EventStatus::Pending,
            retries: 0,
            last_attempt_at: None,
            last_platform: None,
            last_http_status: None,
            last_error: None,
            last_response: None,
        }
    }

    /// Whether both tenant and type are present.
    pub fn has_required_fields(&self) -> bool {
        !self.store_id.is_empty() && !self.event_type.is_empty()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &EventPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(retries) = patch.retries {
            self.retries = retries;
        }
        if let Some(at) = patch.last_attempt_at {
            self.last_attempt_at = Some(at);
        }
        if let Some(platform) = &patch.last_platform {
            self.last_platform = platform.clone();
        }
        if let Some(code) = patch.last_http_status {
            self.last_http_status = code;
        }
        if let Some(error) = &patch.last_error {
            self.last_error = error.clone();
        }
        if let Some(response) = &patch.last_response {
            self.last_response = response.clone();
        }
    }
}

/// A persisted event with its storage-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: RecordId,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub event: NormalizedEvent,
}

// ============================================================================
// Patches
// ============================================================================

/// Partial update of an event's status and delivery telemetry.
///
/// `None` leaves a field untouched; for the optional telemetry fields
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub status: Option<EventStatus>,
    pub retries: Option<u32>,
    pub last_attempt_at: Option<Timestamp>,
    pub last_platform: Option<Option<String>>,
    pub last_http_status: Option<Option<u16>>,
    pub last_error: Option<Option<String>>,
    pub last_response: Option<Option<String>>,
}

impl EventPatch {
    /// Sink accepted the delivery.
    pub fn sent(platform: &str, http_status: u16, response: &str) -> Self {
        Self {
            status: Some(EventStatus::Sent),
            last_attempt_at: Some(Timestamp::now()),
            last_platform: Some(Some(platform.to_string())),
            last_http_status: Some(Some(http_status)),
            last_error: Some(None),
            last_response: Some(Some(truncate(response, MAX_RESPONSE_LEN))),
            ..Default::default()
        }
    }

    /// Delivery was attempted and failed, or the stored payload was unusable.
    pub fn failed(
        platform: &str,
        http_status: Option<u16>,
        error: &str,
        response: Option<&str>,
        retries: u32,
    ) -> Self {
        Self {
            status: Some(EventStatus::Failed),
            retries: Some(retries),
            last_attempt_at: Some(Timestamp::now()),
            last_platform: Some(Some(platform.to_string())),
            last_http_status: Some(http_status),
            last_error: Some(Some(truncate(error, MAX_ERROR_LEN))),
            last_response: Some(response.map(|r| truncate(r, MAX_RESPONSE_LEN))),
        }
    }

    /// Event is ineligible for dispatch. Retries are never touched.
    pub fn skipped(platform: &str, reason: &str) -> Self {
        Self {
            status: Some(EventStatus::Skipped),
            last_attempt_at: Some(Timestamp::now()),
            last_platform: Some(Some(platform.to_string())),
            last_http_status: Some(None),
            last_error: Some(Some(truncate(reason, MAX_ERROR_LEN))),
            last_response: Some(None),
            ..Default::default()
        }
    }

    /// The event could not be handed to the dispatch queue. No delivery was
    /// attempted, so retries are left unchanged.
    pub fn queue_rejected(reason: &str) -> Self {
        Self {
            status: Some(EventStatus::Failed),
            last_attempt_at: Some(Timestamp::now()),
            last_error: Some(Some(truncate(reason, MAX_ERROR_LEN))),
            ..Default::default()
        }
    }

    /// Operator re-queued the event.
    pub fn manual_retry(retries: u32) -> Self {
        Self {
            status: Some(EventStatus::Pending),
            retries: Some(retries),
            last_attempt_at: Some(Timestamp::now()),
            last_error: Some(Some(MANUAL_RETRY_MARKER.to_string())),
            ..Default::default()
        }
    }
}

/// Truncate to at most `max` bytes without splitting a character.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
