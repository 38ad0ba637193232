//! # Event Relay Core
//!
//! Core business logic for the Event Relay webhook intake and analytics
//! dispatch service.
//!
//! This crate contains the domain logic for verifying e-commerce platform
//! webhooks, normalizing them into canonical event records, gating them by
//! tenant lifecycle state, deduplicating them and forwarding qualifying events
//! to the GA4 Measurement Protocol.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions (record store, sink, cipher)
//! - Infrastructure implementations are injected at runtime
//! - Dispatch runs on a bounded worker pool, detached from the webhook response
//!
//! ## Usage
//!
//! ```rust
//! use event_relay_core::{EventId, RecordId};
//!
//! let event_id = EventId::new();
//! let record_id = RecordId::new();
//! assert_ne!(event_id.to_string(), record_id.to_string());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use ulid::Ulid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier assigned to a normalized event at normalization time.
///
/// Used for tracing only; deduplication relies on the
/// `(store_id, external_id, type)` key instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Storage-assigned identifier of a persisted event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Ulid);

impl RecordId {
    /// Generate a new record ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.trim().parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Subtract duration from timestamp
    ///
    /// Saturates at the earliest representable instant.
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook verification, normalization and lifecycle classification
pub mod webhook;

/// Canonical event record and delivery status state machine
pub mod events;

/// Record store interfaces for events, tenants and sink settings
pub mod store;

/// Tenant lifecycle handling and admission gate
pub mod tenants;

/// Encryption of tenant token material
pub mod crypto;

/// Mapping and delivery of events to the analytics sink
pub mod dispatch;

/// End-to-end ingestion pipeline
pub mod pipeline;

/// Infrastructure implementations of the core interfaces
pub mod adapters;

// Re-export key types for convenience
pub use adapters::{Ga4HttpSink, Ga4SinkConfig, InMemoryRecordStore};
pub use crypto::{ChaChaTokenCipher, CipherError, TokenCipher};
pub use dispatch::{
    AnalyticsSink, DispatchConfig, DispatchJob, DispatchOutcome, DispatchQueue, DispatchWorkers,
    Dispatcher, Ga4Credentials, QueueRejected, RetryError, SinkError, SinkResponse, SkipReason,
};
pub use events::{EventPatch, EventRecord, EventStatus, NormalizedEvent};
pub use pipeline::{IngestError, IngestOutcome, IngestionPipeline};
pub use store::{
    status_counts, EventFilter, EventRepository, Ga4Settings, SinkSettingsRepository, SortOrder,
    StorageError, StorePatch, StoreRecord, StoreStatus, TenantRepository,
};
pub use tenants::{Admission, TenantError, TenantGate};
pub use webhook::{
    HmacSignatureVerifier, LifecycleEvent, SignatureVerifier, WebhookHeaders, WebhookRequest,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
