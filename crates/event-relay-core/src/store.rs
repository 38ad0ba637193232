//! # Record Store
//!
//! Storage interfaces for events, tenants and sink settings.
//!
//! The pipeline depends only on these traits. Implementations must enforce
//! the `(store_id, external_id, type)` uniqueness constraint atomically in
//! [`EventRepository::insert`]; the lookup performed before insert is an
//! optimization, not the guarantee.

use crate::events::{EventPatch, EventRecord, EventStatus, NormalizedEvent};
use crate::{RecordId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Event Store
// ============================================================================

/// Ordering of listed events by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Conjunctive filter over stored events. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub record_id: Option<RecordId>,
    pub store_id: Option<String>,
    pub external_id: Option<String>,
    pub event_type: Option<String>,
    pub status: Option<EventStatus>,
    pub created_after: Option<Timestamp>,
}

impl EventFilter {
    /// Filter on the deduplication key.
    pub fn dedup_key(store_id: &str, external_id: &str, event_type: &str) -> Self {
        Self {
            store_id: Some(store_id.to_string()),
            external_id: Some(external_id.to_string()),
            event_type: Some(event_type.to_string()),
            ..Default::default()
        }
    }

    /// Filter on a single record id.
    pub fn by_id(record_id: RecordId) -> Self {
        Self {
            record_id: Some(record_id),
            ..Default::default()
        }
    }

    /// Filter on a tenant.
    pub fn for_store(store_id: &str) -> Self {
        Self {
            store_id: Some(store_id.to_string()),
            ..Default::default()
        }
    }

    /// Restrict to records created strictly after `since`.
    pub fn created_after(mut self, since: Timestamp) -> Self {
        self.created_after = Some(since);
        self
    }

    /// Whether a record satisfies every set criterion.
    pub fn matches(&self, record: &EventRecord) -> bool {
        let event = &record.event;
        self.record_id.map_or(true, |id| id == record.id)
            && self.store_id.as_deref().map_or(true, |s| s == event.store_id)
            && self
                .external_id
                .as_deref()
                .map_or(true, |e| e == event.external_id)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| t == event.event_type)
            && self.status.map_or(true, |s| s == event.status)
            && self.created_after.map_or(true, |t| record.created_at > t)
    }
}

/// Persistence of normalized events and their delivery state.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist a new event and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] when an event with the same
    /// `(store_id, external_id, type)` already exists. The check and the
    /// write are atomic.
    async fn insert(&self, event: NormalizedEvent) -> Result<EventRecord, StorageError>;

    /// Apply a partial update to one record and return the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the record does not exist.
    async fn update_by_key(
        &self,
        id: &RecordId,
        patch: &EventPatch,
    ) -> Result<EventRecord, StorageError>;

    /// First record matching the filter.
    async fn find_one(&self, filter: &EventFilter) -> Result<Option<EventRecord>, StorageError>;

    /// Records matching the filter, ordered by creation time.
    async fn find_many(
        &self,
        filter: &EventFilter,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>, StorageError>;
}

/// Count a tenant's events by status, for events created after `since`.
///
/// Every status is present in the result, with zero when unused.
pub async fn status_counts(
    events: &dyn EventRepository,
    store_id: &str,
    since: Timestamp,
) -> Result<HashMap<EventStatus, u64>, StorageError> {
    let filter = EventFilter::for_store(store_id).created_after(since);
    let records = events
        .find_many(&filter, SortOrder::NewestFirst, usize::MAX, 0)
        .await?;

    let mut counts: HashMap<EventStatus, u64> =
        EventStatus::all().into_iter().map(|s| (s, 0)).collect();
    for record in &records {
        *counts.entry(record.event.status).or_default() += 1;
    }
    Ok(counts)
}

// ============================================================================
// Tenant Store
// ============================================================================

/// Lifecycle state of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    Active,
    Installed,
    Authorized,
    Uninstalled,
}

impl StoreStatus {
    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Installed => "installed",
            Self::Authorized => "authorized",
            Self::Uninstalled => "uninstalled",
        }
    }

    /// Whether data events are admitted for this tenant.
    pub fn admits_events(&self) -> bool {
        !matches!(self, Self::Uninstalled)
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StoreStatus {
    type Err = crate::ParseError;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "installed" => Ok(Self::Installed),
            "authorized" => Ok(Self::Authorized),
            "uninstalled" => Ok(Self::Uninstalled),
            other => Err(crate::ParseError::InvalidFormat {
                expected: "active, installed, authorized or uninstalled".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// A tenant row. Token fields hold ciphertext only.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub store_id: String,
    pub status: StoreStatus,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_expires_at: Option<i64>,
    pub installed_at: Timestamp,
    pub updated_at: Timestamp,
}

impl StoreRecord {
    /// New tenant row stamped with the current time.
    pub fn new(store_id: impl Into<String>, status: StoreStatus, access_token: String) -> Self {
        let now = Timestamp::now();
        Self {
            store_id: store_id.into(),
            status,
            access_token,
            refresh_token: None,
            scope: None,
            token_expires_at: None,
            installed_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update. `installed_at` is never changed.
    pub fn apply(&mut self, patch: &StorePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(token) = &patch.access_token {
            self.access_token = token.clone();
        }
        if let Some(token) = &patch.refresh_token {
            self.refresh_token = token.clone();
        }
        if let Some(scope) = &patch.scope {
            self.scope = scope.clone();
        }
        if let Some(expires) = patch.token_expires_at {
            self.token_expires_at = expires;
        }
        self.updated_at = Timestamp::now();
    }
}

impl fmt::Debug for StoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRecord")
            .field("store_id", &self.store_id)
            .field("status", &self.status)
            .field("access_token", &"<REDACTED>")
            .field("scope", &self.scope)
            .field("installed_at", &self.installed_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Partial update of a tenant row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorePatch {
    pub status: Option<StoreStatus>,
    pub access_token: Option<String>,
    pub refresh_token: Option<Option<String>>,
    pub scope: Option<Option<String>>,
    pub token_expires_at: Option<Option<i64>>,
}

impl StorePatch {
    /// Patch changing only the status.
    pub fn status(status: StoreStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Persistence of tenant rows.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find(&self, store_id: &str) -> Result<Option<StoreRecord>, StorageError>;

    /// Create a tenant row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] when the tenant already exists.
    async fn insert(&self, record: StoreRecord) -> Result<StoreRecord, StorageError>;

    /// Update an existing tenant row, refreshing `updated_at`.
    async fn update(&self, store_id: &str, patch: &StorePatch)
        -> Result<StoreRecord, StorageError>;

    /// Most recently updated tenants first.
    async fn list(&self, limit: usize) -> Result<Vec<StoreRecord>, StorageError>;
}

// ============================================================================
// Sink Settings Store
// ============================================================================

/// Per-tenant GA4 destination configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Ga4Settings {
    pub store_id: String,
    pub measurement_id: String,
    pub api_secret: String,
    pub enabled: bool,
    pub updated_at: Timestamp,
}

impl Ga4Settings {
    pub fn new(
        store_id: impl Into<String>,
        measurement_id: impl Into<String>,
        api_secret: impl Into<String>,
        enabled: bool,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            enabled,
            updated_at: Timestamp::now(),
        }
    }

    /// Both credentials are non-blank.
    pub fn is_configured(&self) -> bool {
        !self.measurement_id.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

impl fmt::Debug for Ga4Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ga4Settings")
            .field("store_id", &self.store_id)
            .field("measurement_id", &self.measurement_id)
            .field("api_secret", &"<REDACTED>")
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Persistence of sink destination settings.
#[async_trait]
pub trait SinkSettingsRepository: Send + Sync {
    async fn find(&self, store_id: &str) -> Result<Option<Ga4Settings>, StorageError>;

    /// Insert or replace the tenant's settings.
    async fn upsert(&self, settings: Ga4Settings) -> Result<Ga4Settings, StorageError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during record store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write
    #[error("Duplicate record: {key}")]
    Duplicate { key: String },

    /// The addressed record does not exist
    #[error("Record not found: {key}")]
    NotFound { key: String },

    /// The store cannot be reached
    #[error("Record store unavailable: {message}")]
    Unavailable { message: String },

    /// The store rejected or failed the operation
    #[error("Storage operation failed: {message}")]
    OperationFailed { message: String },
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
