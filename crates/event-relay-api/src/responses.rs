//! Response types and query parameters for the API.

use event_relay_core::{
    EventStatus, Ga4Settings, RecordId, StoreRecord, StoreStatus, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default page size for the events listing.
pub const DEFAULT_EVENT_LIMIT: usize = 50;

/// Largest page the events listing returns.
pub const MAX_EVENT_LIMIT: usize = 200;

/// Default statistics window.
pub const DEFAULT_STATS_HOURS: u64 = 24;
pub const MAX_STATS_HOURS: u64 = 24 * 365;

/// Tenants returned by the stores listing.
pub const STORE_LIST_LIMIT: usize = 50;

// ============================================================================
// Webhook
// ============================================================================

/// Acknowledgement returned to the webhook sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduplicated: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled: Option<String>,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self {
            received: true,
            deduplicated: None,
            handled: None,
        }
    }

    pub fn deduplicated() -> Self {
        Self {
            deduplicated: Some(true),
            ..Self::received()
        }
    }

    pub fn handled(event: impl Into<String>) -> Self {
        Self {
            handled: Some(event.into()),
            ..Self::received()
        }
    }
}

/// Manual retry acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryResponse {
    pub status: String,
    pub id: RecordId,
}

impl RetryResponse {
    pub fn attempted(id: RecordId) -> Self {
        Self {
            status: "retry_attempted".to_string(),
            id,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: Timestamp,
}

// ============================================================================
// Platform endpoints
// ============================================================================

/// Success envelope used by the platform endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub ok: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

/// Body of `POST /platforms/ga4/connect` and `/platforms/ga4/validate`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ga4ConnectRequest {
    #[serde(default)]
    pub store_id: Option<String>,

    #[serde(default)]
    pub measurement_id: Option<String>,

    #[serde(default)]
    pub api_secret: Option<String>,

    #[serde(default)]
    pub enabled: Option<bool>,
}

impl Ga4ConnectRequest {
    /// Trimmed `(store_id, measurement_id, api_secret)`, or `None` when any is
    /// missing or blank.
    pub fn required_fields(&self) -> Option<(String, String, String)> {
        Some((
            required_param(&self.store_id)?,
            required_param(&self.measurement_id)?,
            required_param(&self.api_secret)?,
        ))
    }
}

/// Result of a GA4 connect request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ga4ConnectResponse {
    pub ok: bool,
    pub status: String,
    pub store_id: String,
    pub enabled: bool,
}

/// GA4 settings with the api secret redacted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ga4SettingsView {
    pub store_id: String,
    pub measurement_id: String,
    pub api_secret_set: bool,
    pub enabled: bool,
    pub updated_at: Timestamp,
}

impl From<&Ga4Settings> for Ga4SettingsView {
    fn from(settings: &Ga4Settings) -> Self {
        Self {
            store_id: settings.store_id.clone(),
            measurement_id: settings.measurement_id.clone(),
            api_secret_set: !settings.api_secret.is_empty(),
            enabled: settings.enabled,
            updated_at: settings.updated_at,
        }
    }
}

/// Query for `GET /platforms/stats`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub store_id: Option<String>,
    pub hours: Option<u64>,
}

impl StatsQuery {
    /// Requested window, defaulting to 24 hours and clamped to `1..=8760`.
    pub fn window_hours(&self) -> u64 {
        self.hours
            .unwrap_or(DEFAULT_STATS_HOURS)
            .clamp(1, MAX_STATS_HOURS)
    }
}

/// Event counts by status within a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub store_id: String,
    pub hours: u64,
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
}

impl StatsResponse {
    pub fn new(
        store_id: String,
        hours: u64,
        counts: impl IntoIterator<Item = (EventStatus, u64)>,
    ) -> Self {
        let by_status: BTreeMap<String, u64> = counts
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();
        let total = by_status.values().sum();

        Self {
            store_id,
            hours,
            total,
            by_status,
        }
    }
}

/// Query for `GET /platforms/events`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    pub store_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EventsQuery {
    /// Requested page size, defaulted and capped.
    pub fn page_size(&self) -> usize {
        self.limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .min(MAX_EVENT_LIMIT)
    }
}

/// One row of the stores listing; credentials are omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreView {
    pub store_id: String,
    pub status: StoreStatus,
    pub scope: Option<String>,
    pub installed_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&StoreRecord> for StoreView {
    fn from(record: &StoreRecord) -> Self {
        Self {
            store_id: record.store_id.clone(),
            status: record.status,
            scope: record.scope.clone(),
            installed_at: record.installed_at,
            updated_at: record.updated_at,
        }
    }
}

/// Trimmed, non-empty query value.
pub fn required_param(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "responses_tests.rs"]
mod tests;
