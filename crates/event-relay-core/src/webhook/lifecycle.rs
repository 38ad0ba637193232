//! Tenant lifecycle notifications.
//!
//! Lifecycle webhooks describe the store's relationship with the app rather
//! than business data. They are routed to the tenant gate and never reach the
//! event store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use zeroize::Zeroizing;

/// Classified tenant lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// `app.store.authorize`: carries fresh OAuth token material
    Authorize,
    /// `app.installed` or `app.updated`
    Installed,
    /// `app.uninstalled` or `app.store.uninstalled`
    Uninstalled,
}

impl LifecycleEvent {
    /// Classify a webhook event name.
    ///
    /// Returns `None` for data events.
    pub fn classify(event_type: &str) -> Option<Self> {
        match event_type.trim() {
            "app.store.authorize" => Some(Self::Authorize),
            "app.installed" | "app.updated" => Some(Self::Installed),
            "app.uninstalled" | "app.store.uninstalled" => Some(Self::Uninstalled),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authorize => "authorize",
            Self::Installed => "installed",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{}", name)
    }
}

/// OAuth token material delivered with an authorize notification.
pub struct TokenGrant {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Option<Zeroizing<String>>,
    pub scope: Option<String>,
    /// Expiry as reported by the platform (unix seconds)
    pub expires: Option<i64>,
}

impl TokenGrant {
    /// Read the grant from `data` of an authorize payload.
    ///
    /// Returns `None` when no access token is present.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let data = payload.get("data")?;
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let access_token = text("access_token")?;
        Some(Self {
            access_token: Zeroizing::new(access_token),
            refresh_token: text("refresh_token").map(Zeroizing::new),
            scope: text("scope"),
            expires: data.get("expires").and_then(Value::as_i64),
        })
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<REDACTED>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("scope", &self.scope)
            .field("expires", &self.expires)
            .finish()
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
