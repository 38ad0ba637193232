//! # Webhook Intake Module
//!
//! Raw request model plus the three synchronous intake steps that run before
//! any storage access: signature verification, lifecycle classification and
//! normalization into a [`NormalizedEvent`](crate::events::NormalizedEvent).

use crate::Timestamp;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;

pub mod lifecycle;
pub mod normalizer;
pub mod signature;

pub use lifecycle::{LifecycleEvent, TokenGrant};
pub use normalizer::{event_type, external_id, normalize, store_id, ExternalIdSource, SOURCE_TAG};
pub use signature::{
    extract_signature, is_hex_sha256, verify_signature, HmacSignatureVerifier, SignatureVerifier,
};

/// Default name of the dedicated signature header.
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-salla-signature";

// ============================================================================
// Core Types
// ============================================================================

/// Raw HTTP request data for an inbound platform webhook.
///
/// The body is kept as the exact bytes received so the signature can be
/// checked over them before anything is parsed.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: WebhookHeaders,
    pub body: Bytes,
    pub received_at: Timestamp,
}

impl WebhookRequest {
    /// Create new webhook request
    pub fn new(headers: WebhookHeaders, body: Bytes) -> Self {
        Self {
            headers,
            body,
            received_at: Timestamp::now(),
        }
    }

    /// Decode the body as JSON.
    ///
    /// A body that is not valid JSON decodes to `Value::Null`; the caller's
    /// presence checks turn that into an invalid-payload rejection.
    pub fn parse_body(&self) -> Value {
        parse_body(&self.body)
    }
}

/// Headers relevant to webhook authentication
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub authorization: Option<String>,
    pub correlation_id: Option<String>,
}

impl WebhookHeaders {
    /// Pick the relevant headers out of a lowercase-keyed header map.
    pub fn from_http_headers(headers: &HashMap<String, String>, signature_header: &str) -> Self {
        let lookup = |name: &str| {
            headers
                .get(&name.to_ascii_lowercase())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            signature: lookup(signature_header),
            authorization: lookup("authorization"),
            correlation_id: lookup("x-correlation-id"),
        }
    }
}

/// Decode raw bytes as JSON, yielding `Value::Null` when they are not JSON.
pub fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
