//! Conversion of an arbitrary webhook body into a [`NormalizedEvent`].
//!
//! Every field with more than one possible source location is resolved by an
//! ordered list of payload paths; the first non-empty value wins.

use crate::events::NormalizedEvent;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};

/// Platform tag stamped on every normalized event.
pub const SOURCE_TAG: &str = "salla";

/// Payload locations holding the tenant identifier, highest priority first.
const STORE_ID_PATHS: &[&[&str]] = &[
    &["store_id"],
    &["merchant"],
    &["data", "store_id"],
    &["data", "merchant", "id"],
];

/// Payload locations holding the business object identifier.
const BUSINESS_ID_PATHS: &[&[&str]] = &[
    &["data", "id"],
    &["data", "order_id"],
    &["data", "order", "id"],
    &["data", "shipment", "id"],
];

/// Payload locations holding a stable creation timestamp.
const CREATED_AT_PATHS: &[&[&str]] = &[&["created_at"], &["data", "created_at"]];

/// How an event's external id was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIdSource {
    /// Taken from a business identifier in the payload
    BusinessId,
    /// SHA-1 over a reduced, non-volatile subset of the payload
    Fingerprint,
}

/// Normalize a decoded webhook body.
///
/// Never fails: missing fields become empty strings and are rejected later by
/// the caller's presence check.
pub fn normalize(payload: &Value) -> NormalizedEvent {
    let event_type = event_type(payload);
    let store_id = store_id(payload);
    let (external_id, _) = external_id(payload, &event_type, &store_id);

    NormalizedEvent::pending(store_id, external_id, event_type, payload.clone())
}

/// The declared event name, trimmed.
pub fn event_type(payload: &Value) -> String {
    payload
        .get("event")
        .and_then(scalar_text)
        .unwrap_or_default()
}

/// The tenant identifier from the first populated known location.
pub fn store_id(payload: &Value) -> String {
    first_text(payload, STORE_ID_PATHS).unwrap_or_default()
}

/// Stable identifier of the underlying business object.
///
/// Uses the business id when one is present. Otherwise hashes event type,
/// store id, merchant and creation time, which are identical across
/// redeliveries of the same webhook.
pub fn external_id(payload: &Value, event_type: &str, store_id: &str) -> (String, ExternalIdSource) {
    if let Some(id) = first_text(payload, BUSINESS_ID_PATHS) {
        return (id, ExternalIdSource::BusinessId);
    }

    let reduced = json!({
        "event": event_type,
        "store_id": store_id,
        "merchant": payload.get("merchant").cloned().unwrap_or(Value::Null),
        "created_at": first_value(payload, CREATED_AT_PATHS).cloned().unwrap_or(Value::Null),
    });

    let mut hasher = Sha1::new();
    hasher.update(reduced.to_string().as_bytes());
    (
        hex::encode(hasher.finalize()),
        ExternalIdSource::Fingerprint,
    )
}

fn first_value<'a>(payload: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| lookup(payload, path))
        .find(|value| !value.is_null())
}

fn first_text(payload: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(payload, path))
        .find_map(scalar_text)
}

fn lookup<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |value, key| value.get(key))
}

/// Strings are trimmed and numbers rendered; anything else has no text form.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
