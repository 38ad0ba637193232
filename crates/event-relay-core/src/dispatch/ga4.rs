//! GA4 Measurement Protocol payload mapping.
//!
//! Order payloads from the platform have changed shape over time, so each
//! mapped field is read from an ordered list of candidate locations inside
//! the order object.

use serde_json::{json, Map, Value};

/// Currency used when the order carries none.
pub const DEFAULT_CURRENCY: &str = "SAR";

/// Event name of the connection test sent during credential validation.
pub const CONNECTION_TEST_EVENT: &str = "ga4_connection_test";

const TRANSACTION_ID_PATHS: &[&[&str]] = &[&["id"], &["order_id"], &["reference_id"]];

const VALUE_PATHS: &[&[&str]] = &[
    &["total"],
    &["total", "amount"],
    &["amounts", "total", "amount"],
    &["total_amount"],
];

const CURRENCY_PATHS: &[&[&str]] = &[
    &["currency"],
    &["total", "currency"],
    &["amounts", "total", "currency"],
];

/// The order object of an event payload (`data`), when it is an object.
pub fn order_object(payload: &Value) -> Option<&Map<String, Value>> {
    payload.get("data")?.as_object()
}

/// Measurement client id for a tenant.
pub fn client_id(store_id: &str) -> String {
    format!("server_{}", store_id)
}

/// Build a `purchase` event for an order.
pub fn purchase_payload(store_id: &str, order: &Map<String, Value>) -> Value {
    let transaction_id = first_text(order, TRANSACTION_ID_PATHS).unwrap_or_default();
    let value = first_amount(order, VALUE_PATHS).unwrap_or(0.0);
    let currency =
        first_text(order, CURRENCY_PATHS).unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    json!({
        "client_id": client_id(store_id),
        "events": [{
            "name": "purchase",
            "params": {
                "transaction_id": transaction_id,
                "value": value,
                "currency": currency,
                "engagement_time_msec": 1
            }
        }]
    })
}

/// Build the connection test event used to validate credentials.
pub fn connection_test_payload(store_id: &str) -> Value {
    json!({
        "client_id": client_id(store_id),
        "events": [{
            "name": CONNECTION_TEST_EVENT,
            "params": { "engagement_time_msec": 1 }
        }]
    })
}

fn lookup<'a>(order: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(order.get(*first)?, |value, key| value.get(key))
}

fn first_text(order: &Map<String, Value>, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(order, path))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Numbers, or strings holding a number.
fn first_amount(order: &Map<String, Value>, paths: &[&[&str]]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|path| lookup(order, path))
        .find_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|a| a.is_finite()),
            _ => None,
        })
}

#[cfg(test)]
#[path = "ga4_tests.rs"]
mod tests;
