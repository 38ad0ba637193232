//! Integration tests for duplicate delivery handling
//!
//! Webhook senders deliver at least once. These tests verify that every
//! delivery of the same business event collapses to one stored row and one
//! dispatch, including when the deliveries race each other.

mod common;

use axum::http::StatusCode;
use common::{order_created, sign, webhook_request, RecordingSink, TestRelay, STORE};
use event_relay_core::EventStatus;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_order_is_sent_once_and_redelivery_is_deduplicated() {
    let relay = TestRelay::new(RecordingSink::accepting());
    relay.activate_tenant().await;
    relay.configure_ga4(true).await;

    let (status, body) = relay.deliver(&order_created("O100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let record = relay.settled("O100", "order.created").await;
    assert_eq!(record.event.external_id, "O100");
    assert_eq!(record.event.status, EventStatus::Sent);
    assert_eq!(record.event.last_platform.as_deref(), Some("ga4"));
    assert_eq!(record.event.last_http_status, Some(204));
    assert_eq!(record.event.retries, 0);

    let (status, body) = relay.deliver(&order_created("O100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "deduplicated": true }));

    let (store, sink) = relay.drain().await;
    assert_eq!(store.event_count(), 1);
    assert_eq!(sink.send_count(), 1, "duplicate must not dispatch again");

    let payload = &sink.payloads()[0];
    assert_eq!(payload["client_id"], format!("server_{}", STORE));
    assert_eq!(payload["events"][0]["name"], "purchase");
    assert_eq!(payload["events"][0]["params"]["transaction_id"], "O100");
    assert_eq!(payload["events"][0]["params"]["value"], json!(250.0));
    assert_eq!(payload["events"][0]["params"]["currency"], "SAR");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_store_one_row() {
    let relay = TestRelay::new(RecordingSink::accepting());
    relay.activate_tenant().await;
    relay.configure_ga4(true).await;

    let bytes = serde_json::to_vec(&order_created("O777")).unwrap();
    let signature = sign(&bytes);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let router = relay.router.clone();
            let request = webhook_request(bytes.clone(), Some(&signature));
            tokio::spawn(async move {
                let response = router.oneshot(request).await.unwrap();
                let status = response.status();
                let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                    .await
                    .unwrap();
                (status, serde_json::from_slice::<serde_json::Value>(&body).unwrap())
            })
        })
        .collect();

    let mut accepted = 0;
    let mut deduplicated = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        if body.get("deduplicated").is_some() {
            deduplicated += 1;
        } else {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(deduplicated, 15);

    let (store, sink) = relay.drain().await;
    assert_eq!(store.event_count(), 1);
    assert_eq!(sink.send_count(), 1);
}

#[tokio::test]
async fn test_hash_fallback_is_stable_across_reserialization() {
    let relay = TestRelay::new(RecordingSink::accepting());

    // Same event without a business id, delivered with different byte layouts
    let first = br#"{"event":"customer.created","store_id":"S1","created_at":"2024-01-01T00:00:00Z","data":{"email":"a@example.com"}}"#.to_vec();
    let second = br#"{ "data": { "email": "a@example.com" }, "created_at": "2024-01-01T00:00:00Z", "store_id": "S1", "event": "customer.created" }"#.to_vec();

    let first_signature = sign(&first);
    let (status, body) = relay
        .send(webhook_request(first, Some(&first_signature)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));

    let second_signature = sign(&second);
    let (status, body) = relay
        .send(webhook_request(second, Some(&second_signature)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true, "deduplicated": true }));

    let events = relay.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.external_id.len(), 40, "sha1 hex digest");
}

#[tokio::test]
async fn test_same_order_id_with_different_type_is_a_new_event() {
    let relay = TestRelay::new(RecordingSink::accepting());

    relay.deliver(&order_created("O100")).await;
    let (status, body) = relay
        .deliver(&json!({
            "event": "order.updated",
            "store_id": STORE,
            "data": { "id": "O100", "total": 300 }
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(relay.events().await.len(), 2);
}
