//! Tests for the ingestion pipeline ordering and rejection paths.

use super::*;
use crate::adapters::InMemoryRecordStore;
use crate::crypto::ChaChaTokenCipher;
use crate::dispatch::{
    AnalyticsSink, DispatchConfig, DispatchWorkers, Dispatcher, Ga4Credentials, SinkError,
    SinkResponse,
};
use crate::events::EventStatus;
use crate::store::{StoreRecord, TenantRepository};
use crate::webhook::{HmacSignatureVerifier, WebhookHeaders};
use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

const SECRET: &str = "webhook-secret";

struct AcceptingSink;

#[async_trait]
impl AnalyticsSink for AcceptingSink {
    async fn send(&self, _: &Ga4Credentials, _: &Value) -> Result<SinkResponse, SinkError> {
        Ok(SinkResponse {
            status: 204,
            body: String::new(),
        })
    }

    async fn validate(&self, _: &Ga4Credentials, _: &Value) -> Result<SinkResponse, SinkError> {
        Ok(SinkResponse {
            status: 200,
            body: String::new(),
        })
    }
}

struct Fixture {
    pipeline: IngestionPipeline,
    store: InMemoryRecordStore,
    _workers: DispatchWorkers,
}

fn fixture() -> Fixture {
    fixture_with(DispatchConfig::default())
}

fn fixture_with(config: DispatchConfig) -> Fixture {
    let store = InMemoryRecordStore::new();
    let shared = Arc::new(store.clone());
    let cipher = Arc::new(ChaChaTokenCipher::new("v1", [9u8; 32]));
    let dispatcher = Arc::new(Dispatcher::new(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        Arc::new(AcceptingSink),
    ));
    let (queue, workers) = DispatchQueue::start(dispatcher, config);

    let pipeline = IngestionPipeline::new(
        Arc::new(HmacSignatureVerifier::new(SECRET)),
        TenantGate::new(shared.clone(), cipher),
        shared,
        queue,
    );

    Fixture {
        pipeline,
        store,
        _workers: workers,
    }
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn signed(body: Value) -> WebhookRequest {
    let bytes = serde_json::to_vec(&body).unwrap();
    let headers = WebhookHeaders {
        signature: Some(format!("sha256={}", sign(&bytes))),
        ..Default::default()
    };
    WebhookRequest::new(headers, Bytes::from(bytes))
}

fn order_body() -> Value {
    json!({ "event": "order.created", "store_id": "S1", "data": { "id": "O100", "total": 250 } })
}

// ============================================================================
// Signature gate
// ============================================================================

#[tokio::test]
async fn test_bad_signature_rejected_before_anything_is_written() {
    let f = fixture();
    let bytes = serde_json::to_vec(&order_body()).unwrap();
    let request = WebhookRequest::new(
        WebhookHeaders {
            signature: Some(sign(b"something else")),
            ..Default::default()
        },
        Bytes::from(bytes),
    );

    let result = f.pipeline.ingest(&request).await;

    assert!(matches!(result, Err(IngestError::Unauthorized)));
    assert_eq!(f.store.event_count(), 0);
    assert!(TenantRepository::find(&f.store, "S1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let f = fixture();
    let request = WebhookRequest::new(
        WebhookHeaders::default(),
        Bytes::from(serde_json::to_vec(&order_body()).unwrap()),
    );

    assert!(matches!(
        f.pipeline.ingest(&request).await,
        Err(IngestError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_authorization_fallback_can_be_disabled() {
    let f = fixture();
    let bytes = serde_json::to_vec(&order_body()).unwrap();
    let headers = WebhookHeaders {
        authorization: Some(format!("Bearer {}", sign(&bytes))),
        ..Default::default()
    };
    let request = WebhookRequest::new(headers, Bytes::from(bytes));

    assert!(f.pipeline.ingest(&request).await.is_ok());

    let strict = f.pipeline.clone().with_authorization_signature(false);
    let mut second = order_body();
    second["data"]["id"] = json!("O101");
    let bytes = serde_json::to_vec(&second).unwrap();
    let headers = WebhookHeaders {
        authorization: Some(format!("Bearer {}", sign(&bytes))),
        ..Default::default()
    };
    let request = WebhookRequest::new(headers, Bytes::from(bytes));

    assert!(matches!(
        strict.ingest(&request).await,
        Err(IngestError::Unauthorized)
    ));
}

// ============================================================================
// Data events
// ============================================================================

#[tokio::test]
async fn test_order_accepted_and_persisted_pending() {
    let f = fixture();

    let outcome = f.pipeline.ingest(&signed(order_body())).await.unwrap();

    let IngestOutcome::Accepted {
        record_id, queued, ..
    } = outcome
    else {
        panic!("expected accepted, got {:?}", outcome);
    };
    assert!(queued);

    // Workers have not run yet on the current-thread runtime
    let record = f
        .store
        .find_one(&EventFilter::by_id(record_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.event.status, EventStatus::Pending);
    assert_eq!(record.event.external_id, "O100");
}

#[tokio::test]
async fn test_event_rejected_by_full_queue_is_marked_failed() {
    let f = fixture_with(DispatchConfig {
        workers: 1,
        queue_capacity: 1,
    });

    // Workers have not run yet, so the first job holds the only slot
    let first = f.pipeline.ingest(&signed(order_body())).await.unwrap();
    assert!(matches!(first, IngestOutcome::Accepted { queued: true, .. }));

    let second_body =
        json!({ "event": "order.created", "store_id": "S1", "data": { "id": "O200", "total": 10 } });
    let second = f.pipeline.ingest(&signed(second_body)).await.unwrap();
    let IngestOutcome::Accepted {
        record_id, queued, ..
    } = second
    else {
        panic!("expected accepted, got {:?}", second);
    };
    assert!(!queued);

    let record = f
        .store
        .find_one(&EventFilter::by_id(record_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.event.status, EventStatus::Failed);
    assert_eq!(record.event.last_error.as_deref(), Some("DISPATCH_QUEUE_FULL"));
    assert_eq!(record.event.retries, 0);
    assert!(record.event.last_attempt_at.is_some());
}

#[tokio::test]
async fn test_second_delivery_is_deduplicated() {
    let f = fixture();

    f.pipeline.ingest(&signed(order_body())).await.unwrap();
    let second = f.pipeline.ingest(&signed(order_body())).await.unwrap();

    assert_eq!(second, IngestOutcome::Deduplicated);
    assert_eq!(f.store.event_count(), 1);
    assert_eq!(f.pipeline.queue().backlog(), 1);
}

#[tokio::test]
async fn test_missing_store_id_is_invalid() {
    let f = fixture();

    let result = f
        .pipeline
        .ingest(&signed(json!({ "event": "order.created", "data": { "id": "O1" } })))
        .await;

    assert!(matches!(result, Err(IngestError::InvalidPayload { .. })));
    assert_eq!(f.store.event_count(), 0);
}

#[tokio::test]
async fn test_non_json_body_is_invalid() {
    let f = fixture();
    let bytes = b"not json".to_vec();
    let headers = WebhookHeaders {
        signature: Some(sign(&bytes)),
        ..Default::default()
    };

    let result = f
        .pipeline
        .ingest(&WebhookRequest::new(headers, Bytes::from(bytes)))
        .await;

    assert!(matches!(result, Err(IngestError::InvalidPayload { .. })));
}

#[tokio::test]
async fn test_uninstalled_store_forbidden_and_not_persisted() {
    let f = fixture();
    TenantRepository::insert(
        &f.store,
        StoreRecord::new("S1", StoreStatus::Uninstalled, String::new()),
    )
    .await
    .unwrap();

    let result = f.pipeline.ingest(&signed(order_body())).await;

    assert!(matches!(
        result,
        Err(IngestError::StoreNotActive {
            status: StoreStatus::Uninstalled
        })
    ));
    assert_eq!(f.store.event_count(), 0);
}

#[tokio::test]
async fn test_unknown_store_gets_placeholder_and_event_proceeds() {
    let f = fixture();

    let outcome = f.pipeline.ingest(&signed(order_body())).await.unwrap();

    assert!(matches!(outcome, IngestOutcome::Accepted { .. }));
    let tenant = TenantRepository::find(&f.store, "S1").await.unwrap().unwrap();
    assert_eq!(tenant.status, StoreStatus::Installed);
}

// ============================================================================
// Lifecycle events
// ============================================================================

#[tokio::test]
async fn test_uninstall_short_circuits_then_blocks_data() {
    let f = fixture();
    f.pipeline.ingest(&signed(order_body())).await.unwrap();

    let outcome = f
        .pipeline
        .ingest(&signed(json!({ "event": "app.store.uninstalled", "merchant": "S1" })))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IngestOutcome::Lifecycle {
            handled: "app.store.uninstalled".to_string()
        }
    );

    let mut next = order_body();
    next["data"]["id"] = json!("O200");
    let result = f.pipeline.ingest(&signed(next)).await;

    assert!(matches!(result, Err(IngestError::StoreNotActive { .. })));
    assert_eq!(f.store.event_count(), 1);
}

#[tokio::test]
async fn test_lifecycle_without_store_is_invalid() {
    let f = fixture();

    let result = f
        .pipeline
        .ingest(&signed(json!({ "event": "app.installed" })))
        .await;

    assert!(matches!(result, Err(IngestError::InvalidPayload { .. })));
}

#[tokio::test]
async fn test_lifecycle_events_are_never_stored() {
    let f = fixture();

    f.pipeline
        .ingest(&signed(json!({
            "event": "app.store.authorize",
            "merchant": "S1",
            "data": { "access_token": "at" }
        })))
        .await
        .unwrap();

    assert_eq!(f.store.event_count(), 0);
    let tenant = TenantRepository::find(&f.store, "S1").await.unwrap().unwrap();
    assert_eq!(tenant.status, StoreStatus::Active);
}
