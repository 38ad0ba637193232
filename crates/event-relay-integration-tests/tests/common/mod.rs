//! Common test utilities for Event Relay integration tests
//!
//! This module provides:
//! - A recording analytics sink with configurable status and delay
//! - A relay assembled around the in-memory record store
//! - Webhook signing and request helpers
//! - Polling for dispatch to settle

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use event_relay_api::{create_router, AppState, Repositories, ServiceConfig, ServiceMetrics};
use event_relay_core::{
    AnalyticsSink, ChaChaTokenCipher, DispatchWorkers, EventFilter, EventRecord, EventRepository,
    EventStatus, Ga4Credentials, Ga4Settings, InMemoryRecordStore, SinkError, SinkResponse,
    SinkSettingsRepository, SortOrder, StoreRecord, StoreStatus, TenantRepository,
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "integration-secret";
pub const WEBHOOK_PATH: &str = "/webhooks/salla";
pub const STORE: &str = "S1";

// ============================================================================
// Recording Sink
// ============================================================================

/// Sink that records every payload it is sent.
pub struct RecordingSink {
    status: u16,
    delay: Option<Duration>,
    sends: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

impl RecordingSink {
    pub fn accepting() -> Self {
        Self::responding(204)
    }

    pub fn responding(status: u16) -> Self {
        Self {
            status,
            delay: None,
            sends: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Accepts, but only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::accepting()
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn send(
        &self,
        _credentials: &Ga4Credentials,
        payload: &Value,
    ) -> Result<SinkResponse, SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads.lock().unwrap().push(payload.clone());
        self.sends.fetch_add(1, Ordering::SeqCst);

        Ok(SinkResponse {
            status: self.status,
            body: if self.status < 300 {
                String::new()
            } else {
                "upstream error".to_string()
            },
        })
    }

    async fn validate(
        &self,
        _credentials: &Ga4Credentials,
        _payload: &Value,
    ) -> Result<SinkResponse, SinkError> {
        Ok(SinkResponse {
            status: 200,
            body: r#"{"validationMessages":[]}"#.to_string(),
        })
    }
}

// ============================================================================
// Relay
// ============================================================================

pub struct TestRelay {
    pub router: Router,
    pub store: Arc<InMemoryRecordStore>,
    pub sink: Arc<RecordingSink>,
    pub workers: DispatchWorkers,
}

impl TestRelay {
    pub fn new(sink: RecordingSink) -> Self {
        let store = Arc::new(InMemoryRecordStore::new());
        let sink = Arc::new(sink);

        let mut config = ServiceConfig::default();
        config.webhook.secret = SECRET.to_string();

        let (state, workers) = AppState::assemble(
            config,
            Repositories::shared(store.clone()),
            sink.clone(),
            Arc::new(ChaChaTokenCipher::new("v1", [3u8; 32])),
            ServiceMetrics::new().unwrap(),
        );

        Self {
            router: create_router(state),
            store,
            sink,
            workers,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn deliver(&self, body: &Value) -> (StatusCode, Value) {
        self.send(signed_webhook(body)).await
    }

    pub async fn activate_tenant(&self) {
        TenantRepository::insert(
            self.store.as_ref(),
            StoreRecord::new(STORE, StoreStatus::Active, "sealed".to_string()),
        )
        .await
        .unwrap();
    }

    pub async fn configure_ga4(&self, enabled: bool) {
        self.store
            .upsert(Ga4Settings::new(STORE, "G-1", "secret", enabled))
            .await
            .unwrap();
    }

    pub async fn tenant(&self) -> Option<StoreRecord> {
        TenantRepository::find(self.store.as_ref(), STORE).await.unwrap()
    }

    pub async fn events(&self) -> Vec<EventRecord> {
        self.store
            .find_many(
                &EventFilter::for_store(STORE),
                SortOrder::OldestFirst,
                usize::MAX,
                0,
            )
            .await
            .unwrap()
    }

    /// Wait until the event leaves `pending`.
    pub async fn settled(&self, external_id: &str, event_type: &str) -> EventRecord {
        let filter = EventFilter::dedup_key(STORE, external_id, event_type);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        loop {
            if let Some(record) = self.store.find_one(&filter).await.unwrap() {
                if record.event.status != EventStatus::Pending {
                    return record;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "event {} never left pending",
                external_id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Drop the router and wait for queued dispatches to finish.
    pub async fn drain(self) -> (Arc<InMemoryRecordStore>, Arc<RecordingSink>) {
        let Self {
            router,
            store,
            sink,
            workers,
        } = self;
        drop(router);
        workers.join().await;
        (store, sink)
    }
}

// ============================================================================
// Requests
// ============================================================================

pub fn sign(body: &[u8]) -> String {
    sign_with(SECRET, body)
}

pub fn sign_with(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn webhook_request(body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-salla-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn signed_webhook(body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = sign(&bytes);
    webhook_request(bytes, Some(&signature))
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn order_created(order_id: &str) -> Value {
    serde_json::json!({
        "event": "order.created",
        "store_id": STORE,
        "data": { "id": order_id, "total": 250 }
    })
}
