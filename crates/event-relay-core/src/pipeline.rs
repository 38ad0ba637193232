//! # Ingestion Pipeline
//!
//! Runs one webhook through every intake step in order:
//!
//! 1. signature verification over the raw body
//! 2. lifecycle short-circuit
//! 3. normalization and presence check
//! 4. tenant admission
//! 5. idempotency lookup
//! 6. persistence as `pending`
//! 7. hand-off to the dispatch queue, or `failed` with a queue reason code
//!    when the queue rejects the job
//!
//! The pipeline returns as soon as the event is persisted and queued. Dispatch
//! outcomes never affect the result.

use crate::crypto::CipherError;
use crate::dispatch::{DispatchJob, DispatchQueue, QueueRejected};
use crate::events::{EventPatch, NormalizedEvent};
use crate::store::{EventFilter, EventRepository, StorageError, StoreStatus};
use crate::tenants::{TenantError, TenantGate};
use crate::webhook::{
    event_type, extract_signature, normalize, LifecycleEvent, SignatureVerifier, WebhookRequest,
};
use crate::{EventId, RecordId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Result of a successfully ingested webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Lifecycle notification applied; `handled` is the event name
    Lifecycle { handled: String },
    /// The event was already stored; nothing was written
    Deduplicated,
    /// Stored as pending and handed to the dispatch queue. `queued` is false
    /// when the queue rejected the job and the event was marked failed.
    Accepted {
        record_id: RecordId,
        event_id: EventId,
        queued: bool,
    },
}

/// Reasons a webhook is rejected
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid signature")]
    Unauthorized,

    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Store not active: {status}")]
    StoreNotActive { status: StoreStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Token encryption failed: {0}")]
    Cipher(#[from] CipherError),
}

impl From<TenantError> for IngestError {
    fn from(error: TenantError) -> Self {
        match error {
            TenantError::MissingStoreId | TenantError::MissingAccessToken => {
                IngestError::InvalidPayload {
                    reason: error.to_string(),
                }
            }
            TenantError::Storage(e) => IngestError::Storage(e),
            TenantError::Cipher(e) => IngestError::Cipher(e),
        }
    }
}

/// End-to-end webhook intake.
#[derive(Clone)]
pub struct IngestionPipeline {
    verifier: Arc<dyn SignatureVerifier>,
    gate: TenantGate,
    events: Arc<dyn EventRepository>,
    queue: DispatchQueue,
    allow_authorization_signature: bool,
}

impl IngestionPipeline {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        gate: TenantGate,
        events: Arc<dyn EventRepository>,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            verifier,
            gate,
            events,
            queue,
            allow_authorization_signature: true,
        }
    }

    /// Whether a digest in the `Authorization` header is accepted when the
    /// dedicated signature header is absent.
    pub fn with_authorization_signature(mut self, allow: bool) -> Self {
        self.allow_authorization_signature = allow;
        self
    }

    /// The dispatch queue this pipeline feeds.
    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Ingest one webhook.
    ///
    /// # Errors
    ///
    /// - [`IngestError::Unauthorized`] when the signature does not verify
    /// - [`IngestError::InvalidPayload`] when tenant or type are missing
    /// - [`IngestError::StoreNotActive`] when the tenant is uninstalled
    /// - [`IngestError::Storage`] / [`IngestError::Cipher`] on internal faults
    #[instrument(
        skip(self, request),
        fields(
            body_len = request.body.len(),
            received_at = %request.received_at,
            correlation_id = request.headers.correlation_id.as_deref().unwrap_or("-"),
        )
    )]
    pub async fn ingest(&self, request: &WebhookRequest) -> Result<IngestOutcome, IngestError> {
        let signature = extract_signature(
            request.headers.signature.as_deref(),
            request.headers.authorization.as_deref(),
            self.allow_authorization_signature,
        );
        if !self.verifier.verify(&request.body, signature.as_deref()) {
            return Err(IngestError::Unauthorized);
        }

        let payload = request.parse_body();
        let name = event_type(&payload);

        if let Some(lifecycle) = LifecycleEvent::classify(&name) {
            self.gate.handle_lifecycle(lifecycle, &payload).await?;
            info!(event_type = %name, "Lifecycle webhook handled");
            return Ok(IngestOutcome::Lifecycle { handled: name });
        }

        let event = normalize(&payload);
        if !event.has_required_fields() {
            return Err(IngestError::InvalidPayload {
                reason: "missing store_id or event type".to_string(),
            });
        }

        let admission = self.gate.admit(&event.store_id).await?;
        if !admission.active {
            warn!(
                store_id = %event.store_id,
                status = %admission.record.status,
                "Webhook rejected for inactive tenant"
            );
            return Err(IngestError::StoreNotActive {
                status: admission.record.status,
            });
        }

        if self.is_duplicate(&event).await? {
            info!(
                store_id = %event.store_id,
                external_id = %event.external_id,
                event_type = %event.event_type,
                "Duplicate webhook ignored"
            );
            return Ok(IngestOutcome::Deduplicated);
        }

        let record = match self.events.insert(event).await {
            Ok(record) => record,
            // Lost a race with a concurrent delivery of the same event
            Err(StorageError::Duplicate { key }) => {
                info!(key = %key, "Duplicate webhook rejected at insert");
                return Ok(IngestOutcome::Deduplicated);
            }
            Err(e) => return Err(e.into()),
        };

        let record_id = record.id;
        let event_id = record.event.event_id;
        let queued = match self.queue.submit(DispatchJob {
            record_id,
            event: record.event,
        }) {
            Ok(()) => true,
            Err(rejected) => {
                self.record_queue_rejection(&record_id, rejected).await;
                false
            }
        };

        info!(
            record_id = %record_id,
            event_id = %event_id,
            queued,
            "Webhook accepted"
        );
        Ok(IngestOutcome::Accepted {
            record_id,
            event_id,
            queued,
        })
    }

    /// Mark an event that never reached the queue as failed. The webhook is
    /// still acknowledged, so this row is the only trace of the rejection.
    async fn record_queue_rejection(&self, record_id: &RecordId, rejected: QueueRejected) {
        let patch = EventPatch::queue_rejected(rejected.code());
        if let Err(e) = self.events.update_by_key(record_id, &patch).await {
            error!(
                record_id = %record_id,
                reason = %rejected,
                error = %e,
                "Failed to record dispatch queue rejection"
            );
        }
    }

    /// Point lookup on the dedup key. A partial key never matches.
    async fn is_duplicate(&self, event: &NormalizedEvent) -> Result<bool, StorageError> {
        if event.store_id.is_empty() || event.external_id.is_empty() || event.event_type.is_empty()
        {
            return Ok(false);
        }

        let filter = EventFilter::dedup_key(&event.store_id, &event.external_id, &event.event_type);
        Ok(self.events.find_one(&filter).await?.is_some())
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
