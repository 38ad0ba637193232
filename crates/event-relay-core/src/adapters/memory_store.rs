//! # In-Memory Record Store
//!
//! Thread-safe in-memory implementation of the event, tenant and sink
//! settings repositories for development and tests.
//!
//! Each table sits behind its own lock. The event table keeps a unique index
//! on `(store_id, external_id, type)` that is checked and updated under the
//! same write lock as the row itself, so concurrent duplicate inserts cannot
//! both succeed.

use crate::events::{EventPatch, EventRecord, NormalizedEvent};
use crate::store::{
    EventFilter, EventRepository, Ga4Settings, SinkSettingsRepository, SortOrder, StorageError,
    StorePatch, StoreRecord, TenantRepository,
};
use crate::{RecordId, Timestamp};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

type DedupKey = (String, String, String);

/// Stored event row. The payload is kept as serialized JSON text.
#[derive(Debug, Clone)]
struct EventRow {
    seq: u64,
    id: RecordId,
    created_at: Timestamp,
    event: NormalizedEvent,
    payload: String,
}

impl EventRow {
    fn to_record(&self) -> Result<EventRecord, StorageError> {
        let payload: Value =
            serde_json::from_str(&self.payload).map_err(|e| StorageError::OperationFailed {
                message: format!("stored payload for {} is not JSON: {}", self.id, e),
            })?;

        let mut event = self.event.clone();
        event.payload = payload;
        Ok(EventRecord {
            id: self.id,
            created_at: self.created_at,
            event,
        })
    }

    /// Row view used for filtering, without re-parsing the payload.
    fn header(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            created_at: self.created_at,
            event: self.event.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct EventTable {
    next_seq: u64,
    rows: HashMap<RecordId, EventRow>,
    unique: HashMap<DedupKey, RecordId>,
}

/// In-memory implementation of every record store interface.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    events: Arc<RwLock<EventTable>>,
    tenants: Arc<RwLock<HashMap<String, StoreRecord>>>,
    settings: Arc<RwLock<HashMap<String, Ga4Settings>>>,
}

impl InMemoryRecordStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub fn event_count(&self) -> usize {
        self.events.read().map(|t| t.rows.len()).unwrap_or(0)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read().map_err(|_| StorageError::Unavailable {
        message: "record store lock poisoned".to_string(),
    })
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write().map_err(|_| StorageError::Unavailable {
        message: "record store lock poisoned".to_string(),
    })
}

// ============================================================================
// Events
// ============================================================================

#[async_trait]
impl EventRepository for InMemoryRecordStore {
    async fn insert(&self, mut event: NormalizedEvent) -> Result<EventRecord, StorageError> {
        let payload =
            serde_json::to_string(&event.payload).map_err(|e| StorageError::OperationFailed {
                message: format!("payload serialization failed: {}", e),
            })?;
        event.payload = Value::Null;

        let key = (
            event.store_id.clone(),
            event.external_id.clone(),
            event.event_type.clone(),
        );

        let mut table = write(&self.events)?;
        if table.unique.contains_key(&key) {
            return Err(StorageError::Duplicate {
                key: format!("{}/{}/{}", key.0, key.1, key.2),
            });
        }

        let seq = table.next_seq;
        table.next_seq += 1;

        let row = EventRow {
            seq,
            id: RecordId::new(),
            created_at: Timestamp::now(),
            event,
            payload,
        };
        let record = row.to_record()?;

        table.unique.insert(key, row.id);
        table.rows.insert(row.id, row);

        debug!(record_id = %record.id, "Event row inserted");
        Ok(record)
    }

    async fn update_by_key(
        &self,
        id: &RecordId,
        patch: &EventPatch,
    ) -> Result<EventRecord, StorageError> {
        let mut table = write(&self.events)?;
        let row = table.rows.get_mut(id).ok_or_else(|| StorageError::NotFound {
            key: id.to_string(),
        })?;

        row.event.apply(patch);
        row.to_record()
    }

    async fn find_one(&self, filter: &EventFilter) -> Result<Option<EventRecord>, StorageError> {
        let table = read(&self.events)?;

        if let Some(id) = filter.record_id {
            return match table.rows.get(&id) {
                Some(row) if filter.matches(&row.header()) => row.to_record().map(Some),
                _ => Ok(None),
            };
        }

        if let (Some(store_id), Some(external_id), Some(event_type)) = (
            &filter.store_id,
            &filter.external_id,
            &filter.event_type,
        ) {
            let key = (store_id.clone(), external_id.clone(), event_type.clone());
            return match table.unique.get(&key).and_then(|id| table.rows.get(id)) {
                Some(row) if filter.matches(&row.header()) => row.to_record().map(Some),
                _ => Ok(None),
            };
        }

        let mut matching: Vec<&EventRow> = table
            .rows
            .values()
            .filter(|row| filter.matches(&row.header()))
            .collect();
        matching.sort_by_key(|row| row.seq);
        matching.first().map(|row| row.to_record()).transpose()
    }

    async fn find_many(
        &self,
        filter: &EventFilter,
        order: SortOrder,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let table = read(&self.events)?;

        let mut matching: Vec<&EventRow> = table
            .rows
            .values()
            .filter(|row| filter.matches(&row.header()))
            .collect();

        match order {
            SortOrder::NewestFirst => matching.sort_by(|a, b| b.seq.cmp(&a.seq)),
            SortOrder::OldestFirst => matching.sort_by_key(|row| row.seq),
        }

        matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(EventRow::to_record)
            .collect()
    }
}

// ============================================================================
// Tenants
// ============================================================================

#[async_trait]
impl TenantRepository for InMemoryRecordStore {
    async fn find(&self, store_id: &str) -> Result<Option<StoreRecord>, StorageError> {
        Ok(read(&self.tenants)?.get(store_id).cloned())
    }

    async fn insert(&self, record: StoreRecord) -> Result<StoreRecord, StorageError> {
        let mut tenants = write(&self.tenants)?;
        if tenants.contains_key(&record.store_id) {
            return Err(StorageError::Duplicate {
                key: record.store_id,
            });
        }
        tenants.insert(record.store_id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        store_id: &str,
        patch: &StorePatch,
    ) -> Result<StoreRecord, StorageError> {
        let mut tenants = write(&self.tenants)?;
        let record = tenants
            .get_mut(store_id)
            .ok_or_else(|| StorageError::NotFound {
                key: store_id.to_string(),
            })?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoreRecord>, StorageError> {
        let tenants = read(&self.tenants)?;
        let mut records: Vec<StoreRecord> = tenants.values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records.truncate(limit);
        Ok(records)
    }
}

// ============================================================================
// Sink settings
// ============================================================================

#[async_trait]
impl SinkSettingsRepository for InMemoryRecordStore {
    async fn find(&self, store_id: &str) -> Result<Option<Ga4Settings>, StorageError> {
        Ok(read(&self.settings)?.get(store_id).cloned())
    }

    async fn upsert(&self, mut settings: Ga4Settings) -> Result<Ga4Settings, StorageError> {
        settings.updated_at = Timestamp::now();
        write(&self.settings)?.insert(settings.store_id.clone(), settings.clone());
        Ok(settings)
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
