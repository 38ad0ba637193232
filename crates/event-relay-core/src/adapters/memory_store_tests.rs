use super::*;
use crate::events::EventStatus;
use crate::store::StoreStatus;
use serde_json::json;

fn order(store_id: &str, external_id: &str) -> NormalizedEvent {
    NormalizedEvent::pending(
        store_id,
        external_id,
        "order.created",
        json!({ "event": "order.created", "data": { "id": external_id } }),
    )
}

mod event_table_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_identity_and_keeps_payload() {
        let store = InMemoryRecordStore::new();

        let record = EventRepository::insert(&store, order("S1", "O1")).await.unwrap();

        assert_eq!(record.event.status, EventStatus::Pending);
        assert_eq!(record.event.payload["data"]["id"], "O1");
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = InMemoryRecordStore::new();
        EventRepository::insert(&store, order("S1", "O1")).await.unwrap();

        let result = EventRepository::insert(&store, order("S1", "O1")).await;

        assert!(matches!(result, Err(StorageError::Duplicate { .. })));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_same_external_id_different_type_allowed() {
        let store = InMemoryRecordStore::new();
        EventRepository::insert(&store, order("S1", "O1")).await.unwrap();

        let mut updated = order("S1", "O1");
        updated.event_type = "order.updated".to_string();

        assert!(EventRepository::insert(&store, updated).await.is_ok());
        assert_eq!(store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_inserts_store_one_row() {
        let store = InMemoryRecordStore::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { EventRepository::insert(&store, order("S1", "O1")).await })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_find_one_by_dedup_key_and_id() {
        let store = InMemoryRecordStore::new();
        let record = EventRepository::insert(&store, order("S1", "O1")).await.unwrap();

        let by_key = store
            .find_one(&EventFilter::dedup_key("S1", "O1", "order.created"))
            .await
            .unwrap();
        let by_id = store.find_one(&EventFilter::by_id(record.id)).await.unwrap();
        let missing = store
            .find_one(&EventFilter::dedup_key("S2", "O1", "order.created"))
            .await
            .unwrap();

        assert_eq!(by_key.map(|r| r.id), Some(record.id));
        assert_eq!(by_id.map(|r| r.id), Some(record.id));
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_by_key_applies_patch() {
        let store = InMemoryRecordStore::new();
        let record = EventRepository::insert(&store, order("S1", "O1")).await.unwrap();

        let updated = store
            .update_by_key(&record.id, &EventPatch::sent("ga4", 204, ""))
            .await
            .unwrap();

        assert_eq!(updated.event.status, EventStatus::Sent);
        assert_eq!(updated.event.payload["data"]["id"], "O1");
    }

    #[tokio::test]
    async fn test_update_unknown_record_not_found() {
        let store = InMemoryRecordStore::new();

        let result = store
            .update_by_key(&RecordId::new(), &EventPatch::manual_retry(1))
            .await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_find_many_orders_and_pages() {
        let store = InMemoryRecordStore::new();
        for i in 0..5 {
            EventRepository::insert(&store, order("S1", &format!("O{}", i))).await.unwrap();
        }
        EventRepository::insert(&store, order("S2", "X")).await.unwrap();

        let filter = EventFilter::for_store("S1");
        let newest = store
            .find_many(&filter, SortOrder::NewestFirst, 2, 0)
            .await
            .unwrap();
        let oldest = store
            .find_many(&filter, SortOrder::OldestFirst, 10, 3)
            .await
            .unwrap();

        let ids: Vec<_> = newest.iter().map(|r| r.event.external_id.as_str()).collect();
        assert_eq!(ids, vec!["O4", "O3"]);

        let ids: Vec<_> = oldest.iter().map(|r| r.event.external_id.as_str()).collect();
        assert_eq!(ids, vec!["O3", "O4"]);
    }
}

mod tenant_table_tests {
    use super::*;

    #[tokio::test]
    async fn test_tenant_insert_is_unique() {
        let store = InMemoryRecordStore::new();
        let record = StoreRecord::new("S1", StoreStatus::Installed, "pending".to_string());

        TenantRepository::insert(&store, record.clone()).await.unwrap();
        let again = TenantRepository::insert(&store, record).await;

        assert!(matches!(again, Err(StorageError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_tenant_update_preserves_installed_at() {
        let store = InMemoryRecordStore::new();
        let record = StoreRecord::new("S1", StoreStatus::Installed, "pending".to_string());
        let installed_at = record.installed_at;
        TenantRepository::insert(&store, record).await.unwrap();

        let updated = store
            .update("S1", &StorePatch::status(StoreStatus::Uninstalled))
            .await
            .unwrap();

        assert_eq!(updated.status, StoreStatus::Uninstalled);
        assert_eq!(updated.installed_at, installed_at);
        assert!(updated.updated_at >= installed_at);
    }

    #[tokio::test]
    async fn test_tenant_update_unknown_not_found() {
        let store = InMemoryRecordStore::new();
        let result = store
            .update("nope", &StorePatch::status(StoreStatus::Active))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_tenant_list_is_bounded() {
        let store = InMemoryRecordStore::new();
        for i in 0..3 {
            let record = StoreRecord::new(format!("S{}", i), StoreStatus::Active, String::new());
            TenantRepository::insert(&store, record).await.unwrap();
        }

        assert_eq!(store.list(2).await.unwrap().len(), 2);
        assert_eq!(store.list(50).await.unwrap().len(), 3);
    }
}

mod settings_table_tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_upsert_replaces() {
        let store = InMemoryRecordStore::new();

        store
            .upsert(Ga4Settings::new("S1", "G-1", "secret", true))
            .await
            .unwrap();
        store
            .upsert(Ga4Settings::new("S1", "G-2", "secret", false))
            .await
            .unwrap();

        let settings = SinkSettingsRepository::find(&store, "S1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settings.measurement_id, "G-2");
        assert!(!settings.enabled);
        assert!(SinkSettingsRepository::find(&store, "S2")
            .await
            .unwrap()
            .is_none());
    }
}
