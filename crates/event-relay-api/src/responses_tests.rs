use super::*;
use serde_json::json;

#[test]
fn test_webhook_ack_omits_unset_flags() {
    assert_eq!(
        serde_json::to_value(WebhookAck::received()).unwrap(),
        json!({ "received": true })
    );
    assert_eq!(
        serde_json::to_value(WebhookAck::deduplicated()).unwrap(),
        json!({ "received": true, "deduplicated": true })
    );
    assert_eq!(
        serde_json::to_value(WebhookAck::handled("app.installed")).unwrap(),
        json!({ "received": true, "handled": "app.installed" })
    );
}

#[test]
fn test_retry_response_shape() {
    let id = RecordId::new();
    let value = serde_json::to_value(RetryResponse::attempted(id)).unwrap();

    assert_eq!(value["status"], "retry_attempted");
    assert_eq!(value["id"], id.to_string());
}

#[test]
fn test_events_page_size_defaults_and_caps() {
    let query = |limit| EventsQuery {
        store_id: Some("S1".to_string()),
        limit,
        offset: None,
    };

    assert_eq!(query(None).page_size(), DEFAULT_EVENT_LIMIT);
    assert_eq!(query(Some(0)).page_size(), DEFAULT_EVENT_LIMIT);
    assert_eq!(query(Some(10)).page_size(), 10);
    assert_eq!(query(Some(10_000)).page_size(), MAX_EVENT_LIMIT);
}

#[test]
fn test_connect_request_requires_all_fields() {
    let complete = Ga4ConnectRequest {
        store_id: Some(" S1 ".to_string()),
        measurement_id: Some("G-1".to_string()),
        api_secret: Some("secret".to_string()),
        enabled: None,
    };
    assert_eq!(
        complete.required_fields(),
        Some(("S1".to_string(), "G-1".to_string(), "secret".to_string()))
    );

    let blank_secret = Ga4ConnectRequest {
        api_secret: Some("   ".to_string()),
        ..complete.clone()
    };
    assert_eq!(blank_secret.required_fields(), None);
    assert_eq!(Ga4ConnectRequest::default().required_fields(), None);
}

#[test]
fn test_settings_view_never_contains_secret() {
    let settings = Ga4Settings::new("S1", "G-1", "top-secret", true);
    let value = serde_json::to_value(Ga4SettingsView::from(&settings)).unwrap();

    assert!(!value.to_string().contains("top-secret"));
    assert_eq!(value["api_secret_set"], true);
}

#[test]
fn test_store_view_omits_tokens() {
    let record = StoreRecord::new("S1", StoreStatus::Active, "enc:v1:ciphertext".to_string());
    let value = serde_json::to_value(StoreView::from(&record)).unwrap();

    assert!(!value.to_string().contains("ciphertext"));
    assert_eq!(value["status"], "active");
}

#[test]
fn test_stats_total_sums_counts() {
    let stats = StatsResponse::new(
        "S1".to_string(),
        24,
        [
            (EventStatus::Sent, 3),
            (EventStatus::Failed, 1),
            (EventStatus::Pending, 0),
            (EventStatus::Skipped, 2),
        ],
    );

    assert_eq!(stats.total, 6);
    assert_eq!(stats.by_status["sent"], 3);
    assert_eq!(stats.by_status["pending"], 0);
}
