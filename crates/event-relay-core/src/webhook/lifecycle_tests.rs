use super::*;
use serde_json::json;

#[test]
fn test_classify_lifecycle_names() {
    assert_eq!(
        LifecycleEvent::classify("app.store.authorize"),
        Some(LifecycleEvent::Authorize)
    );
    assert_eq!(
        LifecycleEvent::classify("app.installed"),
        Some(LifecycleEvent::Installed)
    );
    assert_eq!(
        LifecycleEvent::classify("app.updated"),
        Some(LifecycleEvent::Installed)
    );
    assert_eq!(
        LifecycleEvent::classify("app.uninstalled"),
        Some(LifecycleEvent::Uninstalled)
    );
    assert_eq!(
        LifecycleEvent::classify(" app.store.uninstalled "),
        Some(LifecycleEvent::Uninstalled)
    );
}

#[test]
fn test_data_events_are_not_lifecycle() {
    assert_eq!(LifecycleEvent::classify("order.created"), None);
    assert_eq!(LifecycleEvent::classify(""), None);
}

#[test]
fn test_token_grant_from_authorize_payload() {
    let payload = json!({
        "event": "app.store.authorize",
        "merchant": 1234,
        "data": {
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "scope": "orders.read",
            "expires": 1767100000
        }
    });

    let grant = TokenGrant::from_payload(&payload).expect("grant present");
    assert_eq!(grant.access_token.as_str(), "at-1");
    assert_eq!(grant.refresh_token.as_deref().map(String::as_str), Some("rt-1"));
    assert_eq!(grant.scope.as_deref(), Some("orders.read"));
    assert_eq!(grant.expires, Some(1767100000));
}

#[test]
fn test_token_grant_requires_access_token() {
    let payload = json!({ "data": { "refresh_token": "rt" } });
    assert!(TokenGrant::from_payload(&payload).is_none());
    assert!(TokenGrant::from_payload(&json!({})).is_none());
}

#[test]
fn test_token_grant_debug_redacts_tokens() {
    let payload = json!({ "data": { "access_token": "very-secret", "refresh_token": "also" } });
    let grant = TokenGrant::from_payload(&payload).unwrap();
    let rendered = format!("{:?}", grant);

    assert!(!rendered.contains("very-secret"));
    assert!(!rendered.contains("also"));
}
