#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;
use vantage_api::{DashboardApi, DashboardError, InProcApi};
use vantage_core::ObjectKey;
use vantage_store::{MemoryCache, ObjectCache};

async fn seeded() -> InProcApi {
    let cache = Arc::new(MemoryCache::new());
    cache
        .store(&json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web-1", "namespace": "default", "uid": "p1" },
        }))
        .await
        .unwrap();
    InProcApi::new(cache)
}

#[tokio::test]
async fn get_distinguishes_absent_from_error() {
    let api = seeded().await;
    let found = api
        .get(ObjectKey::new("default", "v1", "Pod", "web-1"))
        .await
        .unwrap();
    assert!(found.is_some());

    // Absent object is the Ok(None) sentinel, not an error.
    let missing = api
        .get(ObjectKey::new("default", "v1", "Pod", "ghost"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn partial_key_is_rejected_where_one_object_is_required() {
    let api = seeded().await;
    let err = api
        .resource_viewer(ObjectKey::list("default", "v1", "Pod"))
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Validation(_)));
}

#[tokio::test]
async fn viewer_for_missing_object_is_not_found() {
    let api = seeded().await;
    let err = api
        .resource_viewer(ObjectKey::new("default", "v1", "Pod", "ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::NotFound(_)));
}

#[tokio::test]
async fn viewer_builds_for_cached_object() {
    let api = seeded().await;
    let viewer = api
        .resource_viewer(ObjectKey::new("default", "v1", "Pod", "web-1"))
        .await
        .unwrap();
    assert_eq!(viewer.selected, "p1:");
}
