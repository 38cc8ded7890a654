#![forbid(unsafe_code)]

use serde_json::{json, Value};
use vantage_core::{CacheAction, ObjectKey};
use vantage_store::{MemoryCache, ObjectCache};

fn obj(ns: &str, api_version: &str, kind: &str, name: &str) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {
            "name": name,
            "namespace": ns,
            "uid": format!("uid-{}-{}", kind.to_lowercase(), name),
        },
    })
}

fn event(ns: &str, name: &str, involved: &Value, ts: &str) -> Value {
    let meta = involved.get("metadata").cloned().unwrap_or_default();
    json!({
        "apiVersion": "v1",
        "kind": "Event",
        "metadata": { "name": name, "namespace": ns, "uid": format!("uid-event-{name}") },
        "involvedObject": {
            "apiVersion": involved.get("apiVersion"),
            "kind": involved.get("kind"),
            "name": meta.get("name"),
            "namespace": meta.get("namespace"),
        },
        "lastTimestamp": ts,
        "message": "test event",
    })
}

fn names(objects: &[Value]) -> Vec<String> {
    objects
        .iter()
        .map(|o| o["metadata"]["name"].as_str().unwrap_or("").to_string())
        .collect()
}

#[tokio::test]
async fn retrieve_matches_layered_partial_keys() {
    let cache = MemoryCache::new();
    cache.store(&obj("default", "v1", "Pod", "web-1")).await.unwrap();
    cache.store(&obj("default", "v1", "Pod", "web-2")).await.unwrap();
    cache.store(&obj("default", "v1", "Service", "web")).await.unwrap();
    cache.store(&obj("other", "v1", "Pod", "stray")).await.unwrap();

    // Fully concrete key returns exactly the stored object.
    let full = cache
        .retrieve(&ObjectKey::new("default", "v1", "Pod", "web-1"))
        .await
        .unwrap();
    assert_eq!(names(&full), ["web-1"]);

    // Name left empty widens to every object of the namespace/apiVersion/kind.
    let pods = cache
        .retrieve(&ObjectKey::list("default", "v1", "Pod"))
        .await
        .unwrap();
    assert_eq!(names(&pods), ["web-1", "web-2"]);

    // Namespace-only key returns everything in the namespace.
    let all = cache
        .retrieve(&ObjectKey::namespace("default"))
        .await
        .unwrap();
    assert_eq!(names(&all), ["web-1", "web-2", "web"]);

    // No match is an empty result, not an error.
    let none = cache
        .retrieve(&ObjectKey::list("default", "v1", "ConfigMap"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn store_overwrites_in_place() {
    let cache = MemoryCache::new();
    let mut pod = obj("default", "v1", "Pod", "web-1");
    cache.store(&pod).await.unwrap();
    pod["status"] = json!({ "phase": "Running" });
    cache.store(&pod).await.unwrap();

    let got = cache
        .retrieve(&ObjectKey::list("default", "v1", "Pod"))
        .await
        .unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0]["status"]["phase"], "Running");
}

#[tokio::test]
async fn store_requires_full_identity() {
    let cache = MemoryCache::new();
    let err = cache
        .store(&json!({ "apiVersion": "v1", "metadata": { "name": "x" } }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cache key"), "got: {err:#}");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let cache = MemoryCache::new();
    let pod = obj("default", "v1", "Pod", "web-1");
    cache.store(&pod).await.unwrap();
    cache.delete(&pod).await.unwrap();
    cache.delete(&pod).await.unwrap();
    cache
        .delete(&obj("default", "v1", "Pod", "never-stored"))
        .await
        .unwrap();

    let got = cache
        .retrieve(&ObjectKey::namespace("default"))
        .await
        .unwrap();
    assert!(got.is_empty());
}

#[tokio::test]
async fn events_filter_on_involved_object() {
    let cache = MemoryCache::new();
    let pod = obj("default", "v1", "Pod", "web-1");
    let other = obj("default", "v1", "Pod", "web-2");
    cache.store(&pod).await.unwrap();
    cache.store(&other).await.unwrap();
    cache
        .store(&event("default", "ev-late", &pod, "2024-05-01T10:00:00Z"))
        .await
        .unwrap();
    cache
        .store(&event("default", "ev-early", &pod, "2024-05-01T09:00:00Z"))
        .await
        .unwrap();
    cache
        .store(&event("default", "ev-other", &other, "2024-05-01T08:00:00Z"))
        .await
        .unwrap();

    let got = cache.events(&pod).await.unwrap();
    assert_eq!(names(&got), ["ev-early", "ev-late"]);
}

#[tokio::test]
async fn reset_clears_everything() {
    let cache = MemoryCache::new();
    cache.store(&obj("default", "v1", "Pod", "web-1")).await.unwrap();
    cache.store(&obj("other", "v1", "Pod", "stray")).await.unwrap();
    cache.reset().await;

    assert!(cache
        .retrieve(&ObjectKey::namespace("default"))
        .await
        .unwrap()
        .is_empty());
    assert!(cache
        .retrieve(&ObjectKey::namespace("other"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn notifications_track_mutations() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let (_done_tx, done_rx) = tokio::sync::watch::channel(false);
    let cache = MemoryCache::with_notifications(tx, done_rx);

    let pod = obj("default", "v1", "Pod", "web-1");
    cache.store(&pod).await.unwrap();
    cache.store(&pod).await.unwrap();
    cache.delete(&pod).await.unwrap();

    let key = ObjectKey::new("default", "v1", "Pod", "web-1");
    let first = rx.recv().await.unwrap();
    assert_eq!(first.key, key);
    assert_eq!(first.action, CacheAction::Store);
    assert_eq!(rx.recv().await.unwrap().action, CacheAction::Update);
    assert_eq!(rx.recv().await.unwrap().action, CacheAction::Delete);
}

#[tokio::test]
async fn notifications_dropped_on_shutdown() {
    // Capacity-one channel with no consumer: the second send would block
    // forever without the shutdown race.
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let (done_tx, done_rx) = tokio::sync::watch::channel(false);
    let cache = MemoryCache::with_notifications(tx, done_rx);

    cache.store(&obj("default", "v1", "Pod", "a")).await.unwrap();
    cache.store(&obj("default", "v1", "Pod", "b")).await.unwrap();
    done_tx.send(true).unwrap();

    // Mutations never blocked on the stalled listener.
    let got = cache
        .retrieve(&ObjectKey::namespace("default"))
        .await
        .unwrap();
    assert_eq!(got.len(), 2);
    drop(rx);
}
