#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use kube::core::DynamicObject;
use kube::runtime::watcher::{self, Event};
use serde_json::json;

use vantage_core::ObjectKey;
use vantage_store::{MemoryCache, ObjectCache};
use vantage_watch::{fan_in, WatchStream};

fn dyn_obj(ns: &str, api_version: &str, kind: &str, name: &str) -> DynamicObject {
    serde_json::from_value(json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {
            "name": name,
            "namespace": ns,
            "uid": format!("uid-{}", name),
        },
    }))
    .unwrap()
}

fn fixed_stream(events: Vec<Event<DynamicObject>>) -> WatchStream {
    stream::iter(events.into_iter().map(Ok::<_, watcher::Error>))
        .chain(stream::pending())
        .boxed()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fan_in_applies_watch_events() {
    let cache = Arc::new(MemoryCache::new());
    let (done_tx, done_rx) = tokio::sync::watch::channel(false);

    let pods = fixed_stream(vec![
        Event::Init,
        Event::InitApply(dyn_obj("default", "v1", "Pod", "web-1")),
        Event::InitApply(dyn_obj("default", "v1", "Pod", "web-2")),
        Event::InitDone,
        Event::Delete(dyn_obj("default", "v1", "Pod", "web-2")),
    ]);
    let services = fixed_stream(vec![Event::Apply(dyn_obj("default", "v1", "Service", "web"))]);

    let handle = fan_in(
        vec![("v1/Pod".into(), pods), ("v1/Service".into(), services)],
        cache.clone(),
        done_rx,
    );

    // Allow the pipeline to drain.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pods = cache
        .retrieve(&ObjectKey::list("default", "v1", "Pod"))
        .await
        .unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0]["metadata"]["name"], "web-1");

    let services = cache
        .retrieve(&ObjectKey::list("default", "v1", "Service"))
        .await
        .unwrap();
    assert_eq!(services.len(), 1);

    done_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .expect("pipeline did not stop after shutdown signal");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_every_drain_task() {
    let cache = Arc::new(MemoryCache::new());
    let (done_tx, done_rx) = tokio::sync::watch::channel(false);

    // Streams that never produce anything: only the done signal can stop them.
    let idle = |_: usize| stream::pending::<watcher::Result<Event<DynamicObject>>>().boxed();
    let streams: Vec<(String, WatchStream)> = (0..4)
        .map(|i| (format!("stream-{i}"), idle(i)))
        .collect();

    let handle = fan_in(streams, cache, done_rx);
    done_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle.stopped())
        .await
        .expect("drain tasks leaked after shutdown");
}
