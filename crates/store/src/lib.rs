//! Vantage object cache: the store contract and the map-backed implementation
//! fed by the watch pipeline.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use metrics::counter;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use vantage_core::{CacheAction, CacheNotification, ObjectKey};

/// Concurrent store of cluster objects keyed by namespace/apiVersion/kind/name.
///
/// `retrieve` accepts partial keys per [`ObjectKey::matches`]; an empty result
/// is not an error. Implementations must reflect every `store`/`delete` that
/// completed before a `retrieve` began.
#[async_trait::async_trait]
pub trait ObjectCache: Send + Sync {
    /// Insert or overwrite the object at its derived key.
    async fn store(&self, object: &Value) -> Result<()>;

    /// Every stored object matching the (possibly partial) key, sorted by key.
    async fn retrieve(&self, key: &ObjectKey) -> Result<Vec<Value>>;

    /// Remove the object at its derived key. Deleting an absent key is a no-op.
    async fn delete(&self, object: &Value) -> Result<()>;

    /// All cached `Event` objects whose `involvedObject` identity equals the
    /// given object's, ordered by `lastTimestamp`.
    async fn events(&self, object: &Value) -> Result<Vec<Value>>;

    /// Drop every entry.
    async fn reset(&self);
}

struct Notifier {
    tx: mpsc::Sender<CacheNotification>,
    done: watch::Receiver<bool>,
}

/// Map-backed [`ObjectCache`] guarded by a single mutex.
///
/// Notification delivery happens outside the lock so a slow listener never
/// blocks cache mutation; each pending send races the shutdown signal.
pub struct MemoryCache {
    inner: tokio::sync::Mutex<FxHashMap<ObjectKey, Value>>,
    notifier: Option<Notifier>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(FxHashMap::default()),
            notifier: None,
        }
    }

    /// A cache that emits a [`CacheNotification`] per mutation into `tx` until
    /// `done` fires.
    pub fn with_notifications(
        tx: mpsc::Sender<CacheNotification>,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(FxHashMap::default()),
            notifier: Some(Notifier { tx, done }),
        }
    }

    fn notify(&self, key: ObjectKey, action: CacheAction) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let note = CacheNotification { key, action };
        match notifier.tx.try_send(note) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("cache notification listener gone; dropping");
            }
            Err(mpsc::error::TrySendError::Full(note)) => {
                // Slow listener: hand the send off so the mutation never
                // blocks, racing it against shutdown.
                let tx = notifier.tx.clone();
                let mut done = notifier.done.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        res = tx.send(note) => {
                            if res.is_err() {
                                debug!("cache notification listener gone; dropping");
                            }
                        }
                        _ = done.changed() => {
                            debug!("shutdown while delivering cache notification");
                        }
                    }
                });
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectCache for MemoryCache {
    async fn store(&self, object: &Value) -> Result<()> {
        let key = ObjectKey::for_object(object).context("deriving cache key for store")?;
        let existed = {
            let mut map = self.inner.lock().await;
            map.insert(key.clone(), object.clone()).is_some()
        };
        counter!("cache_store_total", 1u64);
        let action = if existed {
            CacheAction::Update
        } else {
            CacheAction::Store
        };
        self.notify(key, action);
        Ok(())
    }

    async fn retrieve(&self, key: &ObjectKey) -> Result<Vec<Value>> {
        let map = self.inner.lock().await;
        let mut hits: Vec<(&ObjectKey, &Value)> =
            map.iter().filter(|(k, _)| k.matches(key)).collect();
        hits.sort_by(|a, b| a.0.cmp(b.0));
        Ok(hits.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn delete(&self, object: &Value) -> Result<()> {
        let key = ObjectKey::for_object(object).context("deriving cache key for delete")?;
        let existed = {
            let mut map = self.inner.lock().await;
            map.remove(&key).is_some()
        };
        if existed {
            counter!("cache_delete_total", 1u64);
            self.notify(key, CacheAction::Delete);
        }
        Ok(())
    }

    async fn events(&self, object: &Value) -> Result<Vec<Value>> {
        let identity = ObjectKey::for_object(object).context("deriving identity for events")?;
        let map = self.inner.lock().await;
        let mut hits: Vec<Value> = map
            .iter()
            .filter(|(k, _)| k.kind == "Event" && k.namespace == identity.namespace)
            .filter(|(_, v)| involved_object_is(v, &identity))
            .map(|(_, v)| v.clone())
            .collect();
        hits.sort_by_key(|v| event_timestamp(v));
        Ok(hits)
    }

    async fn reset(&self) {
        self.inner.lock().await.clear();
    }
}

/// Whether `event`'s `involvedObject` names exactly the given identity.
pub fn involved_object_is(event: &Value, identity: &ObjectKey) -> bool {
    let Some(involved) = event.get("involvedObject") else {
        return false;
    };
    let field = |name: &str| involved.get(name).and_then(|v| v.as_str()).unwrap_or("");
    field("namespace") == identity.namespace
        && field("apiVersion") == identity.api_version
        && field("kind") == identity.kind
        && field("name") == identity.name
}

/// `lastTimestamp` as a unix timestamp, 0 when absent or unparsable.
pub fn event_timestamp(event: &Value) -> i64 {
    event
        .get("lastTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
