//! Informer-backed cache: one lazily provisioned list+watch reflector per
//! (namespace, kind), synced on first access.

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    core::{DynamicObject, GroupVersionKind, TypeMeta},
    runtime::{
        reflector::{store::Writer, Store},
        watcher, WatchStreamExt,
    },
    Client,
};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vantage_core::ObjectKey;
use vantage_store::{event_timestamp, involved_object_is, ObjectCache};

use crate::{find_api_resource, raw_object};

struct Informer {
    reader: Store<DynamicObject>,
    task: JoinHandle<()>,
}

/// [`ObjectCache`] whose contents mirror the cluster through reflectors.
///
/// `retrieve` provisions a reflector for the key's (namespace, kind) on first
/// access and blocks until its local store has synced or `done` fires.
/// Mutation flows one-way from the cluster, so `store`/`delete` are
/// unsupported.
pub struct InformerCache {
    client: Client,
    done: watch::Receiver<bool>,
    informers: tokio::sync::Mutex<FxHashMap<(String, String), Informer>>,
}

impl InformerCache {
    pub fn new(client: Client, done: watch::Receiver<bool>) -> Self {
        Self {
            client,
            done,
            informers: tokio::sync::Mutex::new(FxHashMap::default()),
        }
    }

    async fn ensure_informer(&self, key: &ObjectKey) -> Result<Store<DynamicObject>> {
        let slot = (key.namespace.clone(), key.kind.clone());
        let mut informers = self.informers.lock().await;
        if let Some(informer) = informers.get(&slot) {
            return Ok(informer.reader.clone());
        }

        let gvk = gvk_for(&key.api_version, &key.kind);
        let (ar, namespaced) = find_api_resource(self.client.clone(), &gvk).await?;
        let api: Api<DynamicObject> = if namespaced && !key.namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), &key.namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };

        let writer = Writer::new(ar.clone());
        let reader = writer.as_reader();
        // List items arrive without per-item TypeMeta; patch it back in so the
        // stored raw form keeps a fully populated key.
        let types = TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        };
        let rf = watcher::watcher(api, watcher::Config::default())
            .modify(move |obj| {
                if obj.types.is_none() {
                    obj.types = Some(types.clone());
                }
            })
            .reflect(writer);

        let mut done = self.done.clone();
        let label = format!("{}/{}", key.namespace, key.kind);
        let task = tokio::spawn(async move {
            futures::pin_mut!(rf);
            loop {
                tokio::select! {
                    _ = done.changed() => break,
                    next = rf.next() => match next {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => warn!(informer = %label, error = %e, "informer watch error"),
                        None => break,
                    }
                }
            }
            debug!(informer = %label, "informer stopped");
        });

        informers.insert(
            slot,
            Informer {
                reader: reader.clone(),
                task,
            },
        );
        Ok(reader)
    }
}

#[async_trait::async_trait]
impl ObjectCache for InformerCache {
    async fn store(&self, _object: &Value) -> Result<()> {
        Err(anyhow!("not implemented: informer cache is fed by watches"))
    }

    async fn retrieve(&self, key: &ObjectKey) -> Result<Vec<Value>> {
        if key.api_version.is_empty() || key.kind.is_empty() {
            bail!("informer cache query needs apiVersion and kind: {key}");
        }
        let reader = self.ensure_informer(key).await?;

        // The one deliberate blocking point in the read path: wait for the
        // initial sync, cancellable by shutdown.
        let mut done = self.done.clone();
        tokio::select! {
            res = reader.wait_until_ready() => {
                res.context("informer store dropped before initial sync")?;
            }
            _ = done.changed() => {
                bail!("shutdown requested while syncing informer for {key}");
            }
        }

        let mut hits = Vec::new();
        for obj in reader.state() {
            let raw = raw_object(obj.as_ref())?;
            let stored =
                ObjectKey::for_object(&raw).context("deriving key for informer object")?;
            if stored.matches(key) {
                hits.push((stored, raw));
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits.into_iter().map(|(_, raw)| raw).collect())
    }

    async fn delete(&self, _object: &Value) -> Result<()> {
        Err(anyhow!("not implemented: informer cache is fed by watches"))
    }

    async fn events(&self, object: &Value) -> Result<Vec<Value>> {
        let identity = ObjectKey::for_object(object).context("deriving identity for events")?;
        let mut events = self
            .retrieve(&ObjectKey::list(&identity.namespace, "v1", "Event"))
            .await?;
        events.retain(|ev| involved_object_is(ev, &identity));
        events.sort_by_key(event_timestamp);
        Ok(events)
    }

    async fn reset(&self) {
        let mut informers = self.informers.lock().await;
        for (_, informer) in informers.drain() {
            informer.task.abort();
        }
    }
}

impl Drop for InformerCache {
    fn drop(&mut self) {
        if let Ok(informers) = self.informers.try_lock() {
            for informer in informers.values() {
                informer.task.abort();
            }
        }
    }
}

fn gvk_for(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        },
        None => GroupVersionKind {
            group: String::new(),
            version: api_version.to_string(),
            kind: kind.to_string(),
        },
    }
}
