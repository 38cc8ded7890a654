//! Vantage kube integration: discovery of watchable resources and the watch
//! fan-in pipeline that keeps an [`ObjectCache`] in sync with the cluster.

#![forbid(unsafe_code)]

mod informer;

pub use informer::InformerCache;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{verbs, Discovery, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vantage_store::ObjectCache;

/// A served resource kind, as listed to frontends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespaced: bool,
}

impl DiscoveredResource {
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Build a client from an explicit kubeconfig path, or infer one from the
/// environment (in-cluster config, `KUBECONFIG`, `~/.kube/config`).
pub async fn client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kc = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kc, &kube::config::KubeConfigOptions::default())
                .await
                .context("building client config from kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("inferring kube client config")?,
    };
    Client::try_from(config).context("constructing kube client")
}

/// Namespaced resources whose verb set contains both `list` and `watch`.
pub async fn watchable_resources(client: Client) -> Result<Vec<ApiResource>> {
    let discovery = Discovery::new(client)
        .run()
        .await
        .context("running api discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if matches!(caps.scope, Scope::Namespaced)
                && caps.supports_operation(verbs::LIST)
                && caps.supports_operation(verbs::WATCH)
            {
                out.push(ar.clone());
            }
        }
    }
    out.sort_by(|a, b| {
        a.group
            .cmp(&b.group)
            .then(a.version.cmp(&b.version))
            .then(a.kind.cmp(&b.kind))
    });
    Ok(out)
}

/// Discover served resources for frontend listings.
pub async fn discover(client: Client) -> Result<Vec<DiscoveredResource>> {
    let resources = watchable_resources(client).await?;
    Ok(resources
        .into_iter()
        .map(|ar| DiscoveredResource {
            group: ar.group,
            version: ar.version,
            kind: ar.kind,
            namespaced: true,
        })
        .collect())
}

/// Parse a `v1/Kind` or `group/v1/Kind` key.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind {
            group: String::new(),
            version: version.to_string(),
            kind: kind.to_string(),
        }),
        [group, version, kind] => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!(
            "invalid gvk key: {} (expect v1/Kind or group/v1/Kind)",
            key
        )),
    }
}

/// Resolve a GVK to its ApiResource and scope via discovery.
pub async fn find_api_resource(
    client: Client,
    gvk: &GroupVersionKind,
) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client)
        .run()
        .await
        .context("running api discovery")?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!(
        "GVK not found: {}/{}/{}",
        gvk.group,
        gvk.version,
        gvk.kind
    ))
}

fn strip_managed_fields(raw: &mut Value) {
    if let Some(obj) = raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        obj.remove("managedFields");
    }
}

/// Serialize a watch object into the raw form the cache stores.
pub fn raw_object(obj: &DynamicObject) -> Result<Value> {
    let mut raw = serde_json::to_value(obj).context("serializing watch object")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

/// One resource kind's stream of watch events.
pub type WatchStream = BoxStream<'static, watcher::Result<Event<DynamicObject>>>;

enum ResourceEvent {
    Applied(DynamicObject),
    Deleted(DynamicObject),
}

/// Running pipeline: one drain task per watch plus the cache consumer.
pub struct PipelineHandle {
    drains: Vec<JoinHandle<()>>,
    consumer: JoinHandle<()>,
}

impl PipelineHandle {
    /// Resolves once every drain task has exited and the consumer has drained
    /// the closed fan-in channel.
    pub async fn stopped(self) {
        for handle in self.drains {
            let _ = handle.await;
        }
        let _ = self.consumer.await;
    }
}

/// Open one watch per watchable resource kind in `namespace` and fan the
/// resulting events into `cache` until `done` fires.
///
/// Failure to open any single watch aborts the whole startup; no partial
/// pipeline is left running.
pub async fn start(
    client: Client,
    namespace: &str,
    cache: Arc<dyn ObjectCache>,
    done: watch::Receiver<bool>,
) -> Result<PipelineHandle> {
    let resources = watchable_resources(client.clone()).await?;
    let mut streams = Vec::with_capacity(resources.len());
    for ar in resources {
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
        // Probe list access up front so an unwatchable resource fails startup
        // instead of wedging one drain task later.
        api.list(&ListParams::default().limit(1))
            .await
            .with_context(|| format!("opening watch for {}/{}", ar.api_version, ar.kind))?;
        let label = format!("{}/{}", ar.api_version, ar.kind);
        // List items arrive without per-item TypeMeta; patch it back in so the
        // cache always derives a fully populated key.
        let types = kube::core::TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        };
        let stream = watcher::watcher(api, watcher::Config::default())
            .modify(move |obj| {
                if obj.types.is_none() {
                    obj.types = Some(types.clone());
                }
            })
            .boxed();
        streams.push((label, stream));
    }
    info!(watches = streams.len(), ns = %namespace, "watch pipeline started");
    Ok(fan_in(streams, cache, done))
}

/// Fan a set of per-kind watch streams into the cache.
///
/// Factored out of [`start`] so tests can inject synthetic streams. Per-kind
/// ordering is preserved by giving each stream its own drain task; no ordering
/// holds across kinds.
pub fn fan_in(
    streams: Vec<(String, WatchStream)>,
    cache: Arc<dyn ObjectCache>,
    done: watch::Receiver<bool>,
) -> PipelineHandle {
    let (tx, mut rx) = mpsc::channel::<ResourceEvent>(1);
    let mut drains = Vec::with_capacity(streams.len());
    for (label, stream) in streams {
        drains.push(tokio::spawn(drain_watch(
            label,
            stream,
            tx.clone(),
            done.clone(),
        )));
    }
    // The consumer sees the channel close once every drain has exited.
    drop(tx);
    let consumer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let applied = match event {
                ResourceEvent::Applied(obj) => match raw_object(&obj) {
                    Ok(raw) => cache.store(&raw).await,
                    Err(e) => Err(e),
                },
                ResourceEvent::Deleted(obj) => match raw_object(&obj) {
                    Ok(raw) => cache.delete(&raw).await,
                    Err(e) => Err(e),
                },
            };
            match applied {
                Ok(()) => counter!("watch_events_applied_total", 1u64),
                Err(e) => warn!(error = %e, "failed to apply watch event"),
            }
        }
        debug!("watch consumer stopped");
    });
    PipelineHandle { drains, consumer }
}

async fn drain_watch(
    label: String,
    mut stream: WatchStream,
    tx: mpsc::Sender<ResourceEvent>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = done.changed() => {
                debug!(gvk = %label, "stopping watch drain");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(Event::Apply(obj))) | Some(Ok(Event::InitApply(obj))) => {
                    if tx.send(ResourceEvent::Applied(obj)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Event::Delete(obj))) => {
                    if tx.send(ResourceEvent::Deleted(obj)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Event::Init)) | Some(Ok(Event::InitDone)) => {
                    debug!(gvk = %label, "watch (re)list boundary");
                }
                Some(Err(e)) => warn!(gvk = %label, error = %e, "watch error"),
                None => {
                    debug!(gvk = %label, "watch stream ended");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_gvk_key;

    #[test]
    fn gvk_key_forms() {
        let core = parse_gvk_key("v1/Pod").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(core.kind, "Pod");

        let grouped = parse_gvk_key("apps/v1/Deployment").unwrap();
        assert_eq!(grouped.group, "apps");

        assert!(parse_gvk_key("Deployment").is_err());
    }
}
