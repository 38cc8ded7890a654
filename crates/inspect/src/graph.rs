//! Workload inspector: depth-first construction of the dependency graph
//! around one object, with visited-set cycle protection and pod grouping.

use std::time::Instant;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use metrics::histogram;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::debug;

use vantage_core::{Edge, EdgeType, Node, PodGroup, ResourceStatus, ResourceViewer};
use vantage_store::ObjectCache;

use crate::relations::{
    api_version_of, backend_services_for_ingress, controllers_for_pod, first_owner_uid,
    ingresses_for_service, kind_of, labels_of, name_of, owners_of, pods_matching_service,
    pods_owned_by, replica_sets_for_deployment, uid_of,
};
use crate::status::resource_status;

const SUPPORTED_KINDS: [&str; 8] = [
    "Pod",
    "Service",
    "Deployment",
    "ReplicaSet",
    "Ingress",
    "StatefulSet",
    "ReplicationController",
    "DaemonSet",
];

struct Traversal {
    visited: FxHashSet<String>,
    out: ResourceViewer,
}

impl Traversal {
    fn add_node(&mut self, id: &str, node: Node) {
        self.out.objects.entry(id.to_string()).or_insert(node);
    }

    fn add_edge(&mut self, from: &str, to: &str, edge: EdgeType) {
        self.out
            .dag
            .entry(from.to_string())
            .or_default()
            .push(Edge {
                node: to.to_string(),
                edge,
            });
    }
}

/// Build the resource viewer graph around `object`.
///
/// Unsupported root kinds yield an empty graph without error. Any
/// relationship-resolution failure aborts the whole build; callers get no
/// partial graph.
pub async fn build(cache: &dyn ObjectCache, object: &Value) -> Result<ResourceViewer> {
    let t0 = Instant::now();
    let kind = kind_of(object);
    if !SUPPORTED_KINDS.contains(&kind) {
        debug!(kind = %kind, "unsupported resource viewer kind");
        return Ok(ResourceViewer::empty());
    }
    let selected = if kind == "Pod" {
        pod_group(object)?.uid
    } else {
        uid_of(object)?.to_string()
    };
    let mut traversal = Traversal {
        visited: FxHashSet::default(),
        out: ResourceViewer::new(selected),
    };
    visit(&mut traversal, cache, object)
        .await
        .with_context(|| format!("building graph for {} {}", kind, name_of(object)))?;
    histogram!("graph_build_ms", t0.elapsed().as_millis() as f64);
    Ok(traversal.out)
}

fn visit<'a>(
    t: &'a mut Traversal,
    cache: &'a dyn ObjectCache,
    object: &'a Value,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match kind_of(object) {
            "Pod" => visit_pod(t, cache, object).await,
            "Service" => visit_service(t, cache, object).await,
            "Deployment" => visit_deployment(t, cache, object).await,
            "Ingress" => visit_ingress(t, cache, object).await,
            "ReplicaSet" | "StatefulSet" | "ReplicationController" | "DaemonSet" => {
                visit_pod_owner(t, cache, object).await
            }
            _ => Ok(()),
        }
    })
}

/// Register the object's own node, with its evaluated status.
async fn register_node(t: &mut Traversal, cache: &dyn ObjectCache, object: &Value) -> Result<()> {
    let uid = uid_of(object)?.to_string();
    let status = resource_status(cache, object)
        .await
        .with_context(|| format!("evaluating status of {} {}", kind_of(object), name_of(object)))?
        .collapse();
    t.add_node(
        &uid,
        Node::new(name_of(object), api_version_of(object), kind_of(object), status),
    );
    Ok(())
}

/// Pods surface through their group node only; visiting one walks its
/// back-references so the surrounding topology is discovered.
async fn visit_pod(t: &mut Traversal, cache: &dyn ObjectCache, pod: &Value) -> Result<()> {
    let uid = uid_of(pod)?.to_string();
    if !t.visited.insert(uid) {
        return Ok(());
    }
    let controllers = controllers_for_pod(cache, pod)
        .await
        .with_context(|| format!("resolving references to Pod {}", name_of(pod)))?;
    for controller in &controllers {
        visit(t, cache, controller).await?;
    }
    Ok(())
}

async fn visit_service(t: &mut Traversal, cache: &dyn ObjectCache, service: &Value) -> Result<()> {
    let uid = uid_of(service)?.to_string();
    if !t.visited.insert(uid.clone()) {
        return Ok(());
    }
    register_node(t, cache, service).await?;

    let pods = pods_matching_service(cache, service)
        .await
        .with_context(|| format!("resolving pods for Service {}", name_of(service)))?;
    visit_pod_groups(t, cache, &uid, pods, EdgeType::Implicit).await?;

    let ingresses = ingresses_for_service(cache, service)
        .await
        .with_context(|| format!("resolving ingresses for Service {}", name_of(service)))?;
    for ingress in &ingresses {
        visit(t, cache, ingress).await?;
    }
    Ok(())
}

async fn visit_deployment(
    t: &mut Traversal,
    cache: &dyn ObjectCache,
    deployment: &Value,
) -> Result<()> {
    let uid = uid_of(deployment)?.to_string();
    if !t.visited.insert(uid.clone()) {
        return Ok(());
    }
    register_node(t, cache, deployment).await?;

    let replica_sets = replica_sets_for_deployment(cache, deployment)
        .await
        .with_context(|| format!("resolving replica sets for Deployment {}", name_of(deployment)))?;
    for rs in &replica_sets {
        visit(t, cache, rs).await?;
        t.add_edge(&uid, uid_of(rs)?, EdgeType::Explicit);
    }
    Ok(())
}

/// ReplicaSet / StatefulSet / ReplicationController / DaemonSet: explicit
/// edges down to owned pods, back-references up through owner references.
async fn visit_pod_owner(t: &mut Traversal, cache: &dyn ObjectCache, object: &Value) -> Result<()> {
    let uid = uid_of(object)?.to_string();
    if !t.visited.insert(uid.clone()) {
        return Ok(());
    }
    register_node(t, cache, object).await?;

    let pods = pods_owned_by(cache, object)
        .await
        .with_context(|| format!("resolving pods for {} {}", kind_of(object), name_of(object)))?;
    visit_pod_groups(t, cache, &uid, pods, EdgeType::Explicit).await?;

    let owners = owners_of(cache, object).await?;
    for owner in &owners {
        visit(t, cache, owner).await?;
    }
    Ok(())
}

async fn visit_ingress(t: &mut Traversal, cache: &dyn ObjectCache, ingress: &Value) -> Result<()> {
    let uid = uid_of(ingress)?.to_string();
    if !t.visited.insert(uid.clone()) {
        return Ok(());
    }
    register_node(t, cache, ingress).await?;

    let services = backend_services_for_ingress(cache, ingress)
        .await
        .with_context(|| format!("resolving backends for Ingress {}", name_of(ingress)))?;
    for service in &services {
        visit(t, cache, service).await?;
        t.add_edge(&uid, uid_of(service)?, EdgeType::Explicit);
    }
    Ok(())
}

/// Group pods, register one node per group with an edge from `from`, then
/// visit each pod individually for its own back-edge discovery.
async fn visit_pod_groups(
    t: &mut Traversal,
    cache: &dyn ObjectCache,
    from: &str,
    pods: Vec<Value>,
    edge: EdgeType,
) -> Result<()> {
    for group in group_pods(&pods)? {
        t.add_node(
            &group.uid,
            Node::new(group.name.as_str(), "v1", "Pod", ResourceStatus::Ok),
        );
        t.add_edge(from, &group.uid, edge);
    }
    for pod in &pods {
        visit(t, cache, pod).await?;
    }
    Ok(())
}

/// One group per distinct (owner UID, sorted label string) pair, in pod
/// order.
fn group_pods(pods: &[Value]) -> Result<Vec<PodGroup>> {
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut groups = Vec::new();
    for pod in pods {
        let group = pod_group(pod)?;
        if seen.insert(group.uid.clone()) {
            groups.push(group);
        }
    }
    Ok(groups)
}

/// A pod's group: its controlling owner's UID (the pod's own UID when
/// ownerless) plus its sorted label string, which also names the group node.
fn pod_group(pod: &Value) -> Result<PodGroup> {
    let owner_uid = match first_owner_uid(pod) {
        Some(uid) => uid,
        None => uid_of(pod)?,
    };
    let labels = labels_of(pod);
    let name = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let uid = format!("{owner_uid}:{name}");
    Ok(PodGroup {
        uid,
        name,
        labels: labels.into_iter().collect(),
    })
}
