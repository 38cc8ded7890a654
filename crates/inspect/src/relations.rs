//! Relationship resolver: pure queries over the object cache following
//! ownership and label-selector links in both directions.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ReplicationController, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use serde::de::DeserializeOwned;
use serde_json::Value;

use vantage_core::ObjectKey;
use vantage_store::ObjectCache;

/// Label keys injected by controllers, ignored when comparing selectors.
const GENERATED_SELECTOR_KEYS: [&str; 4] = [
    "statefulset.kubernetes.io/pod-name",
    "pod-template-hash",
    "controller-revision-hash",
    "pod-template-generation",
];

/// (apiVersion, kind) pairs scanned when resolving what references a pod.
const POD_REFERRER_KINDS: [(&str, &str); 6] = [
    ("v1", "Service"),
    ("apps/v1", "ReplicaSet"),
    ("apps/v1", "Deployment"),
    ("apps/v1", "StatefulSet"),
    ("v1", "ReplicationController"),
    ("apps/v1", "DaemonSet"),
];

pub(crate) fn kind_of(raw: &Value) -> &str {
    raw.get("kind").and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn api_version_of(raw: &Value) -> &str {
    raw.get("apiVersion").and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn name_of(raw: &Value) -> &str {
    raw.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub(crate) fn namespace_of(raw: &Value) -> &str {
    raw.pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub(crate) fn uid_of(raw: &Value) -> Result<&str> {
    raw.pointer("/metadata/uid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .with_context(|| format!("{} {} has no uid", kind_of(raw), name_of(raw)))
}

pub(crate) fn labels_of(raw: &Value) -> BTreeMap<String, String> {
    raw.pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether `raw` carries an owner reference with the given UID.
pub(crate) fn references_owner(raw: &Value, owner_uid: &str) -> bool {
    raw.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(owner_uid))
        })
        .unwrap_or(false)
}

pub(crate) fn first_owner_uid(raw: &Value) -> Option<&str> {
    raw.pointer("/metadata/ownerReferences/0/uid")
        .and_then(Value::as_str)
}

/// Deserialize a raw cached object into its typed view, wrapping failures
/// with the object's identity.
pub(crate) fn convert<T: DeserializeOwned>(raw: &Value) -> Result<T> {
    serde_json::from_value(raw.clone())
        .with_context(|| format!("converting {} {}", kind_of(raw), name_of(raw)))
}

fn owner_references(raw: &Value) -> Result<Vec<OwnerReference>> {
    match raw.pointer("/metadata/ownerReferences") {
        Some(refs) => serde_json::from_value(refs.clone())
            .with_context(|| format!("reading owner references of {} {}", kind_of(raw), name_of(raw))),
        None => Ok(Vec::new()),
    }
}

fn map_selector(labels: BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        match_expressions: None,
    }
}

/// Extract the pod label selector of a controller or Service; each kind keeps
/// it in a different field. Jobs and CronJobs contribute none.
pub fn pod_selector(raw: &Value) -> Result<Option<LabelSelector>> {
    let selector = match kind_of(raw) {
        "Deployment" => convert::<Deployment>(raw)?.spec.map(|s| s.selector),
        "ReplicaSet" => convert::<ReplicaSet>(raw)?.spec.map(|s| s.selector),
        "StatefulSet" => convert::<StatefulSet>(raw)?.spec.map(|s| s.selector),
        "DaemonSet" => convert::<DaemonSet>(raw)?.spec.map(|s| s.selector),
        "ReplicationController" => convert::<ReplicationController>(raw)?
            .spec
            .and_then(|s| s.selector)
            .map(map_selector),
        "Service" => convert::<Service>(raw)?
            .spec
            .and_then(|s| s.selector)
            .map(map_selector),
        "Job" | "CronJob" => None,
        other => bail!("no pod selector defined for kind {other}"),
    };
    Ok(selector)
}

/// Whether `selector` matches the label set. An empty selector matches
/// nothing, preventing "selects everything" false positives.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let required = selector.match_labels.as_ref();
    let expressions = selector.match_expressions.as_deref().unwrap_or(&[]);
    if required.map_or(true, |m| m.is_empty()) && expressions.is_empty() {
        return false;
    }
    if let Some(required) = required {
        for (key, value) in required {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    for requirement in expressions {
        let value = labels.get(&requirement.key);
        let candidates = requirement.values.as_deref().unwrap_or(&[]);
        let ok = match requirement.operator.as_str() {
            "In" => value.map_or(false, |v| candidates.iter().any(|c| c == v)),
            "NotIn" => value.map_or(true, |v| !candidates.iter().any(|c| c == v)),
            "Exists" => value.is_some(),
            "DoesNotExist" => value.is_none(),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

type NormalizedSelector = (BTreeMap<String, String>, Vec<(String, String, Vec<String>)>);

fn normalized(selector: &LabelSelector) -> NormalizedSelector {
    let labels = selector
        .match_labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|(k, _)| !GENERATED_SELECTOR_KEYS.contains(&k.as_str()))
        .collect();
    let mut expressions: Vec<_> = selector
        .match_expressions
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|r| !GENERATED_SELECTOR_KEYS.contains(&r.key.as_str()))
        .map(|r| {
            let mut values = r.values.unwrap_or_default();
            values.sort();
            (r.key, r.operator, values)
        })
        .collect();
    expressions.sort();
    (labels, expressions)
}

/// Selector equality after stripping the well-known generated label keys, so
/// controller-injected labels do not break "same logical group" checks.
pub fn selectors_equal_ignoring_generated(a: &LabelSelector, b: &LabelSelector) -> bool {
    normalized(a) == normalized(b)
}

/// Pods owned by a selector-bearing controller. Selector membership is
/// necessary, but the owner reference UID is the authoritative filter.
pub async fn pods_owned_by(cache: &dyn ObjectCache, owner: &Value) -> Result<Vec<Value>> {
    let Some(selector) = pod_selector(owner)? else {
        return Ok(Vec::new());
    };
    let owner_uid = uid_of(owner)?;
    let pods = cache
        .retrieve(&ObjectKey::list(namespace_of(owner), "v1", "Pod"))
        .await
        .with_context(|| format!("retrieving pods for {} {}", kind_of(owner), name_of(owner)))?;
    Ok(pods
        .into_iter()
        .filter(|pod| {
            selector_matches(&selector, &labels_of(pod)) && references_owner(pod, owner_uid)
        })
        .collect())
}

/// Pods a Service selects. Selector only: Services own nothing.
pub async fn pods_matching_service(cache: &dyn ObjectCache, service: &Value) -> Result<Vec<Value>> {
    let Some(selector) = pod_selector(service)? else {
        return Ok(Vec::new());
    };
    let pods = cache
        .retrieve(&ObjectKey::list(namespace_of(service), "v1", "Pod"))
        .await
        .with_context(|| format!("retrieving pods for Service {}", name_of(service)))?;
    Ok(pods
        .into_iter()
        .filter(|pod| selector_matches(&selector, &labels_of(pod)))
        .collect())
}

/// Objects in the pod's namespace that reference it: a label selector that
/// matches the pod's labels (an empty selector never matches) or an owner
/// reference on the pod naming the object.
pub async fn controllers_for_pod(cache: &dyn ObjectCache, pod: &Value) -> Result<Vec<Value>> {
    let labels = labels_of(pod);
    let mut out = Vec::new();
    for (api_version, kind) in POD_REFERRER_KINDS {
        let objects = cache
            .retrieve(&ObjectKey::list(namespace_of(pod), api_version, kind))
            .await
            .with_context(|| format!("scanning {kind} referencing Pod {}", name_of(pod)))?;
        for object in objects {
            let selected = match pod_selector(&object)? {
                Some(selector) => selector_matches(&selector, &labels),
                None => false,
            };
            let owns = uid_of(&object)
                .ok()
                .is_some_and(|uid| references_owner(pod, uid));
            if selected || owns {
                out.push(object);
            }
        }
    }
    Ok(out)
}

/// Resolve an object's owner references through the cache. An owner that is
/// not cached resolves to nothing; that is not an error.
pub async fn owners_of(cache: &dyn ObjectCache, raw: &Value) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for owner in owner_references(raw)? {
        let key = ObjectKey::new(
            namespace_of(raw),
            owner.api_version,
            owner.kind,
            owner.name,
        );
        let mut found = cache
            .retrieve(&key)
            .await
            .with_context(|| format!("resolving owner of {} {}", kind_of(raw), name_of(raw)))?;
        out.append(&mut found);
    }
    Ok(out)
}

/// ReplicaSets owned by the deployment; the current one (selector-equal to
/// the deployment ignoring generated keys) ordered first.
pub async fn replica_sets_for_deployment(
    cache: &dyn ObjectCache,
    deployment: &Value,
) -> Result<Vec<Value>> {
    let deployment_uid = uid_of(deployment)?;
    let typed: Deployment = convert(deployment)?;
    let deployment_selector = typed.spec.map(|s| s.selector).unwrap_or_default();

    let replica_sets = cache
        .retrieve(&ObjectKey::list(
            namespace_of(deployment),
            "apps/v1",
            "ReplicaSet",
        ))
        .await
        .with_context(|| format!("retrieving replica sets for {}", name_of(deployment)))?;

    let mut ranked = Vec::new();
    for raw in replica_sets {
        if !references_owner(&raw, deployment_uid) {
            continue;
        }
        let rs: ReplicaSet = convert(&raw)?;
        let current = rs
            .spec
            .map(|s| selectors_equal_ignoring_generated(&s.selector, &deployment_selector))
            .unwrap_or(false);
        ranked.push((current, raw));
    }
    ranked.sort_by_key(|(current, _)| !*current);
    Ok(ranked.into_iter().map(|(_, raw)| raw).collect())
}

/// Service names referenced by an Ingress: the default backend plus every
/// rule path.
pub fn ingress_backend_names(ingress: &Ingress) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(spec) = &ingress.spec {
        if let Some(service) = spec.default_backend.as_ref().and_then(|b| b.service.as_ref()) {
            names.push(service.name.clone());
        }
        for rule in spec.rules.as_deref().unwrap_or(&[]) {
            if let Some(http) = &rule.http {
                for path in &http.paths {
                    if let Some(service) = &path.backend.service {
                        names.push(service.name.clone());
                    }
                }
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

/// Cached Services named by the ingress's backends. Backends naming a missing
/// Service are skipped here; the status evaluator reports them.
pub async fn backend_services_for_ingress(
    cache: &dyn ObjectCache,
    ingress_raw: &Value,
) -> Result<Vec<Value>> {
    let ingress: Ingress = convert(ingress_raw)?;
    let namespace = namespace_of(ingress_raw);
    let mut out = Vec::new();
    for name in ingress_backend_names(&ingress) {
        let mut found = cache
            .retrieve(&ObjectKey::new(namespace, "v1", "Service", &name))
            .await
            .with_context(|| format!("resolving ingress backend service {name}"))?;
        out.append(&mut found);
    }
    Ok(out)
}

/// Ingresses in the service's namespace whose backend list names it.
pub async fn ingresses_for_service(cache: &dyn ObjectCache, service: &Value) -> Result<Vec<Value>> {
    let name = name_of(service);
    let ingresses = cache
        .retrieve(&ObjectKey::list(
            namespace_of(service),
            "networking.k8s.io/v1",
            "Ingress",
        ))
        .await
        .with_context(|| format!("scanning ingresses for Service {name}"))?;
    let mut out = Vec::new();
    for raw in ingresses {
        let ingress: Ingress = convert(&raw)?;
        if ingress_backend_names(&ingress).iter().any(|n| n == name) {
            out.push(raw);
        }
    }
    Ok(out)
}
