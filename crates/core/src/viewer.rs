//! Resource viewer model: the node/edge graph emitted by the workload
//! inspector, plus the per-node status types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Coarse health of a graph node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Ok,
    Warning,
    Error,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResourceStatus::Ok => "ok",
            ResourceStatus::Warning => "warning",
            ResourceStatus::Error => "error",
        })
    }
}

/// A single validation finding, optionally pointing at a related object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEntry {
    pub status: ResourceStatus,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_uid: Option<String>,
}

/// Ordered list of findings for one object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStatusList(pub Vec<StatusEntry>);

impl ResourceStatusList {
    pub fn push(&mut self, entry: StatusEntry) {
        self.0.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Error wins over Warning wins over Ok.
    pub fn collapse(&self) -> ResourceStatus {
        let mut out = ResourceStatus::Ok;
        for entry in &self.0 {
            match entry.status {
                ResourceStatus::Error => return ResourceStatus::Error,
                ResourceStatus::Warning => out = ResourceStatus::Warning,
                ResourceStatus::Ok => {}
            }
        }
        out
    }
}

impl FromIterator<StatusEntry> for ResourceStatusList {
    fn from_iter<T: IntoIterator<Item = StatusEntry>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Graph vertex, keyed in [`ResourceViewer`] by the object's UID (or a
/// synthetic id for grouped pods).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    pub api_version: String,
    pub kind: String,
    pub status: ResourceStatus,
    pub is_network: bool,
    pub views: Vec<serde_json::Value>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
        status: ResourceStatus,
    ) -> Self {
        let kind = kind.into();
        let is_network = matches!(kind.as_str(), "Service" | "Ingress");
        Self {
            name: name.into(),
            api_version: api_version.into(),
            kind,
            status,
            is_network,
            views: Vec::new(),
        }
    }
}

/// Explicit = ownership-derived, implicit = selector-derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Explicit,
    Implicit,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EdgeType::Explicit => "explicit",
            EdgeType::Implicit => "implicit",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    pub node: String,
    pub edge: EdgeType,
}

/// Source node key to its outgoing edges, in insertion order.
pub type AdjacencyList = BTreeMap<String, Vec<Edge>>;

/// The dependency graph around one selected object, in the wire shape the
/// rendering layer consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceViewer {
    #[serde(rename = "type")]
    pub view_type: String,
    pub selected: String,
    pub dag: AdjacencyList,
    pub objects: BTreeMap<String, Node>,
}

impl ResourceViewer {
    pub fn new(selected: impl Into<String>) -> Self {
        Self {
            view_type: "resourceviewer".to_string(),
            selected: selected.into(),
            dag: AdjacencyList::new(),
            objects: BTreeMap::new(),
        }
    }

    /// Empty graph for unsupported root kinds.
    pub fn empty() -> Self {
        Self::new("")
    }
}

/// Synthetic aggregation of pods sharing an owner and a label set, used to
/// keep graphs readable when a controller has many replica pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodGroup {
    pub uid: String,
    pub name: String,
    pub labels: SmallVec<[(String, String); 8]>,
}
