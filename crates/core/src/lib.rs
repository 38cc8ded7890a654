//! Vantage core types shared across the dashboard crates.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod viewer;

pub use viewer::{
    AdjacencyList, Edge, EdgeType, Node, PodGroup, ResourceStatus, ResourceStatusList,
    ResourceViewer, StatusEntry,
};

/// Identity of a cached object: namespace, API version, kind and name.
///
/// A concrete stored object always carries a fully populated key. Queries may
/// leave trailing fields empty: an empty `name` matches every object of the
/// namespace/apiVersion/kind, an empty `kind` additionally matches every kind,
/// and so on down to "everything in this namespace".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectKey {
    pub namespace: String,
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("object has no {0}")]
    MissingField(&'static str),
}

impl ObjectKey {
    pub fn new(
        namespace: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Partial key matching every object of a namespace/apiVersion/kind.
    pub fn list(
        namespace: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::new(namespace, api_version, kind, "")
    }

    /// Partial key matching every object in a namespace.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "", "", "")
    }

    /// Derive the storage key from an object's own metadata.
    ///
    /// apiVersion, kind and name are required; namespace defaults to the empty
    /// string for cluster-scoped objects.
    pub fn for_object(raw: &serde_json::Value) -> Result<Self, KeyError> {
        let api_version = raw
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(KeyError::MissingField("apiVersion"))?;
        let kind = raw
            .get("kind")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(KeyError::MissingField("kind"))?;
        let meta = raw.get("metadata").ok_or(KeyError::MissingField("metadata"))?;
        let name = meta
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(KeyError::MissingField("metadata.name"))?;
        let namespace = meta.get("namespace").and_then(|v| v.as_str()).unwrap_or("");
        Ok(Self::new(namespace, api_version, kind, name))
    }

    /// Whether this (concrete) key is selected by `query`.
    ///
    /// Namespace must match exactly; apiVersion, kind and name each widen the
    /// match to "all remaining objects" as soon as one is left empty.
    pub fn matches(&self, query: &ObjectKey) -> bool {
        if self.namespace != query.namespace {
            return false;
        }
        if query.api_version.is_empty() {
            return true;
        }
        if self.api_version != query.api_version {
            return false;
        }
        if query.kind.is_empty() {
            return true;
        }
        if self.kind != query.kind {
            return false;
        }
        if query.name.is_empty() {
            return true;
        }
        self.name == query.name
    }

    pub fn is_concrete(&self) -> bool {
        !self.api_version.is_empty() && !self.kind.is_empty() && !self.name.is_empty()
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.api_version, self.kind, self.name
        )
    }
}

/// Mutation kind carried by a [`CacheNotification`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CacheAction {
    Store,
    Delete,
    Update,
}

/// Emitted on each cache mutation for external observers (e.g. a live UI).
///
/// Delivery is best-effort: a notification races the shutdown signal and is
/// dropped if no listener consumes it in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheNotification {
    pub key: ObjectKey,
    pub action: CacheAction,
}

pub mod prelude {
    pub use super::viewer::{
        AdjacencyList, Edge, EdgeType, Node, PodGroup, ResourceStatus, ResourceStatusList,
        ResourceViewer, StatusEntry,
    };
    pub use super::{CacheAction, CacheNotification, ObjectKey};
}
