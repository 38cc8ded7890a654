//! Vantage public API façade (in-process).
//!
//! This crate defines the stable trait and error types frontends (HTTP layer,
//! CLI) depend on. The in-process implementation queries any [`ObjectCache`]
//! directly; a remote implementation can take its place later.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::info;

use vantage_core::{ObjectKey, ResourceViewer};
use vantage_store::ObjectCache;

/// API errors suitable for transport over RPC later. Malformed input, a
/// distinct not-found condition, and internal failures map onto the 4xx /
/// not-found / 5xx behavior of the serving layer.
#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum DashboardError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type DashboardResult<T> = Result<T, DashboardError>;

/// Declarative dashboard query surface.
#[async_trait::async_trait]
pub trait DashboardApi: Send + Sync {
    /// Every cached object matching the (possibly partial) key.
    async fn list(&self, key: ObjectKey) -> DashboardResult<Vec<Value>>;

    /// One object by concrete key; `Ok(None)` means "not stored", which is
    /// not an error.
    async fn get(&self, key: ObjectKey) -> DashboardResult<Option<Value>>;

    /// Cached events involving the object at the concrete key.
    async fn events(&self, key: ObjectKey) -> DashboardResult<Vec<Value>>;

    /// The dependency graph around the object at the concrete key.
    async fn resource_viewer(&self, key: ObjectKey) -> DashboardResult<ResourceViewer>;
}

// ----------------- In-process implementation -----------------

/// Implementation backed directly by an object cache.
pub struct InProcApi {
    cache: Arc<dyn ObjectCache>,
}

impl InProcApi {
    pub fn new(cache: Arc<dyn ObjectCache>) -> Self {
        Self { cache }
    }

    fn internal(e: anyhow::Error) -> DashboardError {
        DashboardError::Internal(format!("{e:#}"))
    }

    fn require_concrete(key: &ObjectKey) -> DashboardResult<()> {
        if key.is_concrete() {
            Ok(())
        } else {
            Err(DashboardError::Validation(format!(
                "key must name a single object: {key}"
            )))
        }
    }
}

#[async_trait::async_trait]
impl DashboardApi for InProcApi {
    async fn list(&self, key: ObjectKey) -> DashboardResult<Vec<Value>> {
        let t0 = Instant::now();
        let objects = self.cache.retrieve(&key).await.map_err(Self::internal)?;
        info!(key = %key, count = objects.len(), took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(objects)
    }

    async fn get(&self, key: ObjectKey) -> DashboardResult<Option<Value>> {
        Self::require_concrete(&key)?;
        let mut objects = self.cache.retrieve(&key).await.map_err(Self::internal)?;
        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.swap_remove(0))
        })
    }

    async fn events(&self, key: ObjectKey) -> DashboardResult<Vec<Value>> {
        Self::require_concrete(&key)?;
        let object = self
            .get(key.clone())
            .await?
            .ok_or_else(|| DashboardError::NotFound(key.to_string()))?;
        self.cache.events(&object).await.map_err(Self::internal)
    }

    async fn resource_viewer(&self, key: ObjectKey) -> DashboardResult<ResourceViewer> {
        let t0 = Instant::now();
        Self::require_concrete(&key)?;
        let object = self
            .get(key.clone())
            .await?
            .ok_or_else(|| DashboardError::NotFound(key.to_string()))?;
        let viewer = vantage_inspect::build(self.cache.as_ref(), &object)
            .await
            .map_err(Self::internal)?;
        info!(key = %key, nodes = viewer.objects.len(), took_ms = %t0.elapsed().as_millis(), "api: resource viewer ok");
        Ok(viewer)
    }
}

// ----------------- Mock implementation -----------------

/// Simple canned implementation for frontend tests.
#[derive(Default)]
pub struct MockApi {
    pub objects: Vec<Value>,
    pub events: Vec<Value>,
    pub viewer: Option<ResourceViewer>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DashboardApi for MockApi {
    async fn list(&self, key: ObjectKey) -> DashboardResult<Vec<Value>> {
        Ok(self
            .objects
            .iter()
            .filter(|o| {
                ObjectKey::for_object(o)
                    .map(|k| k.matches(&key))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn get(&self, key: ObjectKey) -> DashboardResult<Option<Value>> {
        Ok(self.list(key).await?.into_iter().next())
    }

    async fn events(&self, _key: ObjectKey) -> DashboardResult<Vec<Value>> {
        Ok(self.events.clone())
    }

    async fn resource_viewer(&self, _key: ObjectKey) -> DashboardResult<ResourceViewer> {
        self.viewer
            .clone()
            .ok_or_else(|| DashboardError::NotFound("no viewer configured".into()))
    }
}
