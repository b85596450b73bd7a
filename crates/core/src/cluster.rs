//! Collaborators a rebalancing pass depends on: cluster reads, the safety
//! predicate and the eviction executor.

use anyhow::Result;

use crate::{LiteNode, LitePod, PodRef};

/// Read access to cluster state. Any error is fatal for the scope it was issued in.
#[async_trait::async_trait]
pub trait ClusterStateProvider: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<LiteNode>>;
    async fn list_namespaces(&self) -> Result<Vec<String>>;
    async fn list_pods(&self, namespace: &str) -> Result<Vec<LitePod>>;
}

/// Safety predicate: whether a pod may be relocated at all.
pub trait Evictable: Send + Sync {
    fn is_evictable(&self, pod: &LitePod) -> bool;
}

impl<F> Evictable for F
where
    F: Fn(&LitePod) -> bool + Send + Sync,
{
    fn is_evictable(&self, pod: &LitePod) -> bool { self(pod) }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EvictError {
    #[error("evicting {pod}: {message}")]
    Transport { pod: PodRef, message: String },
    #[error("evicting {pod}: node {node:?} not in snapshot")]
    UnknownNode { pod: PodRef, node: String },
}

/// Eviction executor. `Ok(false)` is a refusal (limits, disruption budget), not an error.
#[async_trait::async_trait]
pub trait PodEvictor: Send + Sync {
    async fn evict_pod(&self, pod: &LitePod, node: &LiteNode, reason: &str) -> Result<bool, EvictError>;
}
