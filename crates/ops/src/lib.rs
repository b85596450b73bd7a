//! respread ops: the eviction safety predicate and the executor that posts
//! evictions to the API server.

#![forbid(unsafe_code)]

mod evictable;

pub use evictable::{DefaultEvictable, EVICT_ANNOTATION, MIRROR_ANNOTATION};

use std::sync::{Mutex, MutexGuard};

use k8s_openapi::api::core::v1::Pod;
use kube::{api::{Api, EvictParams}, Client};
use metrics::counter;
use respread_core::{EvictError, LiteNode, LitePod, PodEvictor};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// The eviction subresource call, split out so refusals can be exercised without a cluster.
#[async_trait::async_trait]
pub trait EvictionApi: Send + Sync {
    async fn evict(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
}

pub struct KubeEvictionApi {
    client: Client,
}

impl KubeEvictionApi {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl EvictionApi for KubeEvictionApi {
    async fn evict(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.evict(name, &EvictParams::default()).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionLimits {
    pub per_node: Option<usize>,
    pub total: Option<usize>,
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    by_node: FxHashMap<String, usize>,
}

/// [`PodEvictor`] posting to `pods/eviction`, with per-node and global limits.
/// Counts live for the evictor's lifetime; build one per pass.
pub struct KubeEvictor<A = KubeEvictionApi> {
    api: A,
    dry_run: bool,
    limits: EvictionLimits,
    counts: Mutex<Counts>,
}

impl KubeEvictor<KubeEvictionApi> {
    pub fn new(client: Client, dry_run: bool, limits: EvictionLimits) -> Self {
        Self::with_api(KubeEvictionApi::new(client), dry_run, limits)
    }
}

impl<A: EvictionApi> KubeEvictor<A> {
    pub fn with_api(api: A, dry_run: bool, limits: EvictionLimits) -> Self {
        Self { api, dry_run, limits, counts: Mutex::new(Counts::default()) }
    }

    /// Evictions counted so far (dry-run evictions included).
    pub fn total(&self) -> usize { self.counts().total }

    // A poisoned lock is recovered so limits keep applying.
    fn counts(&self) -> MutexGuard<'_, Counts> { self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) }

    fn limit_reached(&self, node: &str) -> Option<&'static str> {
        let counts = self.counts();
        if self.limits.per_node.is_some_and(|max| counts.by_node.get(node).copied().unwrap_or(0) >= max) {
            return Some("node_limit");
        }
        if self.limits.total.is_some_and(|max| counts.total >= max) {
            return Some("total_limit");
        }
        None
    }

    fn record(&self, node: &str) {
        let mut counts = self.counts();
        counts.total += 1;
        *counts.by_node.entry(node.to_string()).or_default() += 1;
    }
}

fn refused(cause: &'static str) -> Result<bool, EvictError> {
    counter!("respread_evictor_refusals_total", 1u64, "cause" => cause);
    Ok(false)
}

#[async_trait::async_trait]
impl<A: EvictionApi> PodEvictor for KubeEvictor<A> {
    async fn evict_pod(&self, pod: &LitePod, node: &LiteNode, reason: &str) -> Result<bool, EvictError> {
        if let Some(cause) = self.limit_reached(&node.name) {
            debug!(pod = %pod.pod_ref(), node = %node.name, cause, "eviction limit reached");
            return refused(cause);
        }
        if self.dry_run {
            info!(pod = %pod.pod_ref(), node = %node.name, reason, "dry-run: would evict");
            self.record(&node.name);
            return Ok(true);
        }
        match self.api.evict(&pod.namespace, &pod.name).await {
            Ok(()) => {
                self.record(&node.name);
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 429 => {
                warn!(pod = %pod.pod_ref(), "eviction blocked by disruption budget (429)");
                refused("disruption_budget")
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(pod = %pod.pod_ref(), "pod already gone");
                refused("not_found")
            }
            Err(e) => Err(EvictError::Transport { pod: pod.pod_ref(), message: e.to_string() }),
        }
    }
}
