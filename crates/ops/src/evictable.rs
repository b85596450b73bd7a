//! Eviction safety predicate: which pods a rebalancing pass may relocate at all.

use respread_core::{Evictable, LitePod};
use tracing::trace;

/// Forces a pod evictable regardless of the other checks.
pub const EVICT_ANNOTATION: &str = "descheduler.alpha.kubernetes.io/evict";
/// Static pods mirrored by the kubelet.
pub const MIRROR_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Safety predicate applied before a pod can become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultEvictable {
    pub evict_local_storage_pods: bool,
    /// Pods at or above this priority are kept.
    pub threshold_priority: i32,
}

impl DefaultEvictable {
    pub fn new(evict_local_storage_pods: bool, threshold_priority: i32) -> Self {
        Self { evict_local_storage_pods, threshold_priority }
    }

    /// Why the pod must stay put, if it must.
    pub fn refusal(&self, pod: &LitePod) -> Option<&'static str> {
        if pod.annotation(EVICT_ANNOTATION).is_some() { return None; }
        if pod.annotation(MIRROR_ANNOTATION).is_some() { return Some("mirror pod"); }
        if pod.owner_kinds.is_empty() { return Some("no owner"); }
        if pod.owner_kinds.iter().any(|k| k == "DaemonSet") { return Some("DaemonSet owned"); }
        if pod.terminating { return Some("terminating"); }
        if pod.local_storage && !self.evict_local_storage_pods { return Some("local storage"); }
        if pod.priority.is_some_and(|p| p >= self.threshold_priority) { return Some("priority at or above threshold"); }
        None
    }
}

impl Evictable for DefaultEvictable {
    fn is_evictable(&self, pod: &LitePod) -> bool {
        match self.refusal(pod) {
            Some(why) => {
                trace!(pod = %pod.pod_ref(), why, "not evictable");
                false
            }
            None => true,
        }
    }
}
