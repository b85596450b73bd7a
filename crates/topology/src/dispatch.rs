//! Eviction dispatch: hand candidates to the evictor one at a time, in identity order.

use metrics::counter;
use respread_core::{EvictError, PodEvictor, PodRef};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::membership::NodeIndex;
use crate::select::CandidateSet;

/// What to do with the remaining candidates after an evictor error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop dispatching for the rest of the pass.
    #[default]
    AbortOnError,
    /// Record the error and keep going.
    ContinueOnError,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub evicted: Vec<PodRef>,
    /// Declined by the evictor (limits, disruption budgets); candidates again next pass.
    pub refused: Vec<PodRef>,
    pub errors: Vec<EvictError>,
    /// Candidates never attempted because dispatch stopped early.
    pub not_attempted: Vec<PodRef>,
    pub aborted: bool,
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize { self.evicted.len() + self.refused.len() + self.errors.len() }
}

/// Dispatch every candidate sequentially; the evictor's limits depend on seeing a stable order.
/// Cancellation is checked before each evictor call; nothing already evicted is undone.
pub async fn dispatch(
    candidates: CandidateSet,
    nodes: &NodeIndex<'_>,
    evictor: &dyn PodEvictor,
    policy: FailurePolicy,
    cancel: &CancellationToken,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let mut pending = candidates.into_iter();

    while let Some((pod_ref, candidate)) = pending.next() {
        if cancel.is_cancelled() {
            info!(remaining = pending.len() + 1, "dispatch cancelled");
            report.cancelled = true;
            report.not_attempted.push(pod_ref);
            break;
        }

        let node_name = candidate.pod.assigned_node().unwrap_or_default();
        let outcome = match nodes.get(node_name) {
            Some(node) => evictor.evict_pod(&candidate.pod, node, candidate.reason).await,
            None => Err(EvictError::UnknownNode { pod: pod_ref.clone(), node: node_name.to_string() }),
        };

        match outcome {
            Ok(true) => {
                info!(pod = %pod_ref, node = %node_name, reason = candidate.reason, "evicted");
                counter!("respread_evictions_total", 1u64, "outcome" => "evicted");
                report.evicted.push(pod_ref);
            }
            Ok(false) => {
                debug!(pod = %pod_ref, node = %node_name, "eviction refused");
                counter!("respread_evictions_total", 1u64, "outcome" => "refused");
                report.refused.push(pod_ref);
            }
            Err(e) => {
                error!(pod = %pod_ref, error = %e, "eviction failed");
                counter!("respread_evictions_total", 1u64, "outcome" => "error");
                report.errors.push(e);
                if policy == FailurePolicy::AbortOnError {
                    report.aborted = true;
                    break;
                }
            }
        }
    }

    report.not_attempted.extend(pending.map(|(r, _)| r));
    report
}
