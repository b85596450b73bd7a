//! Pass driver: snapshot the cluster, plan evictions per namespace, dispatch.

use std::time::Instant;

use futures::{stream, StreamExt};
use metrics::{counter, histogram};
use respread_core::{ClusterStateProvider, Evictable, LiteNode, LitePod, PodEvictor, PodRef};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{dispatch, DispatchReport};
use crate::extract::active_constraints;
use crate::membership::{DomainMembership, NodeIndex};
use crate::select::{select_from_domain, CandidateSet, EVICTION_REASON};
use crate::skew::SkewRecord;
use crate::{NamespaceScope, PassError, TopologySpreadParams};

// Namespaces listed concurrently while snapshotting.
const LIST_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct NamespacePods {
    pub namespace: String,
    pub pods: Vec<LitePod>,
}

/// A namespace left out of the pass because its pods could not be listed.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceFailure {
    pub namespace: String,
    pub error: String,
}

/// Immutable cluster state one pass operates on.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<LiteNode>,
    pub namespaces: Vec<NamespacePods>,
    pub failed: Vec<NamespaceFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedConstraint {
    pub topology_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespacePlan {
    pub namespace: String,
    pub records: Vec<SkewRecord>,
    pub skipped: Vec<SkippedConstraint>,
    pub candidates: Vec<PodRef>,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub namespaces: Vec<NamespacePlan>,
    pub candidates: CandidateSet,
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub namespaces: Vec<NamespacePlan>,
    pub failed: Vec<NamespaceFailure>,
    pub candidates: usize,
    pub dispatch: DispatchReport,
}

/// The topology-spread strategy.
pub struct TopologySpread {
    params: TopologySpreadParams,
}

impl TopologySpread {
    pub fn new(params: TopologySpreadParams) -> Self { Self { params } }

    /// Fetch nodes, namespaces and pods. Node or namespace listing failures end the pass;
    /// a pod listing failure only drops that namespace.
    pub async fn snapshot(
        &self,
        provider: &dyn ClusterStateProvider,
        cancel: &CancellationToken,
    ) -> Result<ClusterSnapshot, PassError> {
        if cancel.is_cancelled() { return Err(PassError::Cancelled); }
        let mut nodes = provider.list_nodes().await.map_err(PassError::ListNodes)?;
        if let Some(sel) = self.params.node_selector.as_ref().filter(|s| !s.is_everything()) {
            nodes.retain(|n| sel.matches(&n.labels));
        }

        let namespaces: Vec<String> = match &self.params.namespaces {
            NamespaceScope::Include(ns) => ns.clone(),
            scope => {
                if cancel.is_cancelled() { return Err(PassError::Cancelled); }
                let listed = provider.list_namespaces().await.map_err(PassError::ListNamespaces)?;
                listed.into_iter().filter(|ns| scope.admits(ns)).collect()
            }
        };

        let listed: Vec<(String, Option<anyhow::Result<Vec<LitePod>>>)> = stream::iter(namespaces)
            .map(|ns| async move {
                if cancel.is_cancelled() { return (ns, None); }
                let pods = provider.list_pods(&ns).await;
                (ns, Some(pods))
            })
            .buffered(LIST_CONCURRENCY)
            .collect()
            .await;

        let mut snap = ClusterSnapshot { nodes, ..Default::default() };
        for (namespace, pods) in listed {
            match pods {
                None => return Err(PassError::Cancelled),
                Some(Ok(pods)) => snap.namespaces.push(NamespacePods { namespace, pods }),
                Some(Err(e)) => {
                    warn!(ns = %namespace, error = %e, "listing pods failed; namespace skipped this pass");
                    counter!("respread_namespace_failures_total", 1u64);
                    snap.failed.push(NamespaceFailure { namespace, error: format!("{:#}", e) });
                }
            }
        }
        Ok(snap)
    }

    /// Compute skew records and the deduplicated candidate set. Pure over the snapshot.
    pub fn plan(&self, snap: &ClusterSnapshot, evictable: &dyn Evictable) -> Plan {
        let nodes = NodeIndex::new(&snap.nodes);
        let mut plan = Plan::default();
        for ns in &snap.namespaces {
            let (ns_plan, candidates) = self.plan_namespace(&nodes, ns, evictable);
            counter!("respread_candidates_total", candidates.len() as u64, "ns" => ns.namespace.clone());
            plan.candidates.extend(candidates);
            plan.namespaces.push(ns_plan);
        }
        plan
    }

    fn plan_namespace(&self, nodes: &NodeIndex<'_>, ns: &NamespacePods, evictable: &dyn Evictable) -> (NamespacePlan, CandidateSet) {
        let declared = self.params.constraints.get(&ns.namespace).map(Vec::as_slice).unwrap_or(&[]);
        let constraints = active_constraints(&ns.pods, declared, self.params.include_soft_constraints);
        let mut out = NamespacePlan { namespace: ns.namespace.clone(), records: Vec::new(), skipped: Vec::new(), candidates: Vec::new() };
        let mut candidates = CandidateSet::new();

        for constraint in constraints {
            let membership =
                match DomainMembership::build(nodes, &ns.namespace, &ns.pods, constraint, evictable, self.params.population) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(ns = %ns.namespace, key = %constraint.topology_key, error = %e, "skipping constraint");
                        counter!("respread_selector_errors_total", 1u64);
                        out.skipped.push(SkippedConstraint { topology_key: constraint.topology_key.clone(), error: e.to_string() });
                        continue;
                    }
                };
            // compile() has already rejected max_skew < 1
            let record = SkewRecord::evaluate(&membership, constraint.max_skew as usize);
            for (value, quota) in record.quotas() {
                let members = &membership.domains[value].members;
                let picked = select_from_domain(members, quota);
                debug!(ns = %ns.namespace, key = %record.topology_key, domain = %value, quota, picked = picked.len(), "over-populated domain");
                for pod in picked {
                    candidates.insert(pod, EVICTION_REASON);
                }
            }
            out.records.push(record);
        }

        out.candidates = candidates.refs().cloned().collect();
        (out, candidates)
    }

    /// One full pass: snapshot, plan, dispatch.
    pub async fn run(
        &self,
        provider: &dyn ClusterStateProvider,
        evictable: &dyn Evictable,
        evictor: &dyn PodEvictor,
        cancel: &CancellationToken,
    ) -> Result<PassReport, PassError> {
        let started = Instant::now();
        let snap = self.snapshot(provider, cancel).await?;
        let plan = self.plan(&snap, evictable);
        let candidates = plan.candidates.len();
        let nodes = NodeIndex::new(&snap.nodes);
        let dispatched = dispatch(plan.candidates, &nodes, evictor, self.params.failure_policy, cancel).await;

        info!(
            nodes = nodes.len(),
            namespaces = snap.namespaces.len(),
            failed_namespaces = snap.failed.len(),
            candidates,
            evicted = dispatched.evicted.len(),
            refused = dispatched.refused.len(),
            errors = dispatched.errors.len(),
            aborted = dispatched.aborted,
            "topology spread pass finished"
        );
        histogram!("respread_pass_ms", started.elapsed().as_secs_f64() * 1000.0);

        Ok(PassReport { namespaces: plan.namespaces, failed: snap.failed, candidates, dispatch: dispatched })
    }
}
