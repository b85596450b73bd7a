//! Topology-spread rebalancing: find topology domains whose matching-pod count
//! exceeds the least populated domain by more than `maxSkew`, and evict just
//! enough pods from them for the scheduler to re-place.
//!
//! One pass runs leaf-first over an immutable [`ClusterSnapshot`]:
//! [`extract`] → [`membership`] → [`skew`] → [`select`] → [`dispatch`].

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use respread_core::{Selector, TopologySpreadConstraint};
use serde::{Deserialize, Serialize};

pub mod dispatch;
pub mod extract;
pub mod membership;
pub mod pass;
pub mod select;
pub mod skew;
mod error;

pub use dispatch::{DispatchReport, FailurePolicy};
pub use error::PassError;
pub use pass::{ClusterSnapshot, NamespaceFailure, NamespacePlan, NamespacePods, PassReport, Plan, SkippedConstraint, TopologySpread};
pub use select::{Candidate, CandidateSet, EVICTION_REASON};
pub use skew::SkewRecord;

/// Which namespaces a pass looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceScope {
    #[default]
    All,
    /// Only these; the namespace list is never fetched.
    Include(Vec<String>),
    /// Everything listed except these.
    Exclude(Vec<String>),
}

impl NamespaceScope {
    pub fn admits(&self, namespace: &str) -> bool {
        match self {
            NamespaceScope::All => true,
            NamespaceScope::Include(ns) => ns.iter().any(|n| n == namespace),
            NamespaceScope::Exclude(ns) => !ns.iter().any(|n| n == namespace),
        }
    }
}

/// Whether pods rejected by the safety predicate still count toward a domain's population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopulationPolicy {
    /// Non-evictable pods are invisible to skew computation.
    #[default]
    EvictableOnly,
    /// Non-evictable matching pods are counted but never selected.
    AllMatching,
}

/// Inputs of one strategy instance, threaded explicitly through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct TopologySpreadParams {
    pub namespaces: NamespaceScope,
    /// Restricts the node set; pods on other nodes are treated as unscheduled.
    pub node_selector: Option<Selector>,
    /// Policy-declared constraints by namespace, evaluated alongside pod-declared ones.
    pub constraints: BTreeMap<String, Vec<TopologySpreadConstraint>>,
    /// Also balance `ScheduleAnyway` constraints declared on pods.
    pub include_soft_constraints: bool,
    pub population: PopulationPolicy,
    pub failure_policy: FailurePolicy,
}
