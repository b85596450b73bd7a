//! Domain membership: which pods count toward which topology domain for one constraint.

use std::collections::BTreeMap;

use respread_core::{ConstraintError, Evictable, LiteNode, LitePod, TopologySpreadConstraint};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::PopulationPolicy;

/// Name lookup over the snapshot's nodes, built once per pass.
pub struct NodeIndex<'a> {
    by_name: FxHashMap<&'a str, &'a LiteNode>,
}

impl<'a> NodeIndex<'a> {
    pub fn new(nodes: &'a [LiteNode]) -> Self {
        Self { by_name: nodes.iter().map(|n| (n.name.as_str(), n)).collect() }
    }

    pub fn get(&self, name: &str) -> Option<&'a LiteNode> { self.by_name.get(name).copied() }

    pub fn len(&self) -> usize { self.by_name.len() }
    pub fn is_empty(&self) -> bool { self.by_name.is_empty() }

    fn nodes(&self) -> impl Iterator<Item = &'a LiteNode> + '_ { self.by_name.values().copied() }
}

/// Pods counted in one topology domain.
#[derive(Debug, Default)]
pub struct Domain<'a> {
    /// Matching, evictable pods; the only ones that can be selected.
    pub members: Vec<&'a LitePod>,
    /// Matching pods the safety predicate rejected, counted under [`PopulationPolicy::AllMatching`].
    pub pinned: usize,
}

impl Domain<'_> {
    pub fn population(&self) -> usize { self.members.len() + self.pinned }
}

/// Domain value → member pods, for one `(namespace, constraint)` pair.
#[derive(Debug)]
pub struct DomainMembership<'a> {
    pub topology_key: String,
    pub domains: BTreeMap<String, Domain<'a>>,
}

impl<'a> DomainMembership<'a> {
    /// Bucket `pods` by their node's value for the constraint's topology key.
    ///
    /// Every value present on any indexed node gets a domain, so empty domains
    /// take part in the minimum. A pod counts only if it lives in `namespace`,
    /// its node is known and carries the key, and it matches the selector.
    pub fn build(
        nodes: &NodeIndex<'_>,
        namespace: &str,
        pods: &'a [LitePod],
        constraint: &TopologySpreadConstraint,
        evictable: &dyn Evictable,
        population: PopulationPolicy,
    ) -> Result<Self, ConstraintError> {
        let selector = constraint.compile()?;
        let key = constraint.topology_key.as_str();

        let mut domains: BTreeMap<String, Domain<'a>> = nodes
            .nodes()
            .filter_map(|n| n.label(key))
            .map(|v| (v.to_string(), Domain::default()))
            .collect();

        for pod in pods.iter().filter(|p| p.namespace == namespace) {
            let Some(node_name) = pod.assigned_node() else {
                debug!(pod = %pod.name, "unscheduled; not counted");
                continue;
            };
            let Some(node) = nodes.get(node_name) else {
                debug!(pod = %pod.name, node = %node_name, "node not in snapshot; not counted");
                continue;
            };
            let Some(value) = node.label(key) else { continue };
            if !selector.matches(&pod.labels) {
                continue;
            }
            let Some(domain) = domains.get_mut(value) else { continue };
            if evictable.is_evictable(pod) {
                domain.members.push(pod);
            } else if population == PopulationPolicy::AllMatching {
                domain.pinned += 1;
            }
        }

        Ok(Self { topology_key: key.to_string(), domains })
    }
}
