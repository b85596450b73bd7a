//! respread core types: read-only cluster views, spread constraints and the
//! collaborator seams a rebalancing pass talks through.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod selector;
mod cluster;

pub use cluster::{ClusterStateProvider, EvictError, Evictable, PodEvictor};
pub use selector::{LabelSelector, LabelSelectorRequirement, Selector, SelectorError};

/// Kubernetes labels as key/value pairs.
pub type Labels = SmallVec<[(String, String); 8]>;

/// Look up a label value by key.
pub fn label_value<'a>(labels: &'a [(String, String)], key: &str) -> Option<&'a str> {
    labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Stable pod identity. Ordered by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiteNode {
    pub name: String,
    pub labels: Labels,
}

impl LiteNode {
    pub fn label(&self, key: &str) -> Option<&str> { label_value(&self.labels, key) }
}

/// Projection of a pod carrying only what rebalancing and the safety predicate read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LitePod {
    pub namespace: String,
    pub name: String,
    /// `spec.nodeName`; `None` while unscheduled.
    pub node_name: Option<String>,
    pub labels: Labels,
    pub annotations: SmallVec<[(String, String); 4]>,
    /// Kinds from `metadata.ownerReferences`.
    pub owner_kinds: SmallVec<[String; 2]>,
    pub priority: Option<i32>,
    /// Pod mounts an `emptyDir` or `hostPath` volume.
    pub local_storage: bool,
    /// `metadata.deletionTimestamp` is set.
    pub terminating: bool,
    pub spread_constraints: Vec<TopologySpreadConstraint>,
}

impl LitePod {
    pub fn pod_ref(&self) -> PodRef { PodRef::new(self.namespace.clone(), self.name.clone()) }
    pub fn label(&self, key: &str) -> Option<&str> { label_value(&self.labels, key) }
    pub fn annotation(&self, key: &str) -> Option<&str> { label_value(&self.annotations, key) }
    /// Node name, treating the empty string as unscheduled.
    pub fn assigned_node(&self) -> Option<&str> { self.node_name.as_deref().filter(|n| !n.is_empty()) }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WhenUnsatisfiable {
    #[default]
    DoNotSchedule,
    ScheduleAnyway,
}

impl WhenUnsatisfiable {
    /// Unknown values are treated as hard constraints.
    pub fn from_api(s: &str) -> Self {
        if s == "ScheduleAnyway" { Self::ScheduleAnyway } else { Self::DoNotSchedule }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("maxSkew must be >= 1 (got {0})")]
    MaxSkew(i32),
    #[error("topologyKey must not be empty")]
    EmptyTopologyKey,
    #[error("labelSelector: {0}")]
    Selector(#[from] SelectorError),
}

/// Spread constraint as declared on a pod spec or in a policy document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopologySpreadConstraint {
    pub topology_key: String,
    pub max_skew: i32,
    /// A missing selector matches no pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    #[serde(default)]
    pub when_unsatisfiable: WhenUnsatisfiable,
}

impl TopologySpreadConstraint {
    pub fn new(topology_key: impl Into<String>, max_skew: i32, label_selector: Option<LabelSelector>) -> Self {
        Self { topology_key: topology_key.into(), max_skew, label_selector, when_unsatisfiable: WhenUnsatisfiable::DoNotSchedule }
    }

    pub fn is_hard(&self) -> bool { self.when_unsatisfiable == WhenUnsatisfiable::DoNotSchedule }

    /// Check key and skew, then compile the selector.
    pub fn compile(&self) -> Result<Selector, ConstraintError> {
        if self.topology_key.is_empty() { return Err(ConstraintError::EmptyTopologyKey); }
        if self.max_skew < 1 { return Err(ConstraintError::MaxSkew(self.max_skew)); }
        Ok(Selector::from_label_selector(self.label_selector.as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_ref_orders_by_namespace_then_name() {
        let mut refs = vec![PodRef::new("b", "a"), PodRef::new("a", "z"), PodRef::new("a", "b")];
        refs.sort();
        let rendered: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        assert_eq!(rendered, vec!["a/b", "a/z", "b/a"]);
    }

    #[test]
    fn empty_node_name_is_unscheduled() {
        let mut p = LitePod { namespace: "ns".into(), name: "p".into(), ..Default::default() };
        assert_eq!(p.assigned_node(), None);
        p.node_name = Some(String::new());
        assert_eq!(p.assigned_node(), None);
        p.node_name = Some("n1".into());
        assert_eq!(p.assigned_node(), Some("n1"));
    }

    #[test]
    fn compile_rejects_zero_skew_and_empty_key() {
        let sel = LabelSelector::default();
        let c = TopologySpreadConstraint::new("zone", 0, Some(sel.clone()));
        assert_eq!(c.compile().unwrap_err(), ConstraintError::MaxSkew(0));
        let c = TopologySpreadConstraint::new("", 1, Some(sel));
        assert_eq!(c.compile().unwrap_err(), ConstraintError::EmptyTopologyKey);
    }

    #[test]
    fn constraint_deserializes_camel_case() {
        let c: TopologySpreadConstraint = serde_json::from_value(serde_json::json!({
            "topologyKey": "zone",
            "maxSkew": 2,
            "labelSelector": { "matchLabels": { "app": "web" } },
            "whenUnsatisfiable": "ScheduleAnyway"
        }))
        .expect("decode");
        assert_eq!(c.topology_key, "zone");
        assert_eq!(c.max_skew, 2);
        assert!(!c.is_hard());
    }
}
