//! respread policy document: the YAML/JSON file operators write, its defaults,
//! and the checks it must pass before anything reaches a strategy.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use respread_core::{Selector, TopologySpreadConstraint};
use respread_topology::{FailurePolicy, NamespaceScope, PopulationPolicy, TopologySpreadParams};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TOPOLOGY_SPREAD_STRATEGY: &str = "RemovePodsViolatingTopologySpreadConstraint";

/// Priority of `system-cluster-critical`; pods at or above it are never evicted by default.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub strategies: BTreeMap<String, Strategy>,
    /// Equality-based node selector restricting the nodes a pass operates over.
    #[serde(default)]
    pub node_selector: Option<String>,
    #[serde(default)]
    pub evict_local_storage_pods: Option<bool>,
    #[serde(default)]
    pub max_no_of_pods_to_evict_per_node: Option<usize>,
    #[serde(default)]
    pub max_no_of_pods_to_evict_total: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub params: Option<StrategyParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParams {
    #[serde(default)]
    pub namespaces: Option<Namespaces>,
    #[serde(default)]
    pub threshold_priority: Option<i32>,
    #[serde(default)]
    pub include_soft_constraints: bool,
    #[serde(default)]
    pub namespaced_topology_spread_constraints: Vec<NamespacedConstraints>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespaces {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedConstraints {
    pub namespace: String,
    #[serde(default, alias = "constraints")]
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("reading policy {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("decoding policy: {0}")]
    Decode(#[from] serde_yaml::Error),
    #[error("invalid policy: {}", render_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| format!("{}: {}", i.path, i.error)).collect::<Vec<_>>().join("; ")
}

/// Knobs the safety predicate and the evictor need, with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionSettings {
    pub evict_local_storage_pods: bool,
    pub threshold_priority: i32,
    pub max_per_node: Option<usize>,
    pub max_total: Option<usize>,
}

impl Policy {
    /// Decode and validate. Accepts YAML or JSON.
    pub fn from_yaml(text: &str) -> Result<Self, PolicyError> {
        let policy: Policy = serde_yaml::from_str(text)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io { path: path.display().to_string(), source })?;
        debug!(path = %path.display(), bytes = text.len(), "policy read");
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        let issues = self.issues();
        if issues.is_empty() { Ok(()) } else { Err(PolicyError::Invalid(issues)) }
    }

    /// Every problem found, not just the first.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut push = |path: String, error: String| issues.push(ValidationIssue { path, error });

        if let Some(sel) = &self.node_selector {
            if let Err(e) = Selector::parse(sel) {
                push("nodeSelector".into(), e.to_string());
            }
        }
        for (name, strategy) in &self.strategies {
            let Some(params) = &strategy.params else { continue };
            let base = format!("strategies.{name}.params");
            if let Some(ns) = &params.namespaces {
                if !ns.include.is_empty() && !ns.exclude.is_empty() {
                    push(format!("{base}.namespaces"), "only one of include or exclude may be set".into());
                }
            }
            for (i, nc) in params.namespaced_topology_spread_constraints.iter().enumerate() {
                let at = format!("{base}.namespacedTopologySpreadConstraints[{i}]");
                if nc.namespace.is_empty() {
                    push(format!("{at}.namespace"), "must not be empty".into());
                }
                for (j, c) in nc.topology_spread_constraints.iter().enumerate() {
                    if let Err(e) = c.compile() {
                        push(format!("{at}.topologySpreadConstraints[{j}]"), e.to_string());
                    }
                }
            }
        }
        issues
    }

    fn topology_spread(&self) -> Option<&Strategy> {
        self.strategies.get(TOPOLOGY_SPREAD_STRATEGY).filter(|s| s.enabled)
    }

    pub fn topology_spread_enabled(&self) -> bool { self.topology_spread().is_some() }

    /// Strategy inputs, or `None` when the strategy is absent or disabled.
    /// The policy is validated first, so an invalid document never yields params.
    pub fn topology_spread_params(
        &self,
        population: PopulationPolicy,
        failure_policy: FailurePolicy,
    ) -> Result<Option<TopologySpreadParams>, PolicyError> {
        self.validate()?;
        let Some(strategy) = self.topology_spread() else { return Ok(None) };
        let params = strategy.params.clone().unwrap_or_default();
        let namespaces = match params.namespaces {
            Some(ns) if !ns.include.is_empty() => NamespaceScope::Include(ns.include),
            Some(ns) if !ns.exclude.is_empty() => NamespaceScope::Exclude(ns.exclude),
            _ => NamespaceScope::All,
        };
        let mut constraints: BTreeMap<String, Vec<TopologySpreadConstraint>> = BTreeMap::new();
        for nc in params.namespaced_topology_spread_constraints {
            // Policy-declared constraints are always hard.
            let hard = nc.topology_spread_constraints.into_iter().map(|mut c| {
                c.when_unsatisfiable = respread_core::WhenUnsatisfiable::DoNotSchedule;
                c
            });
            constraints.entry(nc.namespace).or_default().extend(hard);
        }
        let node_selector = self
            .node_selector
            .as_deref()
            .map(Selector::parse)
            .transpose()
            .map_err(|e| PolicyError::Invalid(vec![ValidationIssue { path: "nodeSelector".into(), error: e.to_string() }]))?;
        Ok(Some(TopologySpreadParams {
            namespaces,
            node_selector,
            constraints,
            include_soft_constraints: params.include_soft_constraints,
            population,
            failure_policy,
        }))
    }

    pub fn eviction_settings(&self) -> EvictionSettings {
        let threshold = self
            .topology_spread()
            .and_then(|s| s.params.as_ref())
            .and_then(|p| p.threshold_priority)
            .unwrap_or(SYSTEM_CRITICAL_PRIORITY);
        EvictionSettings {
            evict_local_storage_pods: self.evict_local_storage_pods.unwrap_or(false),
            threshold_priority: threshold,
            max_per_node: self.max_no_of_pods_to_evict_per_node,
            max_total: self.max_no_of_pods_to_evict_total,
        }
    }
}
