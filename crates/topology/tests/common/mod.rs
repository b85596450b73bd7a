#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::anyhow;
use respread_core::{
    ClusterStateProvider, EvictError, LabelSelector, LiteNode, LitePod, PodEvictor, TopologySpreadConstraint,
};
use tokio_util::sync::CancellationToken;

pub fn node(name: &str, labels: &[(&str, &str)]) -> LiteNode {
    LiteNode { name: name.into(), labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect() }
}

pub fn zone_node(name: &str, zone: &str) -> LiteNode { node(name, &[("zone", zone)]) }

pub fn pod(ns: &str, name: &str, node: Option<&str>, labels: &[(&str, &str)], constraints: Vec<TopologySpreadConstraint>) -> LitePod {
    LitePod {
        namespace: ns.into(),
        name: name.into(),
        node_name: node.map(String::from),
        labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        spread_constraints: constraints,
        ..Default::default()
    }
}

pub fn spread(key: &str, max_skew: i32, app: &str) -> TopologySpreadConstraint {
    TopologySpreadConstraint::new(key, max_skew, Some(LabelSelector::match_labels([("app", app)])))
}

pub fn evict_all(_: &LitePod) -> bool { true }

/// In-memory cluster; listing failures are injected per namespace.
#[derive(Default)]
pub struct FakeCluster {
    pub nodes: Vec<LiteNode>,
    pub pods: BTreeMap<String, Vec<LitePod>>,
    pub fail_nodes: bool,
    pub fail_namespaces: bool,
    pub fail_pods_in: Vec<String>,
    /// Cancelled once nodes have been listed.
    pub cancel_after_nodes: Option<CancellationToken>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<LiteNode>, pods: Vec<LitePod>) -> Self {
        let mut by_ns: BTreeMap<String, Vec<LitePod>> = BTreeMap::new();
        for p in pods {
            by_ns.entry(p.namespace.clone()).or_default().push(p);
        }
        Self { nodes, pods: by_ns, ..Default::default() }
    }

    /// Drop evicted pods, as if the scheduler had not re-placed them yet.
    pub fn remove(&mut self, refs: &[respread_core::PodRef]) {
        for pods in self.pods.values_mut() {
            pods.retain(|p| !refs.contains(&p.pod_ref()));
        }
    }

    pub fn calls(&self) -> Vec<String> { self.calls.lock().expect("lock").clone() }
}

#[async_trait::async_trait]
impl ClusterStateProvider for FakeCluster {
    async fn list_nodes(&self) -> anyhow::Result<Vec<LiteNode>> {
        self.calls.lock().expect("lock").push("nodes".into());
        if self.fail_nodes { return Err(anyhow!("nodes unavailable")); }
        if let Some(token) = &self.cancel_after_nodes { token.cancel(); }
        Ok(self.nodes.clone())
    }

    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>> {
        self.calls.lock().expect("lock").push("namespaces".into());
        if self.fail_namespaces { return Err(anyhow!("namespaces unavailable")); }
        Ok(self.pods.keys().cloned().collect())
    }

    async fn list_pods(&self, namespace: &str) -> anyhow::Result<Vec<LitePod>> {
        self.calls.lock().expect("lock").push(format!("pods:{namespace}"));
        if self.fail_pods_in.iter().any(|n| n == namespace) { return Err(anyhow!("pods unavailable in {namespace}")); }
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }
}

/// Evictor recording every call; optionally refuses or fails specific pods.
#[derive(Default)]
pub struct RecordingEvictor {
    pub refuse: Vec<String>,
    pub fail: Vec<String>,
    /// Cancelled by the first eviction call, after it succeeds.
    pub cancel_on_first: Option<CancellationToken>,
    pub calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEvictor {
    pub fn calls(&self) -> Vec<(String, String, String)> { self.calls.lock().expect("lock").clone() }
    pub fn evicted_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(pod, _, _)| pod).filter(|p| !self.refuse.contains(p) && !self.fail.contains(p)).collect()
    }
}

#[async_trait::async_trait]
impl PodEvictor for RecordingEvictor {
    async fn evict_pod(&self, pod: &LitePod, node: &LiteNode, reason: &str) -> Result<bool, EvictError> {
        self.calls.lock().expect("lock").push((pod.pod_ref().to_string(), node.name.clone(), reason.to_string()));
        if let Some(token) = &self.cancel_on_first { token.cancel(); }
        if self.fail.iter().any(|n| *n == pod.pod_ref().to_string()) {
            return Err(EvictError::Transport { pod: pod.pod_ref(), message: "connection reset".into() });
        }
        Ok(!self.refuse.iter().any(|n| *n == pod.pod_ref().to_string()))
    }
}
