//! respread kubehub: cluster state reads over the Kubernetes API, projected
//! into the lite views a rebalancing pass works on.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as meta;
use kube::{api::{Api, ListParams}, Client};
use metrics::histogram;
use respread_core::{
    ClusterStateProvider, LabelSelector, LabelSelectorRequirement, Labels, LiteNode, LitePod, TopologySpreadConstraint,
    WhenUnsatisfiable,
};
use serde::de::DeserializeOwned;
use tracing::debug;

const PAGE_SIZE: u32 = 500;

// Completed pods neither occupy a domain nor can be evicted.
const LIVE_PODS: &str = "status.phase!=Succeeded,status.phase!=Failed";

/// [`ClusterStateProvider`] backed by a kube client.
#[derive(Clone)]
pub struct KubeClusterState {
    client: Client,
}

impl KubeClusterState {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Client from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client { &self.client }
}

/// List every object, following continue tokens.
async fn list_all<K>(api: &Api<K>, mut lp: ListParams, kind: &'static str) -> Result<Vec<K>>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    let started = Instant::now();
    let mut out = Vec::new();
    lp = lp.limit(PAGE_SIZE);
    loop {
        let page = api.list(&lp).await.with_context(|| format!("listing {kind}"))?;
        out.extend(page.items);
        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => lp = lp.continue_token(&token),
            _ => break,
        }
    }
    histogram!("respread_list_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => kind);
    debug!(kind, count = out.len(), "listed");
    Ok(out)
}

#[async_trait::async_trait]
impl ClusterStateProvider for KubeClusterState {
    async fn list_nodes(&self) -> Result<Vec<LiteNode>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = list_all(&api, ListParams::default(), "nodes").await?;
        Ok(nodes.iter().filter_map(lite_node).collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = list_all(&api, ListParams::default(), "namespaces").await?;
        Ok(namespaces.into_iter().filter_map(|ns| ns.metadata.name).collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<LitePod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = list_all(&api, ListParams::default().fields(LIVE_PODS), "pods").await?;
        pods.iter()
            .map(|p| lite_pod(p).ok_or_else(|| anyhow!("pod without name in namespace {namespace}")))
            .collect()
    }
}

fn labels_of(map: Option<&std::collections::BTreeMap<String, String>>) -> Labels {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default()
}

/// `None` for nodes without a name.
pub fn lite_node(node: &Node) -> Option<LiteNode> {
    let name = node.metadata.name.clone()?;
    Some(LiteNode { name, labels: labels_of(node.metadata.labels.as_ref()) })
}

/// `None` for pods without a name or namespace.
pub fn lite_pod(pod: &Pod) -> Option<LitePod> {
    let md = &pod.metadata;
    let spec = pod.spec.as_ref();
    let volumes = spec.and_then(|s| s.volumes.as_deref()).unwrap_or(&[]);
    Some(LitePod {
        namespace: md.namespace.clone()?,
        name: md.name.clone()?,
        node_name: spec.and_then(|s| s.node_name.clone()),
        labels: labels_of(md.labels.as_ref()),
        annotations: md
            .annotations
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        owner_kinds: md.owner_references.as_ref().map(|o| o.iter().map(|r| r.kind.clone()).collect()).unwrap_or_default(),
        priority: spec.and_then(|s| s.priority),
        local_storage: volumes.iter().any(|v| v.empty_dir.is_some() || v.host_path.is_some()),
        terminating: md.deletion_timestamp.is_some(),
        spread_constraints: spec
            .and_then(|s| s.topology_spread_constraints.as_ref())
            .map(|cs| cs.iter().map(spread_constraint).collect())
            .unwrap_or_default(),
    })
}

fn spread_constraint(c: &k8s_openapi::api::core::v1::TopologySpreadConstraint) -> TopologySpreadConstraint {
    TopologySpreadConstraint {
        topology_key: c.topology_key.clone(),
        max_skew: c.max_skew,
        label_selector: c.label_selector.as_ref().map(label_selector),
        when_unsatisfiable: WhenUnsatisfiable::from_api(&c.when_unsatisfiable),
    }
}

fn label_selector(s: &meta::LabelSelector) -> LabelSelector {
    LabelSelector {
        match_labels: s.match_labels.clone().unwrap_or_default(),
        match_expressions: s
            .match_expressions
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|e| LabelSelectorRequirement {
                key: e.key.clone(),
                operator: e.operator.clone(),
                values: e.values.clone().unwrap_or_default(),
            })
            .collect(),
    }
}
