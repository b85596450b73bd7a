//! Candidate selection and the identity-keyed candidate set.

use std::collections::BTreeMap;

use respread_core::{LitePod, PodRef};

pub const EVICTION_REASON: &str = "PodTopologySpread";

#[derive(Debug, Clone)]
pub struct Candidate {
    pub pod: LitePod,
    pub reason: &'static str,
}

/// Pods to evict, keyed by identity so a pod chosen under several constraints appears once.
/// Iterates in `(namespace, name)` order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    by_ref: BTreeMap<PodRef, Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self { Self::default() }

    /// Returns false when the pod was already a candidate.
    pub fn insert(&mut self, pod: &LitePod, reason: &'static str) -> bool {
        let key = pod.pod_ref();
        if self.by_ref.contains_key(&key) {
            return false;
        }
        self.by_ref.insert(key, Candidate { pod: pod.clone(), reason });
        true
    }

    pub fn extend(&mut self, other: CandidateSet) {
        for (key, c) in other.by_ref {
            self.by_ref.entry(key).or_insert(c);
        }
    }

    pub fn len(&self) -> usize { self.by_ref.len() }
    pub fn is_empty(&self) -> bool { self.by_ref.is_empty() }
    pub fn contains(&self, pod: &PodRef) -> bool { self.by_ref.contains_key(pod) }
    pub fn refs(&self) -> impl Iterator<Item = &PodRef> + '_ { self.by_ref.keys() }
    pub fn iter(&self) -> impl Iterator<Item = (&PodRef, &Candidate)> + '_ { self.by_ref.iter() }
}

impl IntoIterator for CandidateSet {
    type Item = (PodRef, Candidate);
    type IntoIter = std::collections::btree_map::IntoIter<PodRef, Candidate>;
    fn into_iter(self) -> Self::IntoIter { self.by_ref.into_iter() }
}

/// Take `quota` pods from a domain in `(namespace, name)` order, so the same
/// snapshot always yields the same choice. Fewer come back if the domain is short.
pub fn select_from_domain<'a>(members: &[&'a LitePod], quota: usize) -> Vec<&'a LitePod> {
    let mut ordered: Vec<&'a LitePod> = members.to_vec();
    ordered.sort_by(|a, b| a.namespace.cmp(&b.namespace).then_with(|| a.name.cmp(&b.name)));
    ordered.truncate(quota);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str) -> LitePod {
        LitePod { namespace: ns.into(), name: name.into(), ..Default::default() }
    }

    #[test]
    fn selection_is_ordered_and_bounded() {
        let (c, a, b) = (pod("ns", "c"), pod("ns", "a"), pod("ns", "b"));
        let members = vec![&c, &a, &b];
        let picked: Vec<&str> = select_from_domain(&members, 2).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(picked, vec!["a", "b"]);
        assert!(select_from_domain(&members, 0).is_empty());
        assert_eq!(select_from_domain(&members, 10).len(), 3);
    }

    #[test]
    fn selection_ignores_input_order() {
        let (x, y, z) = (pod("ns", "x"), pod("ns", "y"), pod("ns", "z"));
        let one = select_from_domain(&[&z, &x, &y], 1);
        let two = select_from_domain(&[&y, &z, &x], 1);
        assert_eq!(one[0].name, two[0].name);
    }

    #[test]
    fn set_dedups_by_identity() {
        let mut set = CandidateSet::new();
        let p = pod("ns", "a");
        let same = p.clone();
        assert!(set.insert(&p, EVICTION_REASON));
        assert!(!set.insert(&same, EVICTION_REASON));
        assert_eq!(set.len(), 1);

        let mut other = CandidateSet::new();
        other.insert(&pod("ns", "a"), EVICTION_REASON);
        other.insert(&pod("ans", "z"), EVICTION_REASON);
        set.extend(other);
        let refs: Vec<String> = set.refs().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["ans/z", "ns/a"]);
    }
}
