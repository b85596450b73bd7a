//! Skew evaluation: domain populations against the least populated domain, and eviction quotas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::membership::DomainMembership;

/// Per-domain populations for one constraint against its floating baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkewRecord {
    pub topology_key: String,
    pub max_skew: usize,
    pub counts: BTreeMap<String, usize>,
    /// Smallest population over all domains of the key; 0 when there are none.
    pub minimum: usize,
}

impl SkewRecord {
    /// `max_skew` comes from a constraint that already passed validation (>= 1).
    pub fn evaluate(membership: &DomainMembership<'_>, max_skew: usize) -> Self {
        let counts: BTreeMap<String, usize> =
            membership.domains.iter().map(|(value, d)| (value.clone(), d.population())).collect();
        let minimum = counts.values().copied().min().unwrap_or(0);
        Self { topology_key: membership.topology_key.clone(), max_skew, counts, minimum }
    }

    /// Eviction quota for every domain strictly above `minimum + max_skew`, in domain order.
    pub fn quotas(&self) -> Vec<(&str, usize)> {
        self.counts
            .iter()
            .filter_map(|(value, &count)| {
                let skew = count - self.minimum;
                (skew > self.max_skew).then(|| (value.as_str(), skew - self.max_skew))
            })
            .collect()
    }

    pub fn is_balanced(&self) -> bool { self.quotas().is_empty() }

    /// Largest pairwise difference between domains.
    pub fn spread(&self) -> usize {
        self.counts.values().copied().max().map(|max| max - self.minimum).unwrap_or(0)
    }
}
