//! Spread policy: pick clusters in score order while keeping every topology's skew bounded.

use std::collections::{BTreeMap, BTreeSet};

use ocm_core::cluster::ManagedCluster;
use ocm_core::placement::{SpreadConstraint, TopologyKeyType, WhenUnsatisfiable};

use super::ScoredCluster;

struct Topology {
    max_skew: i64,
    hard: bool,
    /// Topology value per cluster that carries the key.
    values: BTreeMap<String, String>,
    domain: BTreeSet<String>,
    counts: BTreeMap<String, i64>,
}

impl Topology {
    fn new(c: &SpreadConstraint, clusters: &BTreeMap<&str, &ManagedCluster>) -> Self {
        let values: BTreeMap<String, String> = clusters
            .iter()
            .filter_map(|(name, cluster)| {
                let v = match c.topology_key_type {
                    TopologyKeyType::Label => cluster.metadata.labels.as_ref().and_then(|l| l.get(&c.topology_key)).cloned(),
                    TopologyKeyType::Claim => cluster.claims().remove(&c.topology_key),
                }?;
                Some((name.to_string(), v))
            })
            .collect();
        let domain = values.values().cloned().collect();
        Self {
            max_skew: i64::from(c.max_skew.unwrap_or(1).max(1)),
            hard: c.when_unsatisfiable == WhenUnsatisfiable::DoNotSchedule,
            values,
            domain,
            counts: BTreeMap::new(),
        }
    }

    /// Whether adding `cluster` keeps the skew within bounds. Clusters without the key
    /// never satisfy a hard constraint and are ignored by a soft one.
    fn allows(&self, cluster: &str) -> bool {
        let Some(v) = self.values.get(cluster) else { return !self.hard };
        let count = |d: &String| self.counts.get(d).copied().unwrap_or(0) + i64::from(d == v);
        let max = self.domain.iter().map(count).max().unwrap_or(0);
        let min = self.domain.iter().map(count).min().unwrap_or(0);
        max - min <= self.max_skew
    }

    fn add(&mut self, cluster: &str) {
        if let Some(v) = self.values.get(cluster) {
            *self.counts.entry(v.clone()).or_default() += 1;
        }
    }
}

/// Without constraints this is the first `limit` clusters. Otherwise each step takes the
/// best cluster satisfying every constraint, falling back to the best one satisfying the
/// `DoNotSchedule` constraints only; selection stops when neither exists.
pub(crate) fn select(constraints: &[SpreadConstraint], ranked: &[ScoredCluster], clusters: &BTreeMap<&str, &ManagedCluster>, limit: Option<usize>) -> Vec<String> {
    let limit = limit.unwrap_or(ranked.len()).min(ranked.len());
    if constraints.is_empty() {
        return ranked.iter().take(limit).map(|s| s.name.clone()).collect();
    }
    let mut topologies: Vec<Topology> = constraints.iter().map(|c| Topology::new(c, clusters)).collect();
    let mut remaining: Vec<&str> = ranked.iter().map(|s| s.name.as_str()).collect();
    let mut out = Vec::with_capacity(limit);
    while out.len() < limit {
        let pick = remaining
            .iter()
            .position(|c| topologies.iter().all(|t| t.allows(c)))
            .or_else(|| remaining.iter().position(|c| topologies.iter().filter(|t| t.hard).all(|t| t.allows(c))));
        let Some(i) = pick else { break };
        let name = remaining.remove(i);
        topologies.iter_mut().for_each(|t| t.add(name));
        out.push(name.to_string());
    }
    out
}
