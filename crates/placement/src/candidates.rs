//! Candidate clusters of a placement: members of the cluster sets bound to its namespace.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ocm_core::cluster::{ManagedCluster, ManagedClusterSet, SelectorType};
use ocm_core::labels;
use ocm_core::placement::Placement;
use ocm_store::Selector;
use tracing::debug;

use crate::selector::SelectorError;
use crate::Listers;

#[derive(Debug, Clone, Default)]
pub struct Candidates {
    /// Sets bound to the placement namespace that exist.
    pub bound_sets: Vec<String>,
    /// Bound sets narrowed by `spec.clusterSets`.
    pub eligible_sets: Vec<String>,
    /// Members of the eligible sets, by name, without clusters being deleted.
    pub clusters: Vec<Arc<ManagedCluster>>,
}

/// Selector of the clusters belonging to `set`.
pub fn set_selector(set: &ManagedClusterSet) -> Result<Selector, SelectorError> {
    let name = set.metadata.name.clone().unwrap_or_default();
    match set.spec.cluster_selector.selector_type {
        SelectorType::ExclusiveClusterSetLabel => Ok(Selector::from_labels(&BTreeMap::from([(labels::CLUSTER_SET.to_string(), name)]))),
        SelectorType::LabelSelector => match &set.spec.cluster_selector.label_selector {
            Some(ls) => Selector::from_label_selector(ls).map_err(SelectorError::Label),
            None => Ok(Selector::everything()),
        },
    }
}

pub fn resolve(placement: &Placement, listers: &Listers) -> Result<Candidates, SelectorError> {
    let ns = placement.metadata.namespace.as_deref().unwrap_or_default();
    let mut bound: BTreeSet<String> = BTreeSet::new();
    for b in listers.bindings.list_namespaced(ns) {
        let set = &b.spec.cluster_set;
        match listers.cluster_sets.get(None, set) {
            Ok(s) if s.metadata.deletion_timestamp.is_none() => {
                bound.insert(set.clone());
            }
            _ => debug!(namespace = %ns, set = %set, "binding refers to a missing cluster set"),
        }
    }
    let wanted = &placement.spec.cluster_sets;
    let eligible: Vec<String> = bound.iter().filter(|s| wanted.is_empty() || wanted.contains(s)).cloned().collect();

    let mut members: BTreeMap<String, Arc<ManagedCluster>> = BTreeMap::new();
    for name in &eligible {
        let Ok(set) = listers.cluster_sets.get(None, name) else { continue };
        let sel = set_selector(&set)?;
        for c in listers.clusters.list_selected(&sel) {
            if c.metadata.deletion_timestamp.is_some() {
                continue;
            }
            members.insert(c.metadata.name.clone().unwrap_or_default(), c);
        }
    }
    Ok(Candidates { bound_sets: bound.into_iter().collect(), eligible_sets: eligible, clusters: members.into_values().collect() })
}
