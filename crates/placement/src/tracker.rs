//! Existing decisions of one placement, grouped by decision group.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ocm_core::labels;
use ocm_core::placement::PlacementDecision;
use ocm_store::{Lister, Selector};

/// Identity of a decision group: its index and (possibly empty) name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub index: i32,
    pub name: String,
}

impl GroupKey {
    pub fn new(index: i32, name: &str) -> Self { Self { index, name: name.to_string() } }
}

/// Cluster names per decision group, ordered by group index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterGroups(BTreeMap<GroupKey, BTreeSet<String>>);

impl ClusterGroups {
    pub fn insert(&mut self, key: GroupKey, cluster: &str) { self.0.entry(key).or_default().insert(cluster.to_string()); }

    pub fn get(&self, key: &GroupKey) -> Option<&BTreeSet<String>> { self.0.get(key) }

    pub fn keys(&self) -> impl Iterator<Item = &GroupKey> { self.0.keys() }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &BTreeSet<String>)> { self.0.iter() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Union of all groups; a cluster present in several groups is counted once.
    pub fn clusters(&self) -> BTreeSet<String> { self.0.values().flatten().cloned().collect() }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("PlacementDecision {decision}: invalid decision group index {value:?}")]
    InvalidGroupIndex { decision: String, value: String },
}

pub struct DecisionClustersTracker {
    decisions: Arc<dyn Lister<PlacementDecision>>,
    namespace: String,
    placement: String,
    existing: ClusterGroups,
}

impl DecisionClustersTracker {
    pub fn new(decisions: Arc<dyn Lister<PlacementDecision>>, namespace: &str, placement: &str) -> Self {
        Self { decisions, namespace: namespace.to_string(), placement: placement.to_string(), existing: ClusterGroups::default() }
    }

    /// Reload groups from the decision lister. No decisions is an empty state, not an error.
    pub fn refresh(&mut self) -> Result<(), TrackerError> {
        let owned = Selector::from_labels(&BTreeMap::from([(labels::PLACEMENT.to_string(), self.placement.clone())]));
        let mut groups = ClusterGroups::default();
        for d in self.decisions.list_namespaced(&self.namespace).into_iter().filter(|d| d.metadata.labels.as_ref().map(|l| owned.matches(l)).unwrap_or(false)) {
            let key = group_key(&d)?;
            for c in d.status.iter().flat_map(|s| s.decisions.iter()) {
                groups.insert(key.clone(), &c.cluster_name);
            }
        }
        self.existing = groups;
        Ok(())
    }

    pub fn existing(&self) -> &ClusterGroups { &self.existing }

    /// Groups listed in `keys`.
    pub fn existing_cluster_groups(&self, keys: &[GroupKey]) -> ClusterGroups {
        ClusterGroups(self.existing.0.iter().filter(|(k, _)| keys.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Every group except those listed in `excluded`.
    pub fn existing_cluster_groups_besides(&self, excluded: &[GroupKey]) -> ClusterGroups {
        ClusterGroups(self.existing.0.iter().filter(|(k, _)| !excluded.contains(k)).map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Refresh, then diff `desired` against what is recorded: `(added, deleted)`.
    pub fn diff(&mut self, desired: &BTreeSet<String>) -> Result<(BTreeSet<String>, BTreeSet<String>), TrackerError> {
        self.refresh()?;
        let existing = self.existing.clusters();
        let added = desired.difference(&existing).cloned().collect();
        let deleted = existing.difference(desired).cloned().collect();
        Ok((added, deleted))
    }
}

fn group_key(d: &PlacementDecision) -> Result<GroupKey, TrackerError> {
    let l = d.metadata.labels.as_ref();
    let name = l.and_then(|l| l.get(labels::DECISION_GROUP_NAME)).cloned().unwrap_or_default();
    let index = match l.and_then(|l| l.get(labels::DECISION_GROUP_INDEX)) {
        None => 0,
        Some(v) => v.parse::<i32>().map_err(|_| TrackerError::InvalidGroupIndex {
            decision: d.metadata.name.clone().unwrap_or_default(),
            value: v.clone(),
        })?,
    };
    Ok(GroupKey { index, name })
}
