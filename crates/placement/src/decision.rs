//! Decision groups and the PlacementDecision objects that record them.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use ocm_core::cluster::ManagedCluster;
use ocm_core::labels;
use ocm_core::placement::{
    ClusterDecision, ClusterSelector as ClusterSelectorSpec, DecisionGroupStatus, Placement, PlacementDecision, PlacementDecisionSpec,
    PlacementDecisionStatus, MAX_CLUSTERS_PER_DECISION,
};

use crate::scheduler::ScheduleError;
use crate::selector::ClusterSelector;
use crate::tracker::GroupKey;

/// One decision group and its clusters, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    pub key: GroupKey,
    pub clusters: Vec<String>,
}

/// Clusters per group from `clustersPerDecisionGroup`: an integer, or `N%` of `total`
/// rounded up. Unset means all of them; the result is never below 1.
pub fn group_size(value: Option<&IntOrString>, total: usize) -> Result<usize, ScheduleError> {
    let size = match value {
        None => total,
        Some(IntOrString::Int(n)) if *n > 0 => *n as usize,
        Some(IntOrString::String(s)) => {
            let pct = s
                .strip_suffix('%')
                .and_then(|p| p.trim().parse::<u64>().ok())
                .filter(|p| (1..=100).contains(p))
                .ok_or_else(|| ScheduleError::Misconfigured(format!("invalid clustersPerDecisionGroup {:?}", s)))?;
            ((total as u64 * pct).div_ceil(100)) as usize
        }
        Some(other) => return Err(ScheduleError::Misconfigured(format!("invalid clustersPerDecisionGroup {:?}", other))),
    };
    Ok(size.max(1))
}

/// Named decision groups take their clusters first, in declaration order; the rest form
/// unnamed groups. Every group is split by [`group_size`] and indexed consecutively.
/// An empty selection still yields one empty group.
pub fn plan_groups(placement: &Placement, selected: &[String], clusters: &BTreeMap<&str, &ManagedCluster>) -> Result<Vec<PlannedGroup>, ScheduleError> {
    let strategy = &placement.spec.decision_strategy.group_strategy;
    let size = group_size(strategy.clusters_per_decision_group.as_ref(), selected.len())?;
    let mut left: BTreeSet<String> = selected.iter().cloned().collect();
    let mut out: Vec<PlannedGroup> = Vec::new();
    let push = |name: &str, members: Vec<String>, out: &mut Vec<PlannedGroup>| {
        for chunk in members.chunks(size) {
            let index = out.len() as i32;
            out.push(PlannedGroup { key: GroupKey::new(index, name), clusters: chunk.to_vec() });
        }
    };

    for g in &strategy.decision_groups {
        let spec: ClusterSelectorSpec = (&g.group_cluster_selector).into();
        let sel = ClusterSelector::label_claim(&spec).map_err(|e| ScheduleError::Misconfigured(format!("decision group {}: {}", g.group_name, e)))?;
        let members: Vec<String> = left
            .iter()
            .filter(|c| {
                clusters.get(c.as_str()).is_some_and(|mc| sel.matches(&mc.metadata.labels.clone().unwrap_or_default(), &mc.claims()))
            })
            .cloned()
            .collect();
        for m in &members {
            left.remove(m);
        }
        push(&g.group_name, members, &mut out);
    }
    push("", left.into_iter().collect(), &mut out);

    if out.is_empty() {
        out.push(PlannedGroup { key: GroupKey::default(), clusters: Vec::new() });
    }
    Ok(out)
}

pub fn decision_name(placement: &str, n: usize) -> String { format!("{}-decision-{}", placement, n) }

/// PlacementDecisions for `groups`, at most [`MAX_CLUSTERS_PER_DECISION`] clusters each,
/// numbered from 1 across all groups. Returns the decisions and the group status summary.
pub fn build_decisions(placement: &Placement, groups: &[PlannedGroup]) -> (Vec<PlacementDecision>, Vec<DecisionGroupStatus>) {
    let name = placement.metadata.name.clone().unwrap_or_default();
    let owner = placement.controller_owner_ref(&());
    let mut decisions = Vec::new();
    let mut status = Vec::with_capacity(groups.len());
    for g in groups {
        let mut names = Vec::new();
        let chunks: Vec<&[String]> = if g.clusters.is_empty() { vec![&g.clusters[..]] } else { g.clusters.chunks(MAX_CLUSTERS_PER_DECISION).collect() };
        for chunk in chunks {
            let dname = decision_name(&name, decisions.len() + 1);
            names.push(dname.clone());
            decisions.push(PlacementDecision {
                metadata: ObjectMeta {
                    name: Some(dname),
                    namespace: placement.metadata.namespace.clone(),
                    labels: Some(BTreeMap::from([
                        (labels::PLACEMENT.to_string(), name.clone()),
                        (labels::DECISION_GROUP_NAME.to_string(), g.key.name.clone()),
                        (labels::DECISION_GROUP_INDEX.to_string(), g.key.index.to_string()),
                    ])),
                    owner_references: owner.clone().map(|o| vec![o]),
                    ..Default::default()
                },
                spec: PlacementDecisionSpec {},
                status: Some(PlacementDecisionStatus {
                    decisions: chunk.iter().map(|c| ClusterDecision { cluster_name: c.clone(), reason: String::new() }).collect(),
                }),
            });
        }
        status.push(DecisionGroupStatus {
            decision_group_index: g.key.index,
            decision_group_name: g.key.name.clone(),
            decisions: names,
            clusters_count: g.clusters.len() as i32,
        });
    }
    (decisions, status)
}
