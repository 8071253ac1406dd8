//! Queue-key mappers: which reconciled objects a change to a related object affects.

use std::collections::BTreeSet;

use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use ocm_core::addon::PlacementRef;
use ocm_core::kueue::PLACEMENT_CONTROLLER_NAME;
use ocm_core::placement::ScoreCoordinateType;
use ocm_core::prelude::*;
use ocm_core::{labels, object_key};
use ocm_placement::candidates::set_selector;

use crate::HubListers;

fn placements_in(listers: &HubListers, namespaces: &BTreeSet<String>) -> Vec<ObjectRef<Placement>> {
    namespaces.iter().flat_map(|ns| listers.placements.list_namespaced(ns)).map(|p| ObjectRef::from_obj(p.as_ref())).collect()
}

fn namespaces_bound_to(listers: &HubListers, sets: &BTreeSet<String>) -> BTreeSet<String> {
    listers
        .scheduling
        .bindings
        .list()
        .into_iter()
        .filter(|b| sets.contains(&b.spec.cluster_set))
        .filter_map(|b| b.namespace())
        .collect()
}

/// Placements in namespaces bound to any set that contains `cluster`.
pub fn placements_for_cluster(listers: &HubListers, cluster: &ManagedCluster) -> Vec<ObjectRef<Placement>> {
    let labels = cluster.metadata.labels.clone().unwrap_or_default();
    let sets: BTreeSet<String> = listers
        .scheduling
        .cluster_sets
        .list()
        .into_iter()
        .filter(|s| set_selector(s).map(|sel| sel.matches(&labels)).unwrap_or(false))
        .map(|s| s.name_any())
        .collect();
    placements_in(listers, &namespaces_bound_to(listers, &sets))
}

pub fn placements_for_cluster_set(listers: &HubListers, set: &ManagedClusterSet) -> Vec<ObjectRef<Placement>> {
    placements_in(listers, &namespaces_bound_to(listers, &BTreeSet::from([set.name_any()])))
}

pub fn placements_for_binding(listers: &HubListers, binding: &ManagedClusterSetBinding) -> Vec<ObjectRef<Placement>> {
    placements_in(listers, &binding.namespace().into_iter().collect())
}

/// Placements whose prioritizers read `score`'s resource.
pub fn placements_for_score(listers: &HubListers, score: &AddOnPlacementScore) -> Vec<ObjectRef<Placement>> {
    let resource = score.name_any();
    listers
        .placements
        .list()
        .into_iter()
        .filter(|p| {
            p.spec.prioritizer_policy.configurations.iter().any(|c| {
                c.score_coordinate.type_ == ScoreCoordinateType::AddOn
                    && c.score_coordinate.add_on.as_ref().is_some_and(|a| a.resource_name == resource)
            })
        })
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}

/// The owning placement of a decision, from its placement label.
pub fn placement_for_decision(decision: &PlacementDecision) -> Option<ObjectRef<Placement>> {
    let name = decision.labels().get(labels::PLACEMENT)?;
    Some(ObjectRef::new(name).within(&decision.namespace()?))
}

/// Index key of an admission check served by this integration: `<kueue namespace>/<placement>`.
pub fn admission_check_placement_key(check: &AdmissionCheck, kueue_namespace: &str) -> Option<String> {
    if check.spec.controller_name != PLACEMENT_CONTROLLER_NAME {
        return None;
    }
    Some(object_key(Some(kueue_namespace), check.placement_name()?))
}

pub fn admission_checks_for_placement(listers: &HubListers, kueue_namespace: &str, namespace: &str, name: &str) -> Vec<ObjectRef<AdmissionCheck>> {
    let key = object_key(Some(namespace), name);
    listers
        .admission_checks
        .list()
        .into_iter()
        .filter(|c| admission_check_placement_key(c, kueue_namespace).as_deref() == Some(key.as_str()))
        .map(|c| ObjectRef::from_obj(c.as_ref()))
        .collect()
}

pub fn admission_checks_for_decision(listers: &HubListers, kueue_namespace: &str, decision: &PlacementDecision) -> Vec<ObjectRef<AdmissionCheck>> {
    match (decision.namespace(), decision.labels().get(labels::PLACEMENT)) {
        (Some(ns), Some(p)) => admission_checks_for_placement(listers, kueue_namespace, &ns, p),
        _ => Vec::new(),
    }
}

/// A ClusterProfile is named after its ManagedCluster.
pub fn cluster_for_profile(profile: &ClusterProfile) -> Option<ObjectRef<ManagedCluster>> {
    profile.metadata.name.as_deref().map(ObjectRef::new)
}

/// A ManagedClusterAddOn is named after its ClusterManagementAddOn.
pub fn addon_for_managed_addon(addon: &ManagedClusterAddOn) -> Option<ObjectRef<ClusterManagementAddOn>> {
    addon.metadata.name.as_deref().map(ObjectRef::new)
}

/// Add-ons whose install progressions track the decision's placement.
pub fn addons_for_decision(listers: &HubListers, decision: &PlacementDecision) -> Vec<ObjectRef<ClusterManagementAddOn>> {
    let (Some(namespace), Some(name)) = (decision.namespace(), decision.labels().get(labels::PLACEMENT).cloned()) else {
        return Vec::new();
    };
    let placement = PlacementRef { name, namespace };
    listers
        .cluster_management_addons
        .list()
        .into_iter()
        .filter(|a| {
            a.status.as_ref().is_some_and(|s| s.install_progressions.iter().any(|p| p.placement == placement))
                || a.spec.install_strategy.placements.iter().any(|p| p.placement == placement)
        })
        .map(|a| ObjectRef::from_obj(a.as_ref()))
        .collect()
}
