//! cluster.open-cluster-management.io: ManagedCluster, cluster sets, add-on placement scores.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, Time};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "cluster.open-cluster-management.io";

/// Condition type reported by the registration agent once the cluster is reachable.
pub const CONDITION_AVAILABLE: &str = "ManagedClusterConditionAvailable";
pub const CONDITION_JOINED: &str = "ManagedClusterJoined";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "cluster.open-cluster-management.io", version = "v1", kind = "ManagedCluster")]
#[kube(status = "ManagedClusterStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ManagedClusterSpec {
    #[serde(default)]
    pub hub_accepts_client: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_cluster_client_configs: Vec<ClientConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaintEffect {
    NoSelect,
    PreferNoSelect,
    NoSelectIfNew,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub effect: TaintEffect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_added: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, Quantity>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub version: ManagedClusterVersion,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_claims: Vec<ManagedClusterClaim>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ManagedClusterVersion {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ManagedClusterClaim {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl ManagedCluster {
    /// Claims reported in status, keyed by claim name.
    pub fn claims(&self) -> BTreeMap<String, String> {
        self.status
            .as_ref()
            .map(|s| s.cluster_claims.iter().map(|c| (c.name.clone(), c.value.clone())).collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectorType {
    #[default]
    ExclusiveClusterSetLabel,
    LabelSelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSelector {
    #[serde(default)]
    pub selector_type: SelectorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "cluster.open-cluster-management.io", version = "v1beta2", kind = "ManagedClusterSet")]
#[kube(derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ManagedClusterSetSpec {
    #[serde(default)]
    pub cluster_selector: ManagedClusterSelector,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "cluster.open-cluster-management.io", version = "v1beta2", kind = "ManagedClusterSetBinding")]
#[kube(namespaced, derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ManagedClusterSetBindingSpec {
    pub cluster_set: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "cluster.open-cluster-management.io", version = "v1alpha1", kind = "AddOnPlacementScore")]
#[kube(namespaced, status = "AddOnPlacementScoreStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct AddOnPlacementScoreSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddOnPlacementScoreStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scores: Vec<AddOnPlacementScoreItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AddOnPlacementScoreItem {
    pub name: String,
    pub value: i32,
}
