//! addon.open-cluster-management.io/v1alpha1: ClusterManagementAddOn install progressions
//! and the per-cluster ManagedClusterAddOn status they summarize.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const REASON_PROGRESSING: &str = "Progressing";
pub const REASON_COMPLETED: &str = "Completed";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_TIMEOUT: &str = "Timeout";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "addon.open-cluster-management.io", version = "v1alpha1", kind = "ClusterManagementAddOn")]
#[kube(status = "ClusterManagementAddOnStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ClusterManagementAddOnSpec {
    #[serde(default)]
    pub install_strategy: InstallStrategy,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallStrategy {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placements: Vec<PlacementStrategy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlacementRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PlacementStrategy {
    #[serde(flatten)]
    pub placement: PlacementRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagementAddOnStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_progressions: Vec<InstallProgression>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgression {
    #[serde(flatten)]
    pub placement: PlacementRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_references: Vec<InstallConfigReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallConfigReference {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_config: Option<ConfigSpecHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_config: Option<ConfigSpecHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_good_config: Option<ConfigSpecHash>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpecHash {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_hash: String,
}

/// Lives in the cluster namespace, named after its ClusterManagementAddOn.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "addon.open-cluster-management.io", version = "v1alpha1", kind = "ManagedClusterAddOn")]
#[kube(namespaced, status = "ManagedClusterAddOnStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ManagedClusterAddOnSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
