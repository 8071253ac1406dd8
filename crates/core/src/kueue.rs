//! kueue.x-k8s.io: the admission-check gate and the MultiKueue cluster pool it configures.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// `spec.controllerName` of admission checks served by the placement integration.
pub const PLACEMENT_CONTROLLER_NAME: &str = "open-cluster-management.io/placement";
pub const CONDITION_MULTIKUEUE_CLUSTER_ACTIVE: &str = "MultiKueueClusterActive";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "kueue.x-k8s.io", version = "v1beta1", kind = "AdmissionCheck")]
#[kube(status = "AdmissionCheckStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct AdmissionCheckSpec {
    pub controller_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<AdmissionCheckParametersReference>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionCheckParametersReference {
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AdmissionCheckStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AdmissionCheck {
    /// Name of the Placement this check resolves clusters from.
    pub fn placement_name(&self) -> Option<&str> {
        self.spec.parameters.as_ref().map(|p| p.name.as_str()).filter(|n| !n.is_empty())
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "kueue.x-k8s.io", version = "v1alpha1", kind = "MultiKueueConfig")]
#[kube(derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct MultiKueueConfigSpec {
    #[serde(default)]
    pub clusters: Vec<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "kueue.x-k8s.io", version = "v1alpha1", kind = "MultiKueueCluster")]
#[kube(derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct MultiKueueClusterSpec {
    pub kube_config: KubeConfig,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LocationType {
    #[default]
    Secret,
    Path,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfig {
    pub location: String,
    #[serde(default)]
    pub location_type: LocationType,
}
