//! multicluster.x-k8s.io/v1alpha1 ClusterProfile (cluster inventory API).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const LABEL_CLUSTER_MANAGER: &str = "x-k8s.io/cluster-manager";
pub const LABEL_CLUSTER_SET: &str = "x-k8s.io/cluster-set";
pub const CLUSTER_MANAGER_NAME: &str = "open-cluster-management";

pub const CONDITION_CONTROL_PLANE_HEALTHY: &str = "ControlPlaneHealthy";
pub const CONDITION_JOINED: &str = "Joined";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[kube(group = "multicluster.x-k8s.io", version = "v1alpha1", kind = "ClusterProfile")]
#[kube(namespaced, status = "ClusterProfileStatus", derive = "Default", derive = "PartialEq", schema = "disabled")]
pub struct ClusterProfileSpec {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub cluster_manager: ClusterManager,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterManager {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProfileStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub version: ClusterVersion,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<Credential>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterVersion {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub consumer: String,
    pub access_ref: AccessRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AccessRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ClusterProfile {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.status.as_ref()?.properties.iter().find(|p| p.name == name).map(|p| p.value.as_str())
    }
}
