//! OCM core types: the hub API objects the placement engine and its controllers read and write.
//!
//! CRDs are derived with `schema = "disabled"`; the hub installs them from upstream manifests.

#![forbid(unsafe_code)]

pub mod addon;
pub mod cluster;
pub mod conditions;
pub mod inventory;
pub mod kueue;
pub mod placement;

/// Well-known label keys.
pub mod labels {
    /// Cluster-set membership of a ManagedCluster (ExclusiveClusterSetLabel selector).
    pub const CLUSTER_SET: &str = "cluster.open-cluster-management.io/clusterset";
    /// Owning placement of a PlacementDecision.
    pub const PLACEMENT: &str = "cluster.open-cluster-management.io/placement";
    pub const DECISION_GROUP_NAME: &str = "cluster.open-cluster-management.io/decision-group-name";
    pub const DECISION_GROUP_INDEX: &str = "cluster.open-cluster-management.io/decision-group-index";
    /// Marks token secrets maintained by the managed-serviceaccount add-on.
    pub const MANAGED_SERVICE_ACCOUNT: &str = "authentication.open-cluster-management.io/is-managed-serviceaccount";
}

/// `namespace/name` queue key, or bare `name` for cluster-scoped objects.
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

pub mod prelude {
    pub use super::addon::{ClusterManagementAddOn, ManagedClusterAddOn};
    pub use super::cluster::{AddOnPlacementScore, ManagedCluster, ManagedClusterSet, ManagedClusterSetBinding};
    pub use super::inventory::ClusterProfile;
    pub use super::kueue::{AdmissionCheck, MultiKueueCluster, MultiKueueConfig};
    pub use super::placement::{Placement, PlacementDecision};
}
