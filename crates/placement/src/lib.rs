//! OCM placement: decides which managed clusters a Placement selects.
//!
//! Pipeline for one placement: resolve [`candidates`] from bound cluster sets, filter each
//! cluster through label/claim selectors and budgeted CEL predicates, tolerate taints,
//! score with prioritizers, apply spread and `numberOfClusters`, then partition the result
//! into decision groups and PlacementDecision objects ([`decision`]).

#![forbid(unsafe_code)]

pub mod candidates;
pub mod cel;
pub mod decision;
pub mod metrics;
pub mod projection;
pub mod scheduler;
pub mod selector;
pub mod status;
pub mod tracker;

use std::sync::Arc;

use ocm_core::cluster::{AddOnPlacementScore, ManagedCluster, ManagedClusterSet, ManagedClusterSetBinding};
use ocm_core::placement::PlacementDecision;
use ocm_store::Lister;

pub use candidates::Candidates;
pub use cel::{CelOptions, CelSelector, CompiledExpression, ManagedClusterLibrary, Validation};
pub use decision::{build_decisions, plan_groups, PlannedGroup};
pub use scheduler::{FilterRecord, ScheduleError, ScheduleResult, Scheduler, SchedulerConfig, ScoredCluster};
pub use selector::{ClusterSelector, SelectorError};
pub use tracker::{ClusterGroups, DecisionClustersTracker, GroupKey, TrackerError};

/// Read-only caches the scheduler consumes.
#[derive(Clone)]
pub struct Listers {
    pub clusters: Arc<dyn Lister<ManagedCluster>>,
    pub cluster_sets: Arc<dyn Lister<ManagedClusterSet>>,
    pub bindings: Arc<dyn Lister<ManagedClusterSetBinding>>,
    pub decisions: Arc<dyn Lister<PlacementDecision>>,
    pub scores: Arc<dyn Lister<AddOnPlacementScore>>,
}
