#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use ocm_apply::testing::RecordingWriter;
use ocm_apply::Object;
use ocm_cel::Env;
use ocm_controllers::{Context, ControllerConfig, HubListers};
use ocm_core::cluster::{ManagedClusterSetSpec, ManagedClusterSpec};
use ocm_core::labels;
use ocm_core::placement::{ClusterDecision, PlacementDecisionSpec, PlacementDecisionStatus};
use ocm_core::prelude::*;
use ocm_placement::cel::cluster_env;
use ocm_placement::{Listers, SchedulerConfig};
use ocm_store::{Lister, MemStore};

/// In-memory caches plus a recording writer, wired into a controller context.
pub struct Fixture {
    pub clusters: Arc<MemStore<ManagedCluster>>,
    pub cluster_sets: Arc<MemStore<ManagedClusterSet>>,
    pub bindings: Arc<MemStore<ManagedClusterSetBinding>>,
    pub decisions: Arc<MemStore<PlacementDecision>>,
    pub scores: Arc<MemStore<AddOnPlacementScore>>,
    pub placements: Arc<MemStore<Placement>>,
    pub cluster_profiles: Arc<MemStore<ClusterProfile>>,
    pub admission_checks: Arc<MemStore<AdmissionCheck>>,
    pub multikueue_configs: Arc<MemStore<MultiKueueConfig>>,
    pub multikueue_clusters: Arc<MemStore<MultiKueueCluster>>,
    pub addons: Arc<MemStore<ManagedClusterAddOn>>,
    pub cluster_management_addons: Arc<MemStore<ClusterManagementAddOn>>,
    pub kueue_secrets: Arc<MemStore<Secret>>,
    pub ctx: Arc<Context<RecordingWriter>>,
}

impl Fixture {
    pub fn new() -> Self { Self::with_env(|scores| cluster_env(scores).expect("env")) }

    /// Like [`Fixture::new`] with a caller-built CEL environment over the score cache.
    pub fn with_env(env: impl FnOnce(Arc<dyn Lister<AddOnPlacementScore>>) -> Arc<Env>) -> Self {
        let clusters: Arc<MemStore<ManagedCluster>> = Arc::new(MemStore::new());
        let cluster_sets: Arc<MemStore<ManagedClusterSet>> = Arc::new(MemStore::new());
        let bindings: Arc<MemStore<ManagedClusterSetBinding>> = Arc::new(MemStore::new());
        let decisions: Arc<MemStore<PlacementDecision>> = Arc::new(MemStore::new());
        let scores: Arc<MemStore<AddOnPlacementScore>> = Arc::new(MemStore::new());
        let placements: Arc<MemStore<Placement>> = Arc::new(MemStore::new());
        let cluster_profiles: Arc<MemStore<ClusterProfile>> = Arc::new(MemStore::new());
        let admission_checks: Arc<MemStore<AdmissionCheck>> = Arc::new(MemStore::new());
        let multikueue_configs: Arc<MemStore<MultiKueueConfig>> = Arc::new(MemStore::new());
        let multikueue_clusters: Arc<MemStore<MultiKueueCluster>> = Arc::new(MemStore::new());
        let addons: Arc<MemStore<ManagedClusterAddOn>> = Arc::new(MemStore::new());
        let cluster_management_addons: Arc<MemStore<ClusterManagementAddOn>> = Arc::new(MemStore::new());
        let kueue_secrets: Arc<MemStore<Secret>> = Arc::new(MemStore::new());
        let listers = HubListers {
            scheduling: Listers {
                clusters: clusters.clone(),
                cluster_sets: cluster_sets.clone(),
                bindings: bindings.clone(),
                decisions: decisions.clone(),
                scores: scores.clone(),
            },
            placements: placements.clone(),
            cluster_profiles: cluster_profiles.clone(),
            admission_checks: admission_checks.clone(),
            multikueue_configs: multikueue_configs.clone(),
            multikueue_clusters: multikueue_clusters.clone(),
            addons: addons.clone(),
            cluster_management_addons: cluster_management_addons.clone(),
            kueue_secrets: kueue_secrets.clone(),
        };
        let env = env(listers.scheduling.scores.clone());
        let ctx = Arc::new(Context::new(listers, env, SchedulerConfig::default(), RecordingWriter::new(), ControllerConfig::default()));
        Self {
            clusters,
            cluster_sets,
            bindings,
            decisions,
            scores,
            placements,
            cluster_profiles,
            admission_checks,
            multikueue_configs,
            multikueue_clusters,
            addons,
            cluster_management_addons,
            kueue_secrets,
            ctx,
        }
    }

    pub fn writer(&self) -> &RecordingWriter { &self.ctx.writer }

    /// Make `obj` visible to both the cache and the writer.
    pub fn seed<K: Object>(&self, store: &MemStore<K>, obj: K) {
        self.writer().seed(&obj);
        store.apply(obj);
    }
}

pub fn namespaced<K: Object>(mut obj: K, ns: &str) -> K {
    obj.meta_mut().namespace = Some(ns.to_string());
    obj
}

pub fn cluster(name: &str, set: &str) -> ManagedCluster {
    let mut c = ManagedCluster::new(name, ManagedClusterSpec::default());
    c.metadata.labels = Some(BTreeMap::from([(labels::CLUSTER_SET.to_string(), set.to_string())]));
    c
}

pub fn cluster_set(name: &str) -> ManagedClusterSet { ManagedClusterSet::new(name, ManagedClusterSetSpec::default()) }

pub fn binding(ns: &str, set: &str) -> ManagedClusterSetBinding {
    namespaced(ManagedClusterSetBinding::new(set, ocm_core::cluster::ManagedClusterSetBindingSpec { cluster_set: set.to_string() }), ns)
}

/// Decision labelled the way the scheduler labels its first group.
pub fn decision(ns: &str, name: &str, placement: &str, clusters: &[&str]) -> PlacementDecision {
    let mut d = namespaced(PlacementDecision::new(name, PlacementDecisionSpec::default()), ns);
    d.metadata.labels = Some(BTreeMap::from([
        (labels::PLACEMENT.to_string(), placement.to_string()),
        (labels::DECISION_GROUP_NAME.to_string(), String::new()),
        (labels::DECISION_GROUP_INDEX.to_string(), "0".to_string()),
    ]));
    d.status = Some(PlacementDecisionStatus {
        decisions: clusters.iter().map(|c| ClusterDecision { cluster_name: c.to_string(), reason: String::new() }).collect(),
    });
    d
}
