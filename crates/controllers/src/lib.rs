//! OCM controllers: reconcilers that persist scheduling results and keep the hub's derived
//! objects (ClusterProfiles, MultiKueue pools, add-on rollout status) in step with inventory.
//!
//! Every reconciler reads through [`HubListers`] and writes through an [`ocm_apply::Writer`],
//! so the same code runs against the API server and against in-memory fixtures.

#![forbid(unsafe_code)]

pub mod addon_progressing;
pub mod admission_check;
pub mod cluster_profile;
pub mod index;
pub mod kueue_secret;
pub mod scheduling;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use metrics::counter;
use ocm_apply::{PatchError, Writer};
use ocm_cel::Env;
use ocm_core::prelude::*;
use ocm_kubehub::Informers;
use ocm_placement::{Listers, ScheduleError, Scheduler, SchedulerConfig, SelectorError, TrackerError};
use ocm_store::{Lister, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    /// A dependent object exists but lacks a field the reconciler needs; retried.
    #[error("{kind} {name:?} has no {field}")]
    Incomplete { kind: &'static str, name: String, field: &'static str },
    #[error("encoding kubeconfig: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("scheduling task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Store(e) => e.is_not_found(),
            Error::Patch(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace holding ClusterProfiles.
    pub cluster_profile_namespace: String,
    /// Namespace holding MultiKueue kubeconfig secrets and the admission-check placements.
    pub kueue_namespace: String,
    /// Delay before a failed reconcile is retried.
    pub requeue: Duration,
    /// Concurrent reconciles per controller.
    pub workers: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_profile_namespace: "open-cluster-management".to_string(),
            kueue_namespace: "kueue-system".to_string(),
            requeue: Duration::from_secs(30),
            workers: 4,
        }
    }
}

/// Every cache a controller reads.
#[derive(Clone)]
pub struct HubListers {
    pub scheduling: Listers,
    pub placements: Arc<dyn Lister<Placement>>,
    pub cluster_profiles: Arc<dyn Lister<ClusterProfile>>,
    pub admission_checks: Arc<dyn Lister<AdmissionCheck>>,
    pub multikueue_configs: Arc<dyn Lister<MultiKueueConfig>>,
    pub multikueue_clusters: Arc<dyn Lister<MultiKueueCluster>>,
    pub addons: Arc<dyn Lister<ManagedClusterAddOn>>,
    pub cluster_management_addons: Arc<dyn Lister<ClusterManagementAddOn>>,
    pub kueue_secrets: Arc<dyn Lister<Secret>>,
}

impl From<&Informers> for HubListers {
    fn from(i: &Informers) -> Self {
        Self {
            scheduling: Listers {
                clusters: Arc::new(i.clusters.clone()),
                cluster_sets: Arc::new(i.cluster_sets.clone()),
                bindings: Arc::new(i.bindings.clone()),
                decisions: Arc::new(i.decisions.clone()),
                scores: Arc::new(i.scores.clone()),
            },
            placements: Arc::new(i.placements.clone()),
            cluster_profiles: Arc::new(i.cluster_profiles.clone()),
            admission_checks: Arc::new(i.admission_checks.clone()),
            multikueue_configs: Arc::new(i.multikueue_configs.clone()),
            multikueue_clusters: Arc::new(i.multikueue_clusters.clone()),
            addons: Arc::new(i.addons.clone()),
            cluster_management_addons: Arc::new(i.cluster_management_addons.clone()),
            kueue_secrets: Arc::new(i.kueue_secrets.clone()),
        }
    }
}

/// Shared state handed to every reconcile.
pub struct Context<W> {
    pub listers: HubListers,
    pub scheduler: Scheduler,
    pub writer: W,
    pub config: ControllerConfig,
    /// Cancelled on shutdown; aborts in-flight scheduling passes.
    pub cancel: CancellationToken,
}

impl<W: Writer> Context<W> {
    pub fn new(listers: HubListers, env: Arc<Env>, scheduler: SchedulerConfig, writer: W, config: ControllerConfig) -> Self {
        let scheduler = Scheduler::new(env, scheduler, listers.scheduling.clone());
        Self { listers, scheduler, writer, config, cancel: CancellationToken::new() }
    }
}

/// Log, count and retry after the configured delay.
pub fn error_policy<K, W>(obj: Arc<K>, err: &Error, ctx: Arc<Context<W>>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&()).into_owned();
    warn!(kind = %kind, name = %obj.name_any(), namespace = ?obj.namespace(), error = %err, "reconcile failed");
    counter!("ocm_reconcile_errors_total", 1u64, "kind" => kind);
    Action::requeue(ctx.config.requeue)
}

/// Run every controller until they all stop (on SIGINT/SIGTERM).
pub async fn run<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) {
    let controllers: Vec<BoxFuture<'static, ()>> = vec![
        scheduling::controller(client.clone(), Arc::clone(&ctx)),
        admission_check::controller(client.clone(), Arc::clone(&ctx)),
        cluster_profile::controller(client.clone(), Arc::clone(&ctx)),
        kueue_secret::controller(client.clone(), Arc::clone(&ctx)),
        addon_progressing::controller(client, Arc::clone(&ctx)),
    ];
    info!(controllers = controllers.len(), workers = ctx.config.workers, "starting controllers");
    futures::future::join_all(controllers).map(|_| ()).await;
    ctx.cancel.cancel();
    info!("controllers stopped");
}

/// Log the outcome of each reconcile of a running controller.
pub(crate) async fn log_result<K, E1, E2>(res: Result<(kube::runtime::reflector::ObjectRef<K>, Action), kube::runtime::controller::Error<E1, E2>>)
where
    K: Resource,
    E1: std::error::Error + 'static,
    E2: std::error::Error + 'static,
{
    match res {
        Ok((obj, _)) => tracing::debug!(object = %obj, "reconciled"),
        Err(e) => tracing::debug!(error = %e, "reconcile loop error"),
    }
}
