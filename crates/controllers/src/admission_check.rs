//! Admission-check controller: turns the clusters a Placement decided into a MultiKueue
//! pool (one MultiKueueCluster per cluster plus a MultiKueueConfig listing them).

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use ocm_apply::{create_or_update, patch_status_if_changed, Writer};
use ocm_core::conditions::{new_condition, set_condition};
use ocm_core::kueue::{KubeConfig, LocationType, MultiKueueClusterSpec, MultiKueueConfigSpec, CONDITION_MULTIKUEUE_CLUSTER_ACTIVE, PLACEMENT_CONTROLLER_NAME};
use ocm_core::prelude::*;
use ocm_placement::DecisionClustersTracker;
use tracing::{debug, info};

use crate::{error_policy, index, log_result, Context, Error};

pub const REASON_ACTIVE: &str = "Active";

/// `<placement>-<cluster>`
pub fn multikueue_cluster_name(placement: &str, cluster: &str) -> String { format!("{}-{}", placement, cluster) }

fn multikueue_cluster<W>(ctx: &Context<W>, placement: &str, cluster: &str) -> Result<MultiKueueCluster, Error> {
    let profile = ctx.listers.cluster_profiles.get(Some(&ctx.config.cluster_profile_namespace), cluster)?;
    let credential = profile
        .status
        .as_ref()
        .and_then(|s| s.credentials.first())
        .ok_or_else(|| Error::Incomplete { kind: "ClusterProfile", name: cluster.to_string(), field: "status.credentials" })?;
    let spec = MultiKueueClusterSpec { kube_config: KubeConfig { location: credential.access_ref.name.clone(), location_type: LocationType::Secret } };
    Ok(MultiKueueCluster::new(&multikueue_cluster_name(placement, cluster), spec))
}

pub async fn reconcile<W: Writer>(check: Arc<AdmissionCheck>, ctx: Arc<Context<W>>) -> Result<Action, Error> {
    let name = check.name_any();
    if check.spec.controller_name != PLACEMENT_CONTROLLER_NAME {
        return Ok(Action::await_change());
    }
    let Some(placement) = check.placement_name() else {
        debug!(check = %name, "admission check has no placement parameter");
        return Ok(Action::await_change());
    };

    let mut tracker = DecisionClustersTracker::new(Arc::clone(&ctx.listers.scheduling.decisions), &ctx.config.kueue_namespace, placement);
    tracker.refresh()?;
    let clusters = tracker.existing_cluster_groups_besides(&[]).clusters();

    let mut members = Vec::with_capacity(clusters.len());
    for cluster in &clusters {
        let desired = multikueue_cluster(&ctx, placement, cluster)?;
        let mkc_name = desired.name_any();
        let existing = ctx.listers.multikueue_clusters.get(None, &mkc_name).ok();
        create_or_update(&ctx.writer, existing.as_deref(), desired, |a, b| a.spec.kube_config != b.spec.kube_config).await?;
        members.push(mkc_name);
    }

    let config = MultiKueueConfig::new(&name, MultiKueueConfigSpec { clusters: members });
    let existing = ctx.listers.multikueue_configs.get(None, &name).ok();
    create_or_update(&ctx.writer, existing.as_deref(), config, |a, b| a.spec.clusters != b.spec.clusters).await?;

    let old = check.status.clone().unwrap_or_default();
    let mut status = old.clone();
    set_condition(
        &mut status.conditions,
        new_condition(CONDITION_MULTIKUEUE_CLUSTER_ACTIVE, true, REASON_ACTIVE, "MultiKueueConfig and MultiKueueCluster generated"),
    );
    if patch_status_if_changed(&ctx.writer, check.as_ref(), &status, &old).await? {
        info!(check = %name, placement = %placement, clusters = clusters.len(), "multikueue pool generated");
    }
    Ok(Action::await_change())
}

pub fn controller<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) -> BoxFuture<'static, ()> {
    let (l1, l2) = (ctx.listers.clone(), ctx.listers.clone());
    let (ns1, ns2) = (ctx.config.kueue_namespace.clone(), ctx.config.kueue_namespace.clone());
    Controller::new(Api::<AdmissionCheck>::all(client.clone()), watcher::Config::default())
        .watches(Api::<Placement>::all(client.clone()), watcher::Config::default(), move |p| {
            index::admission_checks_for_placement(&l1, &ns1, &p.namespace().unwrap_or_default(), &p.name_any())
        })
        .watches(Api::<PlacementDecision>::all(client), watcher::Config::default(), move |d| index::admission_checks_for_decision(&l2, &ns2, &d))
        .with_config(controller::Config::default().concurrency(ctx.config.workers))
        .shutdown_on_signal()
        .run(reconcile::<W>, error_policy::<AdmissionCheck, W>, ctx)
        .for_each(log_result)
        .boxed()
}
