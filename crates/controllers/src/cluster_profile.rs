//! Cluster-profile controller: mirrors each ManagedCluster into a cluster-inventory
//! ClusterProfile owned by this cluster manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use ocm_apply::{merge_labels, patch_status_if_changed, Writer};
use ocm_core::cluster::{self, ManagedCluster};
use ocm_core::conditions::{find_condition, set_condition};
use ocm_core::inventory::{
    self, ClusterManager, ClusterProfile, ClusterProfileSpec, ClusterProfileStatus, Property, CLUSTER_MANAGER_NAME, LABEL_CLUSTER_MANAGER,
    LABEL_CLUSTER_SET,
};
use ocm_core::labels;
use tracing::{debug, info};

use crate::{error_policy, index, log_result, Context, Error};

/// Property carrying the cluster's API server URL.
pub const PROPERTY_URL: &str = "url";

pub fn new_profile(cluster: &str, namespace: &str) -> ClusterProfile {
    ClusterProfile {
        metadata: ObjectMeta {
            name: Some(cluster.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(LABEL_CLUSTER_MANAGER.to_string(), CLUSTER_MANAGER_NAME.to_string())])),
            ..Default::default()
        },
        spec: ClusterProfileSpec { display_name: cluster.to_string(), cluster_manager: ClusterManager { name: CLUSTER_MANAGER_NAME.to_string() } },
        status: None,
    }
}

fn mirror(dst: &mut Vec<Condition>, src: &[Condition], from: &str, to: &str) {
    if let Some(c) = find_condition(src, from) {
        set_condition(dst, Condition { type_: to.to_string(), observed_generation: None, ..c.clone() });
    }
}

/// Profile status derived from `cluster`, keeping fields other writers own (credentials).
pub fn profile_status(cluster: &ManagedCluster, old: &ClusterProfileStatus) -> ClusterProfileStatus {
    let mut status = old.clone();
    let cs = cluster.status.clone().unwrap_or_default();
    status.version.kubernetes = cs.version.kubernetes.clone();
    let mut properties: Vec<Property> = cluster.labels().iter().map(|(k, v)| Property { name: k.clone(), value: v.clone() }).collect();
    if let Some(cc) = cluster.spec.managed_cluster_client_configs.first() {
        properties.push(Property { name: PROPERTY_URL.to_string(), value: cc.url.clone() });
    }
    status.properties = properties;
    mirror(&mut status.conditions, &cs.conditions, cluster::CONDITION_AVAILABLE, inventory::CONDITION_CONTROL_PLANE_HEALTHY);
    mirror(&mut status.conditions, &cs.conditions, cluster::CONDITION_JOINED, inventory::CONDITION_JOINED);
    status
}

pub async fn reconcile<W: Writer>(cluster: Arc<ManagedCluster>, ctx: Arc<Context<W>>) -> Result<Action, Error> {
    let name = cluster.name_any();
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!(cluster = %name, "cluster is being deleted");
        return Ok(Action::await_change());
    }
    let ns = &ctx.config.cluster_profile_namespace;
    let profile = match ctx.listers.cluster_profiles.get(Some(ns), &name) {
        Ok(p) => p,
        Err(e) if e.is_not_found() => {
            ctx.writer.create(&new_profile(&name, ns)).await?;
            info!(cluster = %name, "cluster profile created");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };
    if profile.spec.cluster_manager.name != CLUSTER_MANAGER_NAME {
        debug!(cluster = %name, manager = %profile.spec.cluster_manager.name, "profile managed elsewhere");
        return Ok(Action::await_change());
    }

    let want = BTreeMap::from([
        (LABEL_CLUSTER_MANAGER.to_string(), CLUSTER_MANAGER_NAME.to_string()),
        (LABEL_CLUSTER_SET.to_string(), cluster.labels().get(labels::CLUSTER_SET).cloned().unwrap_or_default()),
    ]);
    let mut current = profile.as_ref().clone();
    if merge_labels(&mut current.metadata, &want) {
        current = ctx.writer.replace(&current).await?;
        debug!(cluster = %name, "profile labels updated");
    }

    let old = profile.status.clone().unwrap_or_default();
    let new = profile_status(&cluster, &old);
    patch_status_if_changed(&ctx.writer, &current, &new, &old).await?;
    Ok(Action::await_change())
}

pub fn controller<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) -> BoxFuture<'static, ()> {
    let profiles = Api::<ClusterProfile>::namespaced(client.clone(), &ctx.config.cluster_profile_namespace);
    Controller::new(Api::<ManagedCluster>::all(client), watcher::Config::default())
        .watches(profiles, watcher::Config::default(), |p| index::cluster_for_profile(&p))
        .with_config(controller::Config::default().concurrency(ctx.config.workers))
        .shutdown_on_signal()
        .run(reconcile::<W>, error_policy::<ManagedCluster, W>, ctx)
        .for_each(log_result)
        .boxed()
}
