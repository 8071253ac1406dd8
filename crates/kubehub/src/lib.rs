//! OCM kubehub: hub client and the reflector-backed caches every controller reads from.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use metrics::counter;
use ocm_core::prelude::*;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Build a client from the in-cluster environment or the local kubeconfig.
pub async fn client() -> Result<Client> { Client::try_default().await.context("building kube client") }

/// Namespaces the namespaced caches are scoped to.
#[derive(Debug, Clone)]
pub struct InformerConfig {
    pub cluster_profile_namespace: String,
    pub kueue_namespace: String,
}

impl Default for InformerConfig {
    fn default() -> Self { Self { cluster_profile_namespace: "open-cluster-management".to_string(), kueue_namespace: "kueue-system".to_string() } }
}

/// Read handles of the hub caches. Cheap to clone.
#[derive(Clone)]
pub struct Informers {
    pub clusters: Store<ManagedCluster>,
    pub cluster_sets: Store<ManagedClusterSet>,
    pub bindings: Store<ManagedClusterSetBinding>,
    pub placements: Store<Placement>,
    pub decisions: Store<PlacementDecision>,
    pub scores: Store<AddOnPlacementScore>,
    pub cluster_profiles: Store<ClusterProfile>,
    pub admission_checks: Store<AdmissionCheck>,
    pub multikueue_configs: Store<MultiKueueConfig>,
    pub multikueue_clusters: Store<MultiKueueCluster>,
    pub addons: Store<ManagedClusterAddOn>,
    pub cluster_management_addons: Store<ClusterManagementAddOn>,
    /// Kubeconfig secrets in the kueue namespace.
    pub kueue_secrets: Store<Secret>,
}

fn reflect<K>(api: Api<K>, tasks: &mut Vec<JoinHandle<()>>) -> Store<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&()).into_owned();
    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default())).default_backoff().applied_objects();
    let fut: BoxFuture<'static, ()> = async move {
        futures::pin_mut!(stream);
        while let Some(ev) = stream.next().await {
            match ev {
                Ok(obj) => debug!(kind = %kind, name = ?obj.meta().name, "cache updated"),
                Err(e) => {
                    counter!("kubehub_watch_errors_total", 1u64, "kind" => kind.clone());
                    warn!(kind = %kind, error = %e, "watch error");
                }
            }
        }
        warn!(kind = %kind, "watch stream ended");
    }
    .boxed();
    tasks.push(tokio::spawn(fut));
    reader
}

impl Informers {
    /// Start one reflector per resource. The returned tasks run until aborted.
    pub fn start(client: &Client, cfg: &InformerConfig) -> (Self, Vec<JoinHandle<()>>) {
        let mut tasks = Vec::new();
        let c = client.clone();
        let informers = Self {
            clusters: reflect(Api::all(c.clone()), &mut tasks),
            cluster_sets: reflect(Api::all(c.clone()), &mut tasks),
            bindings: reflect(Api::all(c.clone()), &mut tasks),
            placements: reflect(Api::all(c.clone()), &mut tasks),
            decisions: reflect(Api::all(c.clone()), &mut tasks),
            scores: reflect(Api::all(c.clone()), &mut tasks),
            cluster_profiles: reflect(Api::namespaced(c.clone(), &cfg.cluster_profile_namespace), &mut tasks),
            admission_checks: reflect(Api::all(c.clone()), &mut tasks),
            multikueue_configs: reflect(Api::all(c.clone()), &mut tasks),
            multikueue_clusters: reflect(Api::all(c.clone()), &mut tasks),
            addons: reflect(Api::all(c.clone()), &mut tasks),
            cluster_management_addons: reflect(Api::all(c.clone()), &mut tasks),
            kueue_secrets: reflect(Api::namespaced(c, &cfg.kueue_namespace), &mut tasks),
        };
        info!(caches = tasks.len(), "informers started");
        (informers, tasks)
    }

    /// Wait for every cache to complete its initial list.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let all = async {
            self.clusters.wait_until_ready().await?;
            self.cluster_sets.wait_until_ready().await?;
            self.bindings.wait_until_ready().await?;
            self.placements.wait_until_ready().await?;
            self.decisions.wait_until_ready().await?;
            self.scores.wait_until_ready().await?;
            self.cluster_profiles.wait_until_ready().await?;
            self.admission_checks.wait_until_ready().await?;
            self.multikueue_configs.wait_until_ready().await?;
            self.multikueue_clusters.wait_until_ready().await?;
            self.addons.wait_until_ready().await?;
            self.cluster_management_addons.wait_until_ready().await?;
            self.kueue_secrets.wait_until_ready().await
        };
        tokio::time::timeout(timeout, all)
            .await
            .context("timed out waiting for caches to sync")?
            .context("cache writer dropped before sync")?;
        info!("caches synced");
        Ok(())
    }
}
