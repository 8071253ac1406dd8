mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use ocm_apply::testing::Verb;
use ocm_controllers::cluster_profile::{new_profile, reconcile};
use ocm_core::cluster::{self, ClientConfig, ManagedClusterStatus, ManagedClusterVersion};
use ocm_core::conditions::{find_condition, new_condition, FALSE, TRUE};
use ocm_core::inventory::*;
use ocm_core::labels;
use ocm_core::prelude::*;

fn joined_cluster() -> ManagedCluster {
    let mut c = cluster("c1", "global");
    c.metadata.labels.get_or_insert_with(BTreeMap::new).insert("env".to_string(), "prod".to_string());
    c.spec.managed_cluster_client_configs = vec![ClientConfig { url: "https://c1.example.com:6443".to_string(), ..Default::default() }];
    c.status = Some(ManagedClusterStatus {
        version: ManagedClusterVersion { kubernetes: "v1.29.2".to_string() },
        conditions: vec![
            new_condition(cluster::CONDITION_AVAILABLE, true, "ManagedClusterAvailable", "cluster is available"),
            new_condition(cluster::CONDITION_JOINED, false, "ManagedClusterPending", "not joined yet"),
        ],
        ..Default::default()
    });
    c
}

#[tokio::test]
async fn missing_profile_is_created() {
    let fx = Fixture::new();
    let c = joined_cluster();

    reconcile(Arc::new(c), fx.ctx.clone()).await.expect("reconcile");

    let p = fx.writer().get::<ClusterProfile>(Some("open-cluster-management"), "c1").expect("created");
    assert_eq!(p.spec.display_name, "c1");
    assert_eq!(p.spec.cluster_manager.name, CLUSTER_MANAGER_NAME);
    assert_eq!(p.metadata.labels.expect("labels").get(LABEL_CLUSTER_MANAGER).map(String::as_str), Some(CLUSTER_MANAGER_NAME));
    assert_eq!(fx.writer().actions().into_iter().map(|a| a.verb).collect::<Vec<_>>(), vec![Verb::Create]);
}

#[tokio::test]
async fn profile_follows_cluster() {
    let fx = Fixture::new();
    let mut existing = new_profile("c1", "open-cluster-management");
    existing.status = Some(ClusterProfileStatus {
        credentials: vec![Credential {
            consumer: "kueue-admin".to_string(),
            access_ref: AccessRef { kind: "Secret".to_string(), name: "s".to_string(), namespace: "kueue-system".to_string() },
        }],
        ..Default::default()
    });
    fx.seed(&fx.cluster_profiles, existing);

    reconcile(Arc::new(joined_cluster()), fx.ctx.clone()).await.expect("reconcile");

    let p = fx.writer().get::<ClusterProfile>(Some("open-cluster-management"), "c1").expect("profile");
    assert_eq!(p.metadata.labels.as_ref().and_then(|l| l.get(LABEL_CLUSTER_SET)).map(String::as_str), Some("global"));
    assert_eq!(p.property("url"), Some("https://c1.example.com:6443"));
    assert_eq!(p.property("env"), Some("prod"));
    assert_eq!(p.property(labels::CLUSTER_SET), Some("global"));
    let status = p.status.expect("status");
    assert_eq!(status.version.kubernetes, "v1.29.2");
    assert_eq!(status.credentials.len(), 1, "credentials are kept");
    assert_eq!(find_condition(&status.conditions, CONDITION_CONTROL_PLANE_HEALTHY).map(|c| c.status.as_str()), Some(TRUE));
    let joined = find_condition(&status.conditions, CONDITION_JOINED).expect("joined");
    assert_eq!((joined.status.as_str(), joined.reason.as_str()), (FALSE, "ManagedClusterPending"));

    let verbs: Vec<Verb> = fx.writer().actions().into_iter().map(|a| a.verb).collect();
    assert_eq!(verbs, vec![Verb::Replace, Verb::PatchStatus]);
}

#[tokio::test]
async fn profile_of_another_manager_is_skipped() {
    let fx = Fixture::new();
    let mut foreign = new_profile("c1", "open-cluster-management");
    foreign.spec.cluster_manager.name = "other-manager".to_string();
    fx.seed(&fx.cluster_profiles, foreign);

    reconcile(Arc::new(joined_cluster()), fx.ctx.clone()).await.expect("reconcile");
    assert!(fx.writer().actions().is_empty());
}

#[tokio::test]
async fn deleting_cluster_is_skipped() {
    let fx = Fixture::new();
    let mut c = joined_cluster();
    c.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

    reconcile(Arc::new(c), fx.ctx.clone()).await.expect("reconcile");
    assert!(fx.writer().actions().is_empty());
}
