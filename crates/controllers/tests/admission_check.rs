mod common;

use std::sync::Arc;

use common::*;
use ocm_apply::testing::Verb;
use ocm_controllers::admission_check::{reconcile, REASON_ACTIVE};
use ocm_controllers::Error;
use ocm_core::conditions::{find_condition, TRUE};
use ocm_core::inventory::{AccessRef, ClusterProfileSpec, ClusterProfileStatus, Credential};
use ocm_core::kueue::*;
use ocm_core::prelude::*;

fn check(controller: &str) -> AdmissionCheck {
    AdmissionCheck::new(
        "multikueue",
        AdmissionCheckSpec {
            controller_name: controller.to_string(),
            parameters: Some(AdmissionCheckParametersReference {
                api_group: "cluster.open-cluster-management.io".to_string(),
                kind: "Placement".to_string(),
                name: "gpu".to_string(),
            }),
        },
    )
}

fn profile(cluster: &str, secret: Option<&str>) -> ClusterProfile {
    let mut p = namespaced(ClusterProfile::new(cluster, ClusterProfileSpec::default()), "open-cluster-management");
    p.status = Some(ClusterProfileStatus {
        credentials: secret
            .map(|s| Credential {
                consumer: "kueue-admin".to_string(),
                access_ref: AccessRef { kind: "Secret".to_string(), name: s.to_string(), namespace: "kueue-system".to_string() },
            })
            .into_iter()
            .collect(),
        ..Default::default()
    });
    p
}

fn setup() -> Fixture {
    let fx = Fixture::new();
    fx.decisions.apply(decision("kueue-system", "gpu-decision-1", "gpu", &["c1", "c2"]));
    fx.cluster_profiles.apply(profile("c1", Some("c1-kubeconfig")));
    fx.cluster_profiles.apply(profile("c2", Some("c2-kubeconfig")));
    fx
}

#[tokio::test]
async fn generates_multikueue_pool_from_decisions() {
    let fx = setup();
    let ac = check(PLACEMENT_CONTROLLER_NAME);
    fx.seed(&fx.admission_checks, ac.clone());

    reconcile(Arc::new(ac), fx.ctx.clone()).await.expect("reconcile");

    let mkc = fx.writer().get::<MultiKueueCluster>(None, "gpu-c1").expect("gpu-c1");
    assert_eq!(mkc.spec.kube_config, KubeConfig { location: "c1-kubeconfig".to_string(), location_type: LocationType::Secret });
    assert!(fx.writer().get::<MultiKueueCluster>(None, "gpu-c2").is_some());

    let config = fx.writer().get::<MultiKueueConfig>(None, "multikueue").expect("config");
    assert_eq!(config.spec.clusters, vec!["gpu-c1", "gpu-c2"]);

    let stored = fx.writer().get::<AdmissionCheck>(None, "multikueue").expect("check");
    let conditions = stored.status.expect("status").conditions;
    let active = find_condition(&conditions, CONDITION_MULTIKUEUE_CLUSTER_ACTIVE).expect("active");
    assert_eq!((active.status.as_str(), active.reason.as_str()), (TRUE, REASON_ACTIVE));
    assert_eq!(active.message, "MultiKueueConfig and MultiKueueCluster generated");
}

#[tokio::test]
async fn other_controllers_are_ignored() {
    let fx = setup();
    let ac = check("kueue.x-k8s.io/multikueue");
    fx.seed(&fx.admission_checks, ac.clone());

    reconcile(Arc::new(ac), fx.ctx.clone()).await.expect("reconcile");
    assert!(fx.writer().actions().is_empty());
}

#[tokio::test]
async fn changed_credential_replaces_cluster() {
    let fx = setup();
    let stale = MultiKueueCluster::new(
        "gpu-c1",
        MultiKueueClusterSpec { kube_config: KubeConfig { location: "old-secret".to_string(), location_type: LocationType::Secret } },
    );
    fx.seed(&fx.multikueue_clusters, stale);
    let ac = check(PLACEMENT_CONTROLLER_NAME);
    fx.seed(&fx.admission_checks, ac.clone());

    reconcile(Arc::new(ac), fx.ctx.clone()).await.expect("reconcile");

    let verbs: Vec<(Verb, String)> = fx.writer().actions_for("MultiKueueCluster").into_iter().map(|a| (a.verb, a.key)).collect();
    assert_eq!(verbs, vec![(Verb::Replace, "gpu-c1".to_string()), (Verb::Create, "gpu-c2".to_string())]);
    let mkc = fx.writer().get::<MultiKueueCluster>(None, "gpu-c1").expect("gpu-c1");
    assert_eq!(mkc.spec.kube_config.location, "c1-kubeconfig");
}

#[tokio::test]
async fn profile_without_credentials_is_retried() {
    let fx = setup();
    fx.cluster_profiles.apply(profile("c2", None));
    let ac = check(PLACEMENT_CONTROLLER_NAME);
    fx.seed(&fx.admission_checks, ac.clone());

    let err = reconcile(Arc::new(ac), fx.ctx.clone()).await.expect_err("missing credential");
    assert!(matches!(err, Error::Incomplete { kind: "ClusterProfile", .. }));
    assert!(fx.writer().actions_for("AdmissionCheck").is_empty());
}

#[tokio::test]
async fn missing_profile_is_not_found() {
    let fx = Fixture::new();
    fx.decisions.apply(decision("kueue-system", "gpu-decision-1", "gpu", &["c9"]));
    let ac = check(PLACEMENT_CONTROLLER_NAME);
    fx.seed(&fx.admission_checks, ac.clone());

    let err = reconcile(Arc::new(ac), fx.ctx.clone()).await.expect_err("missing profile");
    assert!(err.is_not_found());
}
