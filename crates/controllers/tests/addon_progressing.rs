mod common;

use std::sync::Arc;

use common::*;
use ocm_controllers::addon_progressing::reconcile;
use ocm_core::addon::*;
use ocm_core::conditions::{find_condition, new_condition, FALSE, TRUE};
use ocm_core::placement::{Placement, PlacementSpec};

fn cma() -> ClusterManagementAddOn {
    let mut a = ClusterManagementAddOn::new("monitoring", ClusterManagementAddOnSpec::default());
    a.status = Some(ClusterManagementAddOnStatus {
        install_progressions: vec![InstallProgression {
            placement: PlacementRef { name: "p1".to_string(), namespace: "ns".to_string() },
            config_references: vec![InstallConfigReference {
                group: "addon.open-cluster-management.io".to_string(),
                resource: "addondeploymentconfigs".to_string(),
                desired_config: Some(ConfigSpecHash { namespace: "ns".to_string(), name: "cfg".to_string(), spec_hash: "h1".to_string() }),
                ..Default::default()
            }],
            conditions: vec![],
        }],
    });
    a
}

fn mca(cluster: &str, status: bool, reason: &str) -> ManagedClusterAddOn {
    let mut a = namespaced(ManagedClusterAddOn::new("monitoring", ManagedClusterAddOnSpec::default()), cluster);
    a.status = Some(ManagedClusterAddOnStatus { conditions: vec![new_condition(CONDITION_PROGRESSING, status, reason, "")] });
    a
}

fn setup() -> Fixture {
    let fx = Fixture::new();
    fx.placements.apply(namespaced(Placement::new("p1", PlacementSpec::default()), "ns"));
    fx.decisions.apply(decision("ns", "p1-decision-1", "p1", &["c1", "c2", "c3"]));
    fx
}

fn progression(fx: &Fixture) -> InstallProgression {
    let stored = fx.writer().get::<ClusterManagementAddOn>(None, "monitoring").expect("stored");
    stored.status.expect("status").install_progressions.remove(0)
}

#[tokio::test]
async fn partial_rollout_is_progressing() {
    let fx = setup();
    fx.addons.apply(mca("c1", false, REASON_COMPLETED));
    fx.addons.apply(mca("c2", true, REASON_PROGRESSING));
    let a = cma();
    fx.seed(&fx.cluster_management_addons, a.clone());

    reconcile(Arc::new(a), fx.ctx.clone()).await.expect("reconcile");

    let p = progression(&fx);
    let c = find_condition(&p.conditions, CONDITION_PROGRESSING).expect("progressing");
    assert_eq!((c.status.as_str(), c.reason.as_str()), (TRUE, REASON_PROGRESSING));
    assert_eq!(c.message, "Clusters: 3 selected, 2 effective. Status: 1 progressing, 1 completed, 0 failed, 0 timeout.");
    assert!(p.config_references[0].last_applied_config.is_none());
}

#[tokio::test]
async fn finished_rollout_promotes_desired_config() {
    let fx = setup();
    for c in ["c1", "c2", "c3"] {
        fx.addons.apply(mca(c, false, REASON_COMPLETED));
    }
    let a = cma();
    fx.seed(&fx.cluster_management_addons, a.clone());

    reconcile(Arc::new(a), fx.ctx.clone()).await.expect("reconcile");

    let p = progression(&fx);
    let c = find_condition(&p.conditions, CONDITION_PROGRESSING).expect("progressing");
    assert_eq!((c.status.as_str(), c.reason.as_str()), (FALSE, REASON_COMPLETED));
    assert_eq!(c.message, "Clusters: 3 selected, 3 effective. Status: 3 completed, 0 failed, 0 timeout.");
    let r = &p.config_references[0];
    assert_eq!(r.last_applied_config, r.desired_config);
    assert_eq!(r.last_known_good_config, r.desired_config);
}

#[tokio::test]
async fn no_addons_yet_is_progressing() {
    let fx = setup();
    let a = cma();
    fx.seed(&fx.cluster_management_addons, a.clone());

    reconcile(Arc::new(a), fx.ctx.clone()).await.expect("reconcile");

    let c = find_condition(&progression(&fx).conditions, CONDITION_PROGRESSING).cloned().expect("progressing");
    assert_eq!(c.reason, REASON_PROGRESSING);
    assert_eq!(c.message, "Clusters: 3 selected, 0 effective. Status: 0 progressing, 0 completed, 0 failed, 0 timeout.");
}

#[tokio::test]
async fn unknown_placement_leaves_status_alone() {
    let fx = Fixture::new();
    let a = cma();
    fx.seed(&fx.cluster_management_addons, a.clone());

    reconcile(Arc::new(a), fx.ctx.clone()).await.expect("reconcile");
    assert!(fx.writer().actions().is_empty());
}
