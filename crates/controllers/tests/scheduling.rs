mod common;

use std::sync::Arc;
use std::thread::{self, ThreadId};

use common::*;
use kube::runtime::controller::Action;
use ocm_apply::testing::Verb;
use ocm_core::conditions::{find_condition, FALSE, TRUE};
use ocm_core::placement::*;
use ocm_cel::{Env, Function, Library, Overload, Type, Value};
use ocm_controllers::scheduling::reconcile;
use ocm_placement::cel::MANAGED_CLUSTER;

fn placement(spec: PlacementSpec) -> Placement { namespaced(Placement::new("p1", spec), "ns") }

fn fleet(fx: &common::Fixture, names: &[&str]) {
    fx.cluster_sets.apply(cluster_set("global"));
    fx.bindings.apply(binding("ns", "global"));
    for n in names {
        fx.clusters.apply(cluster(n, "global"));
    }
}

fn stored_placement(fx: &common::Fixture) -> Placement { fx.writer().get::<Placement>(Some("ns"), "p1").expect("placement stored") }

#[tokio::test]
async fn new_placement_gets_decisions_and_status() {
    let fx = Fixture::new();
    fleet(&fx, &["c1", "c2", "c3"]);
    let p = placement(PlacementSpec::default());
    fx.seed(&fx.placements, p.clone());

    let action = reconcile(Arc::new(p), fx.ctx.clone()).await.expect("reconcile");
    assert_eq!(action, Action::await_change());

    let d = fx.writer().get::<PlacementDecision>(Some("ns"), "p1-decision-1").expect("decision");
    let names: Vec<String> = d.status.expect("status").decisions.into_iter().map(|c| c.cluster_name).collect();
    assert_eq!(names, vec!["c1", "c2", "c3"]);

    let status = stored_placement(&fx).status.expect("status");
    assert_eq!(status.number_of_selected_clusters, 3);
    assert_eq!(status.decision_groups.len(), 1);
    assert_eq!(status.decision_groups[0].decisions, vec!["p1-decision-1"]);
    let sat = find_condition(&status.conditions, CONDITION_SATISFIED).expect("satisfied");
    assert_eq!((sat.status.as_str(), sat.reason.as_str()), (TRUE, REASON_ALL_DECISIONS_SCHEDULED));
    let mis = find_condition(&status.conditions, CONDITION_MISCONFIGURED).expect("misconfigured");
    assert_eq!((mis.status.as_str(), mis.reason.as_str()), (FALSE, REASON_SUCCEED_CONFIGURED));

    let verbs: Vec<(Verb, String)> = fx.writer().actions().into_iter().map(|a| (a.verb, a.kind)).collect();
    assert_eq!(
        verbs,
        vec![
            (Verb::Create, "PlacementDecision".to_string()),
            (Verb::PatchStatus, "PlacementDecision".to_string()),
            (Verb::PatchStatus, "Placement".to_string()),
        ]
    );
}

#[tokio::test]
async fn second_pass_over_synced_caches_writes_nothing() {
    let fx = Fixture::new();
    fleet(&fx, &["c1", "c2"]);
    let p = placement(PlacementSpec { number_of_clusters: Some(2), ..Default::default() });
    fx.seed(&fx.placements, p.clone());
    reconcile(Arc::new(p), fx.ctx.clone()).await.expect("first pass");

    for d in fx.writer().list::<PlacementDecision>() {
        fx.decisions.apply(d);
    }
    let synced = stored_placement(&fx);
    fx.placements.apply(synced.clone());
    fx.writer().clear_actions();

    reconcile(Arc::new(synced), fx.ctx.clone()).await.expect("second pass");
    assert!(fx.writer().actions().is_empty(), "unexpected writes: {:?}", fx.writer().actions());
}

#[tokio::test]
async fn surplus_decisions_are_deleted() {
    let fx = Fixture::new();
    fleet(&fx, &["c1", "c2"]);
    fx.seed(&fx.decisions, decision("ns", "p1-decision-1", "p1", &["c1"]));
    fx.seed(&fx.decisions, decision("ns", "p1-decision-2", "p1", &["c2"]));
    fx.seed(&fx.decisions, decision("ns", "other-decision-1", "other", &["c2"]));
    let p = placement(PlacementSpec::default());
    fx.seed(&fx.placements, p.clone());

    reconcile(Arc::new(p), fx.ctx.clone()).await.expect("reconcile");

    let deletes: Vec<String> = fx.writer().actions().into_iter().filter(|a| a.verb == Verb::Delete).map(|a| a.key).collect();
    assert_eq!(deletes, vec!["ns/p1-decision-2"]);
    assert!(fx.writer().get::<PlacementDecision>(Some("ns"), "other-decision-1").is_some());
    let d = fx.writer().get::<PlacementDecision>(Some("ns"), "p1-decision-1").expect("kept");
    assert_eq!(d.status.expect("status").decisions.len(), 2);
}

#[tokio::test]
async fn misconfigured_placement_writes_condition_only() {
    let fx = Fixture::new();
    fleet(&fx, &["c1"]);
    let spec = PlacementSpec {
        predicates: vec![ClusterPredicate {
            required_cluster_selector: ClusterSelector {
                cel_selector: ClusterCelSelector { cel_expressions: vec!["invalid.expression".to_string()] },
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let p = placement(spec);
    fx.seed(&fx.placements, p.clone());

    let action = reconcile(Arc::new(p), fx.ctx.clone()).await.expect("misconfiguration is not an error");
    assert_eq!(action, Action::await_change());
    assert!(fx.writer().actions_for("PlacementDecision").is_empty());

    let status = stored_placement(&fx).status.expect("status");
    let mis = find_condition(&status.conditions, CONDITION_MISCONFIGURED).expect("misconfigured");
    assert_eq!((mis.status.as_str(), mis.reason.as_str()), (TRUE, REASON_MISCONFIGURED));
    assert!(find_condition(&status.conditions, CONDITION_SATISFIED).is_none());
}

#[tokio::test]
async fn placement_without_bindings_is_unsatisfied() {
    let fx = Fixture::new();
    fx.clusters.apply(cluster("c1", "global"));
    let p = placement(PlacementSpec::default());
    fx.seed(&fx.placements, p.clone());

    reconcile(Arc::new(p), fx.ctx.clone()).await.expect("reconcile");

    let status = stored_placement(&fx).status.expect("status");
    assert_eq!(status.number_of_selected_clusters, 0);
    let sat = find_condition(&status.conditions, CONDITION_SATISFIED).expect("satisfied");
    assert_eq!((sat.status.as_str(), sat.reason.as_str()), (FALSE, REASON_NO_BINDINGS));
    let d = fx.writer().get::<PlacementDecision>(Some("ns"), "p1-decision-1").expect("empty decision");
    assert!(d.status.map(|s| s.decisions.is_empty()).unwrap_or(true));
}

#[tokio::test]
async fn deleting_placement_is_left_alone() {
    let fx = Fixture::new();
    fleet(&fx, &["c1"]);
    let mut p = placement(PlacementSpec::default());
    p.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()));
    fx.seed(&fx.placements, p.clone());

    reconcile(Arc::new(p), fx.ctx.clone()).await.expect("reconcile");
    assert!(fx.writer().actions().is_empty());
}

/// `offThread()` is true when evaluated on a thread other than the given one.
struct OffThread(ThreadId);

impl Library for OffThread {
    fn name(&self) -> &'static str { "offthread" }

    fn functions(&self) -> Vec<Function> {
        let origin = self.0;
        vec![Function::new("offThread", vec![Overload::global("off_thread", &[], Type::Bool, move |_| Ok(Value::Bool(thread::current().id() != origin)))])]
    }
}

#[tokio::test(flavor = "current_thread")]
async fn cel_predicates_run_off_the_reconcile_thread() {
    let origin = thread::current().id();
    let fx = Fixture::with_env(|_| Env::builder().variable(MANAGED_CLUSTER, Type::Map).library(OffThread(origin)).build().expect("env"));
    fleet(&fx, &["c1", "c2"]);
    let spec = PlacementSpec {
        predicates: vec![ClusterPredicate {
            required_cluster_selector: ClusterSelector {
                cel_selector: ClusterCelSelector { cel_expressions: vec!["offThread()".to_string()] },
                ..Default::default()
            },
        }],
        ..Default::default()
    };
    let p = placement(spec);
    fx.seed(&fx.placements, p.clone());

    reconcile(Arc::new(p), fx.ctx.clone()).await.expect("reconcile");

    let status = stored_placement(&fx).status.expect("status");
    assert_eq!(status.number_of_selected_clusters, 2);
}
