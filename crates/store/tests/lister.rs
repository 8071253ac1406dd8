#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use ocm_core::cluster::{ManagedCluster, ManagedClusterSpec};
use ocm_core::placement::{PlacementDecision, PlacementDecisionSpec};
use ocm_store::{Lister, MemStore, Selector};

fn cluster(name: &str, labels: &[(&str, &str)]) -> ManagedCluster {
    let mut c = ManagedCluster::new(name, ManagedClusterSpec::default());
    c.metadata.labels = Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
    c
}

fn decision(ns: &str, name: &str) -> PlacementDecision {
    let mut d = PlacementDecision::new(name, PlacementDecisionSpec::default());
    d.metadata.namespace = Some(ns.to_string());
    d
}

#[test]
fn get_list_and_delete() {
    let store = MemStore::from_objects(vec![cluster("b", &[]), cluster("a", &[])]);
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(None, "a").expect("ok").metadata.name.as_deref(), Some("a"));
    let names: Vec<_> = store.list().iter().map(|c| c.metadata.name.clone().unwrap_or_default()).collect();
    assert_eq!(names, vec!["a", "b"]);

    assert!(store.delete(None, "a").is_some());
    let err = store.get(None, "a").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "ManagedCluster \"a\" not found");
    assert!(store.delete(None, "a").is_none());
}

#[test]
fn apply_replaces_by_key() {
    let store = MemStore::new();
    store.apply(cluster("a", &[("env", "dev")]));
    store.apply(cluster("a", &[("env", "prod")]));
    assert_eq!(store.len(), 1);
    let labels = store.get(None, "a").expect("ok").metadata.labels.clone().unwrap_or_default();
    assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
}

#[test]
fn namespaced_objects_are_keyed_by_namespace() {
    let store = MemStore::from_objects(vec![decision("ns1", "p-decision-1"), decision("ns2", "p-decision-1")]);
    assert_eq!(store.len(), 2);
    assert_eq!(store.list_namespaced("ns1").len(), 1);
    assert!(store.get(Some("ns2"), "p-decision-1").is_ok());
    assert!(store.get(Some("ns3"), "p-decision-1").unwrap_err().is_not_found());
}

#[test]
fn list_selected_filters_by_labels() {
    let store = MemStore::from_objects(vec![
        cluster("a", &[("cluster.open-cluster-management.io/clusterset", "prod")]),
        cluster("b", &[("cluster.open-cluster-management.io/clusterset", "dev")]),
        cluster("c", &[]),
    ]);
    let sel = Selector::from_labels(&BTreeMap::from([("cluster.open-cluster-management.io/clusterset".to_string(), "prod".to_string())]));
    let hit = store.list_selected(&sel);
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].metadata.name.as_deref(), Some("a"));
    assert_eq!(store.list_selected(&Selector::everything()).len(), 3);
}
