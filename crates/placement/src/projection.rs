//! The `managedCluster` attribute tree seen by CEL expressions.
//!
//! This is a versioned contract: fields are listed explicitly so the CEL-visible schema
//! only changes when [`VERSION`] does. Missing maps project as empty maps and missing
//! lists as empty lists, so `managedCluster.metadata.labels` is always indexable.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use ocm_cel::Value;
use ocm_core::cluster::{ManagedCluster, TaintEffect};

pub const VERSION: &str = "v1";

pub fn project(cluster: &ManagedCluster) -> Value {
    let meta = &cluster.metadata;
    let mut metadata = vec![
        ("name", Value::string(meta.name.as_deref().unwrap_or_default())),
        ("labels", string_map(meta.labels.as_ref())),
        ("annotations", string_map(meta.annotations.as_ref())),
    ];
    if let Some(ts) = &meta.creation_timestamp {
        metadata.push(("creationTimestamp", Value::string(ts.0.to_rfc3339_opts(SecondsFormat::Secs, true))));
    }

    let spec = Value::map([
        ("hubAcceptsClient", Value::Bool(cluster.spec.hub_accepts_client)),
        (
            "managedClusterClientConfigs",
            Value::list(cluster.spec.managed_cluster_client_configs.iter().map(|c| Value::map([("url", Value::string(&c.url))])).collect()),
        ),
        (
            "taints",
            Value::list(
                cluster
                    .spec
                    .taints
                    .iter()
                    .map(|t| {
                        Value::map([
                            ("key", Value::string(&t.key)),
                            ("value", Value::string(&t.value)),
                            ("effect", Value::string(effect_name(t.effect))),
                        ])
                    })
                    .collect(),
            ),
        ),
    ]);

    let status = cluster.status.clone().unwrap_or_default();
    let quantities = |m: &BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>| {
        Value::map(m.iter().map(|(k, q)| (k.as_str(), Value::string(&q.0))))
    };
    let status = Value::map([
        ("allocatable", quantities(&status.allocatable)),
        ("capacity", quantities(&status.capacity)),
        ("version", Value::map([("kubernetes", Value::string(&status.version.kubernetes))])),
        (
            "clusterClaims",
            Value::list(
                status.cluster_claims.iter().map(|c| Value::map([("name", Value::string(&c.name)), ("value", Value::string(&c.value))])).collect(),
            ),
        ),
        ("conditions", Value::list(status.conditions.iter().map(condition).collect())),
    ]);

    Value::map([
        ("apiVersion", Value::string("cluster.open-cluster-management.io/v1")),
        ("kind", Value::string("ManagedCluster")),
        ("metadata", Value::map(metadata)),
        ("spec", spec),
        ("status", status),
    ])
}

/// `labels`/`claims` view used by the selector environment.
pub fn string_map(m: Option<&BTreeMap<String, String>>) -> Value {
    Value::map(m.into_iter().flatten().map(|(k, v)| (k.as_str(), Value::string(v))))
}

pub fn effect_name(e: TaintEffect) -> &'static str {
    match e {
        TaintEffect::NoSelect => "NoSelect",
        TaintEffect::PreferNoSelect => "PreferNoSelect",
        TaintEffect::NoSelectIfNew => "NoSelectIfNew",
    }
}

fn condition(c: &Condition) -> Value {
    Value::map([
        ("type", Value::string(&c.type_)),
        ("status", Value::string(&c.status)),
        ("reason", Value::string(&c.reason)),
        ("message", Value::string(&c.message)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_cel::Key;
    use ocm_core::cluster::{ManagedClusterClaim, ManagedClusterSpec, ManagedClusterStatus, Taint};

    fn get<'a>(v: &'a Value, path: &[&str]) -> &'a Value {
        path.iter().fold(v, |cur, p| match cur {
            Value::Map(m) => m.get(&Key::from(*p)).expect("path"),
            other => panic!("not a map at {}: {:?}", p, other),
        })
    }

    #[test]
    fn empty_cluster_projects_empty_containers() {
        let v = project(&ManagedCluster::new("c1", ManagedClusterSpec::default()));
        assert_eq!(get(&v, &["metadata", "name"]), &Value::string("c1"));
        assert!(matches!(get(&v, &["metadata", "labels"]), Value::Map(m) if m.is_empty()));
        assert!(matches!(get(&v, &["status", "clusterClaims"]), Value::List(l) if l.is_empty()));
        assert!(matches!(get(&v, &["status", "allocatable"]), Value::Map(m) if m.is_empty()));
        assert_eq!(get(&v, &["kind"]), &Value::string("ManagedCluster"));
    }

    #[test]
    fn labels_claims_and_taints_are_visible() {
        let mut c = ManagedCluster::new(
            "c1",
            ManagedClusterSpec {
                taints: vec![Taint { key: "gpu".into(), value: "true".into(), effect: TaintEffect::NoSelect, time_added: None }],
                ..Default::default()
            },
        );
        c.metadata.labels = Some(BTreeMap::from([("env".to_string(), "prod".to_string())]));
        c.status = Some(ManagedClusterStatus {
            cluster_claims: vec![ManagedClusterClaim { name: "region".into(), value: "us-east-1".into() }],
            ..Default::default()
        });
        let v = project(&c);
        assert_eq!(get(&v, &["metadata", "labels", "env"]), &Value::string("prod"));
        match get(&v, &["status", "clusterClaims"]) {
            Value::List(l) => assert_eq!(get(&l[0], &["value"]), &Value::string("us-east-1")),
            other => panic!("{:?}", other),
        }
        match get(&v, &["spec", "taints"]) {
            Value::List(l) => assert_eq!(get(&l[0], &["effect"]), &Value::string("NoSelect")),
            other => panic!("{:?}", other),
        }
    }
}
