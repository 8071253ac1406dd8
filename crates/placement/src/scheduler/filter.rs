//! Filter plugins: predicates and taint toleration.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ocm_cel::Env;
use ocm_core::cluster::{ManagedCluster, Taint, TaintEffect};
use ocm_core::placement::{Placement, Toleration, TolerationOperator};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cel::{CelOptions, CelSelector, Validation};
use crate::projection::effect_name;
use crate::scheduler::ScheduleError;
use crate::selector::ClusterSelector;

pub const PREDICATE: &str = "predicate";
pub const TAINT_TOLERATION: &str = "tainttoleration";

struct CompiledPredicate {
    selector: ClusterSelector,
    cel: CelSelector,
}

/// `requiredClusterSelector`s of a placement, ORed. Each one is label, then claim, then CEL.
pub(crate) struct PredicateFilter {
    predicates: Vec<CompiledPredicate>,
    budget: i64,
}

impl PredicateFilter {
    pub(crate) fn new(placement: &Placement, env: &Arc<Env>, options: CelOptions) -> Result<Self, ScheduleError> {
        let mut predicates = Vec::with_capacity(placement.spec.predicates.len());
        for p in &placement.spec.predicates {
            let spec = &p.required_cluster_selector;
            let selector = ClusterSelector::label_claim(spec).map_err(|e| ScheduleError::Misconfigured(e.to_string()))?;
            let mut cel = CelSelector::new(Arc::clone(env), &spec.cel_selector.cel_expressions, options);
            cel.compile();
            if let Some(bad) = cel.first_error() {
                return Err(ScheduleError::Misconfigured(format!("{}: {}", bad.expression, bad.error().unwrap_or_default())));
            }
            predicates.push(CompiledPredicate { selector, cel });
        }
        Ok(Self { predicates, budget: options.cost_budget })
    }

    /// Remaining CEL budget of this pass.
    pub(crate) fn budget(&self) -> i64 { self.budget }

    /// `None` when the cluster passes, otherwise the reason it was filtered.
    pub(crate) fn check(&mut self, cancel: &CancellationToken, cluster: &ManagedCluster) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        let labels = cluster.metadata.labels.clone().unwrap_or_default();
        let claims = cluster.claims();
        for p in &self.predicates {
            if !p.selector.matches(&labels, &claims) {
                continue;
            }
            if p.cel.is_empty() {
                return None;
            }
            let v = p.cel.validate(cancel, cluster, self.budget);
            self.budget = v.remaining_budget();
            match v {
                Validation::Matched { .. } => return None,
                Validation::BudgetExceeded | Validation::AccountingFailure => return Some("cel cost budget exceeded".to_string()),
                Validation::Rejected { .. } => {}
            }
        }
        Some("no cluster selector matched".to_string())
    }
}

pub(crate) enum TaintCheck {
    Tolerated { requeue_after: Option<Duration> },
    Rejected(String),
}

fn tolerates(tol: &Toleration, taint: &Taint) -> bool {
    let key_ok = match tol.operator {
        TolerationOperator::Exists if tol.key.is_empty() => true,
        _ => tol.key == taint.key,
    };
    let effect_ok = tol.effect.map(|e| e == taint.effect).unwrap_or(true);
    let value_ok = match tol.operator {
        TolerationOperator::Exists => true,
        TolerationOperator::Equal => tol.value == taint.value,
    };
    key_ok && effect_ok && value_ok
}

/// `NoSelect` taints must always be tolerated, `NoSelectIfNew` only for clusters not yet
/// decided; `PreferNoSelect` never filters. A toleration with `tolerationSeconds` expires
/// that long after the taint was added.
pub(crate) fn check_taints(cluster: &ManagedCluster, tolerations: &[Toleration], decided: bool, now: DateTime<Utc>) -> TaintCheck {
    let mut requeue_after: Option<Duration> = None;
    for taint in &cluster.spec.taints {
        match taint.effect {
            TaintEffect::PreferNoSelect => continue,
            TaintEffect::NoSelectIfNew if decided => continue,
            _ => {}
        }
        let matching: Vec<&Toleration> = tolerations.iter().filter(|t| tolerates(t, taint)).collect();
        if matching.is_empty() {
            return TaintCheck::Rejected(format!("taint {}={}:{} is not tolerated", taint.key, taint.value, effect_name(taint.effect)));
        }
        if matching.iter().any(|t| t.toleration_seconds.is_none()) {
            continue;
        }
        let added = taint.time_added.as_ref().map(|t| t.0).unwrap_or(now);
        let expiry = matching
            .iter()
            .filter_map(|t| t.toleration_seconds)
            .map(|s| added + chrono::Duration::seconds(s))
            .max()
            .unwrap_or(added);
        if expiry <= now {
            return TaintCheck::Rejected(format!("toleration of taint {} expired", taint.key));
        }
        let left = (expiry - now).to_std().unwrap_or_default();
        debug!(cluster = ?cluster.metadata.name, taint = %taint.key, left = ?left, "taint tolerated temporarily");
        requeue_after = Some(requeue_after.map_or(left, |r| r.min(left)));
    }
    TaintCheck::Tolerated { requeue_after }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use ocm_core::cluster::ManagedClusterSpec;

    fn tainted(effect: TaintEffect, added: Option<DateTime<Utc>>) -> ManagedCluster {
        ManagedCluster::new(
            "c1",
            ManagedClusterSpec {
                taints: vec![Taint { key: "maintenance".into(), value: "true".into(), effect, time_added: added.map(Time) }],
                ..Default::default()
            },
        )
    }

    fn tol(op: TolerationOperator, key: &str, value: &str, secs: Option<i64>) -> Toleration {
        Toleration { key: key.into(), operator: op, value: value.into(), effect: None, toleration_seconds: secs }
    }

    #[test]
    fn no_select_requires_toleration() {
        let now = Utc::now();
        let c = tainted(TaintEffect::NoSelect, None);
        assert!(matches!(check_taints(&c, &[], false, now), TaintCheck::Rejected(_)));
        assert!(matches!(check_taints(&c, &[tol(TolerationOperator::Equal, "maintenance", "true", None)], false, now), TaintCheck::Tolerated { requeue_after: None }));
        assert!(matches!(check_taints(&c, &[tol(TolerationOperator::Equal, "maintenance", "false", None)], false, now), TaintCheck::Rejected(_)));
        assert!(matches!(check_taints(&c, &[tol(TolerationOperator::Exists, "", "", None)], false, now), TaintCheck::Tolerated { .. }));
    }

    #[test]
    fn select_if_new_spares_decided_clusters() {
        let now = Utc::now();
        let c = tainted(TaintEffect::NoSelectIfNew, None);
        assert!(matches!(check_taints(&c, &[], true, now), TaintCheck::Tolerated { .. }));
        assert!(matches!(check_taints(&c, &[], false, now), TaintCheck::Rejected(_)));
        let soft = tainted(TaintEffect::PreferNoSelect, None);
        assert!(matches!(check_taints(&soft, &[], false, now), TaintCheck::Tolerated { .. }));
    }

    #[test]
    fn toleration_seconds_expire() {
        let now = Utc::now();
        let c = tainted(TaintEffect::NoSelect, Some(now - chrono::Duration::seconds(30)));
        let short = [tol(TolerationOperator::Exists, "maintenance", "", Some(10))];
        assert!(matches!(check_taints(&c, &short, false, now), TaintCheck::Rejected(_)));
        let long = [tol(TolerationOperator::Exists, "maintenance", "", Some(60))];
        match check_taints(&c, &long, false, now) {
            TaintCheck::Tolerated { requeue_after: Some(d) } => assert_eq!(d.as_secs(), 30),
            _ => panic!("expected temporary toleration"),
        }
    }
}
