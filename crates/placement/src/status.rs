//! Placement status conditions.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use ocm_core::conditions::new_condition;
use ocm_core::placement::*;

use crate::candidates::Candidates;
use crate::scheduler::ScheduleResult;

/// `PlacementSatisfied` for a finished pass, explaining the first reason nothing or not
/// enough was selected.
pub fn satisfied_condition(candidates: &Candidates, result: &ScheduleResult) -> Condition {
    let (ok, reason, message) = if candidates.bound_sets.is_empty() {
        (false, REASON_NO_BINDINGS, "None of ManagedClusterSets is bound to placement namespace".to_string())
    } else if candidates.eligible_sets.is_empty() {
        (false, REASON_NO_INTERSECTION, format!("None of ManagedClusterSets [{}] is bound to placement namespace", candidates.bound_sets.join(", ")))
    } else if candidates.clusters.is_empty() {
        (false, REASON_ALL_SETS_EMPTY, format!("All ManagedClusterSets [{}] have no member ManagedCluster", candidates.eligible_sets.join(", ")))
    } else if result.decided.is_empty() {
        (false, REASON_NO_CLUSTER_MATCHED, "No valid ManagedCluster matches the placement requirements".to_string())
    } else if result.unscheduled > 0 {
        (false, REASON_NOT_ALL_DECISIONS_SCHEDULED, format!("{} cluster decisions unscheduled", result.unscheduled))
    } else {
        (true, REASON_ALL_DECISIONS_SCHEDULED, "All cluster decisions scheduled".to_string())
    };
    new_condition(CONDITION_SATISFIED, ok, reason, message)
}

/// `PlacementMisconfigured`: `True` with the first blocking error, `False` otherwise.
pub fn misconfigured_condition(error: Option<&str>) -> Condition {
    match error {
        Some(e) => new_condition(CONDITION_MISCONFIGURED, true, REASON_MISCONFIGURED, e),
        None => new_condition(CONDITION_MISCONFIGURED, false, REASON_SUCCEED_CONFIGURED, "Placement configurations check pass"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocm_core::conditions::{FALSE, TRUE};

    fn result(decided: &[&str], unscheduled: i32) -> ScheduleResult {
        ScheduleResult { decided: decided.iter().map(|s| s.to_string()).collect(), unscheduled, ..Default::default() }
    }

    #[test]
    fn reasons_follow_the_pipeline() {
        let mut c = Candidates::default();
        assert_eq!(satisfied_condition(&c, &result(&[], 0)).reason, REASON_NO_BINDINGS);
        c.bound_sets = vec!["global".into()];
        assert_eq!(satisfied_condition(&c, &result(&[], 0)).reason, REASON_NO_INTERSECTION);
        c.eligible_sets = vec!["global".into()];
        assert_eq!(satisfied_condition(&c, &result(&[], 0)).reason, REASON_ALL_SETS_EMPTY);
        c.clusters = vec![std::sync::Arc::new(ocm_core::cluster::ManagedCluster::new("c1", Default::default()))];
        assert_eq!(satisfied_condition(&c, &result(&[], 0)).reason, REASON_NO_CLUSTER_MATCHED);
        assert_eq!(satisfied_condition(&c, &result(&["c1"], 2)).reason, REASON_NOT_ALL_DECISIONS_SCHEDULED);
        let ok = satisfied_condition(&c, &result(&["c1"], 0));
        assert_eq!((ok.status.as_str(), ok.reason.as_str()), (TRUE, REASON_ALL_DECISIONS_SCHEDULED));
    }

    #[test]
    fn misconfigured() {
        let c = misconfigured_condition(Some("bad expression"));
        assert_eq!((c.status.as_str(), c.reason.as_str(), c.message.as_str()), (TRUE, REASON_MISCONFIGURED, "bad expression"));
        assert_eq!(misconfigured_condition(None).status, FALSE);
    }
}
