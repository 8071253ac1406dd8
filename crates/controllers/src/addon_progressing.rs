//! Add-on install progression: summarizes per-cluster rollout of a ClusterManagementAddOn
//! for each placement it installs through.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use ocm_apply::{patch_status_if_changed, Writer};
use ocm_core::addon::*;
use ocm_core::conditions::{find_condition, new_condition, set_condition, TRUE};
use ocm_core::placement::PlacementDecision;
use ocm_placement::DecisionClustersTracker;
use tracing::debug;

use crate::{error_policy, index, log_result, Context, Error};

/// Rollout counts of one placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutCounts {
    /// Clusters the placement decided.
    pub total: usize,
    /// Decided clusters that have the add-on.
    pub effective: usize,
    pub progressing: usize,
    pub done: usize,
    pub failed: usize,
    pub timeout: usize,
}

impl RolloutCounts {
    fn observe(&mut self, addon: &ManagedClusterAddOn) {
        self.effective += 1;
        let conditions = addon.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default();
        let Some(c) = find_condition(conditions, CONDITION_PROGRESSING) else { return };
        match c.reason.as_str() {
            REASON_PROGRESSING if c.status == TRUE => self.progressing += 1,
            REASON_COMPLETED => self.done += 1,
            REASON_FAILED => self.failed += 1,
            REASON_TIMEOUT => self.timeout += 1,
            _ => {}
        }
    }

    fn is_complete(&self) -> bool { !(self.effective == 0 && self.done == 0) && self.done == self.effective }
}

/// Set the `Progressing` condition; on completion promote desired configs to last applied
/// and last known good.
pub fn set_progression(progression: &mut InstallProgression, c: &RolloutCounts) {
    let condition = if c.is_complete() {
        for r in progression.config_references.iter_mut() {
            r.last_applied_config = r.desired_config.clone();
            r.last_known_good_config = r.desired_config.clone();
        }
        new_condition(
            CONDITION_PROGRESSING,
            false,
            REASON_COMPLETED,
            format!("Clusters: {} selected, {} effective. Status: {} completed, {} failed, {} timeout.", c.total, c.effective, c.done, c.failed, c.timeout),
        )
    } else {
        new_condition(
            CONDITION_PROGRESSING,
            true,
            REASON_PROGRESSING,
            format!(
                "Clusters: {} selected, {} effective. Status: {} progressing, {} completed, {} failed, {} timeout.",
                c.total, c.effective, c.progressing, c.done, c.failed, c.timeout
            ),
        )
    };
    set_condition(&mut progression.conditions, condition);
}

fn count<W>(ctx: &Context<W>, addon: &str, placement: &PlacementRef) -> Result<RolloutCounts, Error> {
    let mut tracker = DecisionClustersTracker::new(Arc::clone(&ctx.listers.scheduling.decisions), &placement.namespace, &placement.name);
    tracker.refresh()?;
    let clusters = tracker.existing().clusters();
    let mut counts = RolloutCounts { total: clusters.len(), ..Default::default() };
    for cluster in &clusters {
        if let Ok(mca) = ctx.listers.addons.get(Some(cluster), addon) {
            counts.observe(&mca);
        }
    }
    Ok(counts)
}

pub async fn reconcile<W: Writer>(cma: Arc<ClusterManagementAddOn>, ctx: Arc<Context<W>>) -> Result<Action, Error> {
    let name = cma.name_any();
    let old = cma.status.clone().unwrap_or_default();
    let mut status = old.clone();
    for progression in status.install_progressions.iter_mut() {
        let p = &progression.placement;
        if ctx.listers.placements.get(Some(&p.namespace), &p.name).is_err() {
            debug!(addon = %name, placement = %p.name, namespace = %p.namespace, "placement not found");
            continue;
        }
        let counts = count(&ctx, &name, p)?;
        set_progression(progression, &counts);
    }
    patch_status_if_changed(&ctx.writer, cma.as_ref(), &status, &old).await?;
    Ok(Action::await_change())
}

pub fn controller<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) -> BoxFuture<'static, ()> {
    let listers = ctx.listers.clone();
    Controller::new(Api::<ClusterManagementAddOn>::all(client.clone()), watcher::Config::default())
        .watches(Api::<ManagedClusterAddOn>::all(client.clone()), watcher::Config::default(), |a| index::addon_for_managed_addon(&a))
        .watches(Api::<PlacementDecision>::all(client), watcher::Config::default(), move |d| index::addons_for_decision(&listers, &d))
        .with_config(controller::Config::default().concurrency(ctx.config.workers))
        .shutdown_on_signal()
        .run(reconcile::<W>, error_policy::<ClusterManagementAddOn, W>, ctx)
        .for_each(log_result)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_effective_is_never_complete() {
        assert!(!RolloutCounts::default().is_complete());
        assert!(!RolloutCounts { total: 2, effective: 2, done: 1, ..Default::default() }.is_complete());
        assert!(RolloutCounts { total: 3, effective: 2, done: 2, ..Default::default() }.is_complete());
    }

    #[test]
    fn failed_and_timed_out_are_counted() {
        let mut c = RolloutCounts::default();
        for (status, reason) in [(false, REASON_FAILED), (false, REASON_TIMEOUT), (false, REASON_PROGRESSING), (true, "Unknown")] {
            let mut a = ManagedClusterAddOn::new("a", ManagedClusterAddOnSpec::default());
            a.status = Some(ManagedClusterAddOnStatus { conditions: vec![new_condition(CONDITION_PROGRESSING, status, reason, "")] });
            c.observe(&a);
        }
        c.observe(&ManagedClusterAddOn::new("a", ManagedClusterAddOnSpec::default()));
        assert_eq!(c, RolloutCounts { total: 0, effective: 5, progressing: 0, done: 0, failed: 1, timeout: 1 });
    }
}
