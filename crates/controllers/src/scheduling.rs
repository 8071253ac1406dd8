//! Scheduling controller: runs one scheduling pass per Placement, writes its
//! PlacementDecisions and summarizes the outcome in the Placement status.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use ocm_apply::{create_or_update, key_of, patch_status_if_changed, Applied, Writer};
use ocm_core::conditions::set_condition;
use ocm_core::labels;
use ocm_core::prelude::*;
use ocm_placement::status::{misconfigured_condition, satisfied_condition};
use ocm_placement::{build_decisions, metrics, plan_groups, Candidates, PlannedGroup, ScheduleError, ScheduleResult};
use tracing::{debug, info, warn};

use crate::{error_policy, index, log_result, Context, Error};

fn plan<W>(ctx: &Context<W>, placement: &Placement, candidates: &Candidates) -> Result<(ScheduleResult, Vec<PlannedGroup>), ScheduleError> {
    let result = ctx.scheduler.schedule(&ctx.cancel, placement, &candidates.clusters)?;
    let by_name: BTreeMap<&str, &ManagedCluster> =
        candidates.clusters.iter().map(|c| (c.metadata.name.as_deref().unwrap_or_default(), c.as_ref())).collect();
    let groups = plan_groups(placement, &result.decided, &by_name)?;
    Ok((result, groups))
}

/// Run [`plan`] on the blocking pool; filtering, scoring and CEL evaluation are CPU-bound.
async fn plan_blocking<W: Writer + 'static>(
    ctx: &Arc<Context<W>>,
    placement: &Arc<Placement>,
    candidates: Candidates,
) -> Result<(Candidates, Result<(ScheduleResult, Vec<PlannedGroup>), ScheduleError>), Error> {
    let (ctx, placement) = (Arc::clone(ctx), Arc::clone(placement));
    let out = tokio::task::spawn_blocking(move || {
        let planned = plan(&ctx, &placement, &candidates);
        (candidates, planned)
    })
    .await?;
    Ok(out)
}

pub async fn reconcile<W: Writer + 'static>(placement: Arc<Placement>, ctx: Arc<Context<W>>) -> Result<Action, Error> {
    let key = key_of(placement.as_ref());
    if placement.metadata.deletion_timestamp.is_some() {
        debug!(placement = %key, "placement is being deleted");
        return Ok(Action::await_change());
    }

    let old = placement.status.clone().unwrap_or_default();
    let mut status = old.clone();
    let candidates = ctx.scheduler.candidates(&placement)?;
    let (candidates, planned) = plan_blocking(&ctx, &placement, candidates).await?;
    let (result, groups) = match planned {
        Ok(planned) => planned,
        Err(ScheduleError::Misconfigured(msg)) => {
            metrics::misconfigured();
            warn!(placement = %key, error = %msg, "placement misconfigured");
            set_condition(&mut status.conditions, misconfigured_condition(Some(&msg)));
            patch_status_if_changed(&ctx.writer, placement.as_ref(), &status, &old).await?;
            // Terminal until the placement changes.
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    let (decisions, group_status) = build_decisions(&placement, &groups);
    let written = persist_decisions(&ctx, &placement, decisions).await?;
    if written > 0 {
        metrics::decisions_updated(written);
        info!(placement = %key, writes = written, "decisions updated");
    }

    status.number_of_selected_clusters = result.decided.len() as i32;
    status.decision_groups = group_status;
    set_condition(&mut status.conditions, satisfied_condition(&candidates, &result));
    set_condition(&mut status.conditions, misconfigured_condition(None));
    patch_status_if_changed(&ctx.writer, placement.as_ref(), &status, &old).await?;

    Ok(result.requeue_after.map_or_else(Action::await_change, Action::requeue))
}

/// Create or update `desired`, then delete this placement's decisions that are no longer
/// desired. Returns the number of writes.
pub async fn persist_decisions<W: Writer>(ctx: &Context<W>, placement: &Placement, desired: Vec<PlacementDecision>) -> Result<u64, Error> {
    let ns = placement.namespace().unwrap_or_default();
    let name = placement.name_any();
    let existing: BTreeMap<String, Arc<PlacementDecision>> = ctx
        .listers
        .scheduling
        .decisions
        .list_namespaced(&ns)
        .into_iter()
        .filter(|d| d.labels().get(labels::PLACEMENT) == Some(&name))
        .map(|d| (d.name_any(), d))
        .collect();
    let keep: BTreeSet<String> = desired.iter().map(|d| d.name_any()).collect();

    let mut writes = 0u64;
    for d in desired {
        let cur = existing.get(&d.name_any()).map(|d| d.as_ref());
        let new_status = d.status.clone();
        let old_status = cur.and_then(|c| c.status.clone());
        let (applied, obj) = create_or_update(&ctx.writer, cur, d, |a, b| a.metadata.labels != b.metadata.labels).await?;
        if applied != Applied::Unchanged {
            writes += 1;
        }
        if patch_status_if_changed(&ctx.writer, &obj, &new_status, &old_status).await? {
            writes += 1;
        }
    }
    for stale in existing.keys().filter(|n| !keep.contains(*n)) {
        match ctx.writer.delete::<PlacementDecision>(Some(&ns), stale).await {
            Ok(()) => writes += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        debug!(placement = %key_of(placement), decision = %stale, "stale decision deleted");
    }
    Ok(writes)
}

pub fn controller<W: Writer + 'static>(client: Client, ctx: Arc<Context<W>>) -> BoxFuture<'static, ()> {
    let listers = ctx.listers.clone();
    let (l1, l2, l3, l4) = (listers.clone(), listers.clone(), listers.clone(), listers);
    Controller::new(Api::<Placement>::all(client.clone()), watcher::Config::default())
        .watches(Api::<ManagedCluster>::all(client.clone()), watcher::Config::default(), move |c| index::placements_for_cluster(&l1, &c))
        .watches(Api::<ManagedClusterSet>::all(client.clone()), watcher::Config::default(), move |s| index::placements_for_cluster_set(&l2, &s))
        .watches(Api::<ManagedClusterSetBinding>::all(client.clone()), watcher::Config::default(), move |b| index::placements_for_binding(&l3, &b))
        .watches(Api::<AddOnPlacementScore>::all(client.clone()), watcher::Config::default(), move |s| index::placements_for_score(&l4, &s))
        .watches(Api::<PlacementDecision>::all(client), watcher::Config::default(), |d| index::placement_for_decision(&d))
        .with_config(controller::Config::default().concurrency(ctx.config.workers))
        .shutdown_on_signal()
        .run(reconcile::<W>, error_policy::<Placement, W>, ctx)
        .for_each(log_result)
        .boxed()
}
