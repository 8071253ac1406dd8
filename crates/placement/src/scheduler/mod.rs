//! One scheduling pass: filter, score, spread, truncate.

mod filter;
mod prioritizer;
mod spread;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ocm_cel::Env;
use ocm_core::cluster::ManagedCluster;
use ocm_core::placement::Placement;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::candidates::{self, Candidates};
use crate::cel::CelOptions;
use crate::metrics;
use crate::selector::SelectorError;
use crate::tracker::{DecisionClustersTracker, TrackerError};
use crate::Listers;

pub use filter::{PREDICATE, TAINT_TOLERATION};
pub use prioritizer::{parse_quantity, BALANCE, MAX_SCORE, MIN_SCORE, RESOURCE_ALLOCATABLE_CPU, RESOURCE_ALLOCATABLE_MEMORY, STEADY};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Terminal for the current placement generation.
    #[error("placement is misconfigured: {0}")]
    Misconfigured(String),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("scheduling cancelled")]
    Cancelled,
}

impl ScheduleError {
    pub fn is_misconfigured(&self) -> bool { matches!(self, ScheduleError::Misconfigured(_)) }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerConfig {
    pub cel: CelOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredCluster {
    pub name: String,
    /// Weighted sum over all prioritizers.
    pub score: i64,
    /// Raw score per prioritizer coordinate.
    pub details: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterRecord {
    pub plugin: &'static str,
    pub cluster: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleResult {
    /// Feasible clusters, best first; ties broken by name.
    pub scored: Vec<ScoredCluster>,
    pub filtered: Vec<FilterRecord>,
    /// Selected clusters in selection order.
    pub decided: Vec<String>,
    /// `numberOfClusters` minus the clusters actually selected, never negative.
    pub unscheduled: i32,
    /// Earliest expiry of a temporary taint toleration.
    pub requeue_after: Option<Duration>,
    /// CEL budget left after the pass.
    pub remaining_budget: i64,
}

pub struct Scheduler {
    env: Arc<Env>,
    config: SchedulerConfig,
    listers: Listers,
}

impl Scheduler {
    pub fn new(env: Arc<Env>, config: SchedulerConfig, listers: Listers) -> Self { Self { env, config, listers } }

    pub fn listers(&self) -> &Listers { &self.listers }

    pub fn candidates(&self, placement: &Placement) -> Result<Candidates, SelectorError> { candidates::resolve(placement, &self.listers) }

    pub fn schedule(&self, cancel: &CancellationToken, placement: &Placement, clusters: &[Arc<ManagedCluster>]) -> Result<ScheduleResult, ScheduleError> {
        self.schedule_at(cancel, placement, clusters, Utc::now())
    }

    /// Same inputs and `now` always produce the same result.
    pub fn schedule_at(
        &self,
        cancel: &CancellationToken,
        placement: &Placement,
        clusters: &[Arc<ManagedCluster>],
        now: DateTime<Utc>,
    ) -> Result<ScheduleResult, ScheduleError> {
        let started = Instant::now();
        let ns = placement.metadata.namespace.as_deref().unwrap_or_default();
        let name = placement.metadata.name.as_deref().unwrap_or_default();

        let mut tracker = DecisionClustersTracker::new(Arc::clone(&self.listers.decisions), ns, name);
        tracker.refresh()?;
        let decided: BTreeSet<String> = tracker.existing().clusters();

        let mut predicates = filter::PredicateFilter::new(placement, &self.env, self.config.cel)?;
        let weights = prioritizer::resolve(placement)?;

        let mut sorted: Vec<Arc<ManagedCluster>> = clusters.to_vec();
        sorted.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

        let mut result = ScheduleResult::default();
        let mut feasible: Vec<Arc<ManagedCluster>> = Vec::with_capacity(sorted.len());
        for c in sorted {
            if cancel.is_cancelled() {
                return Err(ScheduleError::Cancelled);
            }
            let cname = c.metadata.name.clone().unwrap_or_default();
            if let Some(reason) = predicates.check(cancel, &c) {
                result.filtered.push(FilterRecord { plugin: PREDICATE, cluster: cname, reason });
                continue;
            }
            match filter::check_taints(&c, &placement.spec.tolerations, decided.contains(&cname), now) {
                filter::TaintCheck::Rejected(reason) => result.filtered.push(FilterRecord { plugin: TAINT_TOLERATION, cluster: cname, reason }),
                filter::TaintCheck::Tolerated { requeue_after } => {
                    if let Some(d) = requeue_after {
                        result.requeue_after = Some(result.requeue_after.map_or(d, |r| r.min(d)));
                    }
                    feasible.push(c);
                }
            }
        }
        result.remaining_budget = predicates.budget();

        let ctx = prioritizer::ScoreContext { listers: &self.listers, placement, decided: &decided };
        let mut scored: Vec<ScoredCluster> = feasible
            .iter()
            .map(|c| ScoredCluster { name: c.metadata.name.clone().unwrap_or_default(), score: 0, details: BTreeMap::new() })
            .collect();
        for (key, (p, weight)) in &weights {
            let scores = prioritizer::score(p, &ctx, &feasible);
            for s in scored.iter_mut() {
                let v = scores.get(&s.name).copied().unwrap_or(0);
                s.details.insert(key.clone(), v);
                s.score += v * weight;
            }
        }
        scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

        let limit = placement.spec.number_of_clusters.map(|n| n.max(0) as usize);
        let by_name: BTreeMap<&str, &ManagedCluster> = feasible.iter().map(|c| (c.metadata.name.as_deref().unwrap_or_default(), c.as_ref())).collect();
        result.decided = spread::select(&placement.spec.spread_policy.spread_constraints, &scored, &by_name, limit);
        result.unscheduled = limit.map(|n| n.saturating_sub(result.decided.len()) as i32).unwrap_or(0);
        result.scored = scored;

        let elapsed = started.elapsed();
        metrics::observe_scheduling_duration(elapsed);
        info!(
            placement = %ns_name(ns, name),
            candidates = clusters.len(),
            filtered = result.filtered.len(),
            decided = result.decided.len(),
            unscheduled = result.unscheduled,
            ms = elapsed.as_millis() as u64,
            "scheduled"
        );
        for f in &result.filtered {
            debug!(placement = %ns_name(ns, name), plugin = f.plugin, cluster = %f.cluster, reason = %f.reason, "filtered");
        }
        Ok(result)
    }
}

fn ns_name(ns: &str, name: &str) -> String { ocm_core::object_key(Some(ns), name) }
