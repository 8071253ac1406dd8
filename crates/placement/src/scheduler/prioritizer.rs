//! Prioritizer plugins. Each scores clusters in [-100, 100]; the scheduler sums weighted scores.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ocm_core::cluster::ManagedCluster;
use ocm_core::labels;
use ocm_core::placement::{Placement, PrioritizerPolicyMode, ScoreCoordinateType};

use crate::cel::score_is_fresh;
use crate::scheduler::ScheduleError;
use crate::Listers;

pub const MAX_SCORE: i64 = 100;
pub const MIN_SCORE: i64 = -100;

pub const BALANCE: &str = "Balance";
pub const STEADY: &str = "Steady";
pub const RESOURCE_ALLOCATABLE_CPU: &str = "ResourceAllocatableCPU";
pub const RESOURCE_ALLOCATABLE_MEMORY: &str = "ResourceAllocatableMemory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Prioritizer {
    Balance,
    Steady,
    Allocatable(&'static str),
    AddOn { resource: String, score: String },
}

impl Prioritizer {
    fn built_in(name: &str) -> Option<Self> {
        match name {
            BALANCE => Some(Prioritizer::Balance),
            STEADY => Some(Prioritizer::Steady),
            RESOURCE_ALLOCATABLE_CPU => Some(Prioritizer::Allocatable("cpu")),
            RESOURCE_ALLOCATABLE_MEMORY => Some(Prioritizer::Allocatable("memory")),
            _ => None,
        }
    }
}

/// Weighted prioritizers keyed by coordinate (`Balance`, `AddOn/<resource>/<score>`).
/// `Additive` starts from Balance and Steady at weight 1; weight 0 disables a prioritizer.
pub(crate) fn resolve(placement: &Placement) -> Result<BTreeMap<String, (Prioritizer, i64)>, ScheduleError> {
    let policy = &placement.spec.prioritizer_policy;
    let mut out = BTreeMap::new();
    if policy.mode == PrioritizerPolicyMode::Additive {
        out.insert(BALANCE.to_string(), (Prioritizer::Balance, 1));
        out.insert(STEADY.to_string(), (Prioritizer::Steady, 1));
    }
    for cfg in &policy.configurations {
        let coord = &cfg.score_coordinate;
        let (key, p) = match coord.type_ {
            ScoreCoordinateType::BuiltIn => {
                let name = coord.built_in.clone().unwrap_or_default();
                let p = Prioritizer::built_in(&name).ok_or_else(|| ScheduleError::Misconfigured(format!("unknown built-in prioritizer {:?}", name)))?;
                (name, p)
            }
            ScoreCoordinateType::AddOn => {
                let a = coord
                    .add_on
                    .as_ref()
                    .ok_or_else(|| ScheduleError::Misconfigured("AddOn score coordinate requires addOn".to_string()))?;
                (format!("AddOn/{}/{}", a.resource_name, a.score_name), Prioritizer::AddOn { resource: a.resource_name.clone(), score: a.score_name.clone() })
            }
        };
        out.insert(key, (p, i64::from(cfg.weight)));
    }
    out.retain(|_, (_, w)| *w != 0);
    Ok(out)
}

pub(crate) struct ScoreContext<'a> {
    pub listers: &'a Listers,
    pub placement: &'a Placement,
    pub decided: &'a BTreeSet<String>,
}

pub(crate) fn score(p: &Prioritizer, ctx: &ScoreContext<'_>, clusters: &[Arc<ManagedCluster>]) -> BTreeMap<String, i64> {
    match p {
        Prioritizer::Balance => balance(ctx, clusters),
        Prioritizer::Steady => clusters.iter().map(|c| (name(c), if ctx.decided.contains(&name(c)) { MAX_SCORE } else { 0 })).collect(),
        Prioritizer::Allocatable(resource) => allocatable(resource, clusters),
        Prioritizer::AddOn { resource, score } => clusters.iter().map(|c| (name(c), addon_score(ctx, &name(c), resource, score))).collect(),
    }
}

fn name(c: &ManagedCluster) -> String { c.metadata.name.clone().unwrap_or_default() }

/// Fewer decisions from other placements scores higher; the busiest cluster scores -100.
fn balance(ctx: &ScoreContext<'_>, clusters: &[Arc<ManagedCluster>]) -> BTreeMap<String, i64> {
    let own_ns = ctx.placement.metadata.namespace.as_deref();
    let own_name = ctx.placement.metadata.name.as_deref();
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for d in ctx.listers.decisions.list() {
        let owner = d.metadata.labels.as_ref().and_then(|l| l.get(labels::PLACEMENT)).map(String::as_str);
        if d.metadata.namespace.as_deref() == own_ns && owner == own_name {
            continue;
        }
        for c in d.status.iter().flat_map(|s| s.decisions.iter()) {
            *counts.entry(c.cluster_name.clone()).or_default() += 1;
        }
    }
    let max = counts.values().copied().max().unwrap_or(0);
    clusters
        .iter()
        .map(|c| {
            let n = name(c);
            let count = counts.get(&n).copied().unwrap_or(0);
            let s = if max == 0 { MAX_SCORE } else { MAX_SCORE - 2 * MAX_SCORE * count / max };
            (n, s)
        })
        .collect()
}

/// More allocatable scores higher, normalised between the least and most allocatable cluster.
fn allocatable(resource: &str, clusters: &[Arc<ManagedCluster>]) -> BTreeMap<String, i64> {
    let values: BTreeMap<String, f64> = clusters
        .iter()
        .filter_map(|c| {
            let q = c.status.as_ref()?.allocatable.get(resource)?;
            Some((name(c), parse_quantity(&q.0)?))
        })
        .collect();
    let min = values.values().copied().fold(f64::INFINITY, f64::min);
    let max = values.values().copied().fold(f64::NEG_INFINITY, f64::max);
    clusters
        .iter()
        .map(|c| {
            let n = name(c);
            let s = match values.get(&n) {
                None => MIN_SCORE,
                Some(_) if max <= min => MAX_SCORE,
                Some(v) => ((v - min) / (max - min) * (2 * MAX_SCORE) as f64) as i64 + MIN_SCORE,
            };
            (n, s)
        })
        .collect()
}

fn addon_score(ctx: &ScoreContext<'_>, cluster: &str, resource: &str, score: &str) -> i64 {
    let Ok(obj) = ctx.listers.scores.get(Some(cluster), resource) else { return 0 };
    if !score_is_fresh(&obj) {
        return 0;
    }
    obj.status
        .iter()
        .flat_map(|s| s.scores.iter())
        .find(|s| s.name == score)
        .map(|s| i64::from(s.value).clamp(MIN_SCORE, MAX_SCORE))
        .unwrap_or(0)
}

/// Parse a Kubernetes quantity (`500m`, `4`, `8Gi`, `1.5e3`) into its numeric value.
pub fn parse_quantity(s: &str) -> Option<f64> {
    let s = s.trim();
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+')).unwrap_or(s.len());
    let (num, suffix) = s.split_at(split);
    let base: f64 = num.parse().ok()?;
    let mult = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with(['e', 'E']) => 10f64.powi(exp[1..].parse::<i32>().ok()?),
        _ => return None,
    };
    Some(base * mult)
}
