//! CEL predicates over managed clusters: environments, the managed-cluster library, and the
//! budgeted [`CelSelector`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ocm_cel::cost::{LIST_CREATE_BASE_COST, MAP_CREATE_BASE_COST, SELECT_AND_IDENT_COST};
use ocm_cel::library::{json::Json, regex::Regex, strings::Strings};
use ocm_cel::{
    ActualCostEstimator, Activation, Env, EnvError, EvalError, Function, Key, Library, Overload, Program, ProgramOptions, Type, Value,
};
use ocm_core::cluster::{AddOnPlacementScore, ManagedCluster};
use ocm_store::Lister;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::projection;

/// Variable bound to the projected cluster in the cluster environment.
pub const MANAGED_CLUSTER: &str = "managedCluster";
pub const LABELS: &str = "labels";
pub const CLAIMS: &str = "claims";

/// Limits applied to every placement CEL program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CelOptions {
    /// Budget shared by all expressions of one scheduling pass.
    pub cost_budget: i64,
    /// Hard ceiling for a single expression evaluation.
    pub per_call_limit: u64,
    /// Comprehension iterations between interrupt checks.
    pub check_frequency: u32,
}

impl Default for CelOptions {
    fn default() -> Self { Self { cost_budget: 10_000_000, per_call_limit: 1_000_000, check_frequency: 100 } }
}

impl CelOptions {
    pub fn program_options(&self) -> ProgramOptions {
        ProgramOptions { cost_limit: Some(self.per_call_limit), track_cost: true, interrupt_check_frequency: self.check_frequency }
    }
}

/// `managedCluster.score(crName, scoreName)` and `managedCluster.scores(crName)`, resolved
/// against AddOnPlacementScores in the cluster's namespace.
pub struct ManagedClusterLibrary {
    scores: Arc<dyn Lister<AddOnPlacementScore>>,
}

impl ManagedClusterLibrary {
    pub fn new(scores: Arc<dyn Lister<AddOnPlacementScore>>) -> Self { Self { scores } }
}

struct ScoresCost;

impl ActualCostEstimator for ScoresCost {
    fn call_cost(&self, function: &str, _overload_id: &str, _args: &[Value], result: Option<&Value>) -> Option<u64> {
        if function != "scores" {
            return None;
        }
        let size = result.map(Value::actual_size).unwrap_or(0);
        Some(LIST_CREATE_BASE_COST + size * (SELECT_AND_IDENT_COST + MAP_CREATE_BASE_COST))
    }
}

fn cluster_name(v: &Value) -> Result<String, EvalError> {
    let Value::Map(m) = v else { return Err(EvalError::function("score() receiver must be a managed cluster")) };
    Value::lookup(m, &Key::from("metadata"))
        .and_then(|md| match md {
            Value::Map(md) => Value::lookup(md, &Key::from("name")),
            _ => None,
        })
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EvalError::function("managed cluster has no metadata.name"))
}

fn string_arg<'a>(args: &'a [Value], i: usize, func: &str) -> Result<&'a str, EvalError> {
    args.get(i).and_then(Value::as_str).ok_or_else(|| EvalError::NoSuchOverload(func.to_string()))
}

fn load_score(scores: &dyn Lister<AddOnPlacementScore>, cluster: &str, cr: &str) -> Result<Arc<AddOnPlacementScore>, EvalError> {
    let obj = scores
        .get(Some(cluster), cr)
        .map_err(|e| EvalError::function(format!("failed to get AddOnPlacementScore {} in namespace {}: {}", cr, cluster, e)))?;
    if !score_is_fresh(&obj) {
        return Err(EvalError::function(format!("AddOnPlacementScore {}/{} is past validUntil", cluster, cr)));
    }
    Ok(obj)
}

impl Library for ManagedClusterLibrary {
    fn name(&self) -> &'static str { "managedcluster" }

    fn functions(&self) -> Vec<Function> {
        let one = Arc::clone(&self.scores);
        let all = Arc::clone(&self.scores);
        vec![
            Function::new(
                "score",
                vec![Overload::member("managedcluster_score_string_string", Type::Map, &[Type::String, Type::String], Type::Int, move |a| {
                    let cluster = cluster_name(&a[0])?;
                    let (cr, name) = (string_arg(a, 1, "score")?, string_arg(a, 2, "score")?);
                    let obj = load_score(one.as_ref(), &cluster, cr)?;
                    obj.status
                        .iter()
                        .flat_map(|s| s.scores.iter())
                        .find(|s| s.name == name)
                        .map(|s| Value::Int(i64::from(s.value)))
                        .ok_or_else(|| EvalError::function(format!("score {} not found in AddOnPlacementScore {}/{}", name, cluster, cr)))
                })],
            ),
            Function::new(
                "scores",
                vec![Overload::member("managedcluster_scores_string", Type::Map, &[Type::String], Type::List, move |a| {
                    let cluster = cluster_name(&a[0])?;
                    let obj = load_score(all.as_ref(), &cluster, string_arg(a, 1, "scores")?)?;
                    let items = obj
                        .status
                        .iter()
                        .flat_map(|s| s.scores.iter())
                        .map(|s| Value::map([("name", Value::string(&s.name)), ("value", Value::Int(i64::from(s.value)))]))
                        .collect();
                    Ok(Value::list(items))
                })],
            ),
        ]
    }

    fn cost_estimator(&self) -> Option<Arc<dyn ActualCostEstimator>> { Some(Arc::new(ScoresCost)) }
}

/// Environment for placement predicates: `managedCluster` plus strings, regex, JSON and
/// managed-cluster libraries. Built once at startup and shared read-only.
pub fn cluster_env(scores: Arc<dyn Lister<AddOnPlacementScore>>) -> Result<Arc<Env>, EnvError> {
    Env::builder()
        .variable(MANAGED_CLUSTER, Type::Map)
        .library(Strings)
        .library(Regex)
        .library(Json)
        .library(ManagedClusterLibrary::new(scores))
        .build()
}

/// Environment for [`crate::ClusterSelector`]: `labels` and `claims` string maps.
pub fn selector_env() -> Result<Arc<Env>, EnvError> {
    Env::builder().variable(LABELS, Type::Map).variable(CLAIMS, Type::Map).library(Strings).library(Regex).library(Json).build()
}

/// One expression with its compiled program or its terminal error. Neither set means
/// not compiled yet; both are never set.
#[derive(Debug)]
pub struct CompiledExpression {
    pub expression: String,
    program: Option<Program>,
    error: Option<String>,
}

impl CompiledExpression {
    fn pending(expression: &str) -> Self { Self { expression: expression.to_string(), program: None, error: None } }

    pub fn program(&self) -> Option<&Program> { self.program.as_ref() }

    pub fn error(&self) -> Option<&str> { self.error.as_deref() }

    pub fn is_compiled(&self) -> bool { self.program.is_some() || self.error.is_some() }
}

/// Outcome of [`CelSelector::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Every expression returned `true`.
    Matched { remaining: i64 },
    /// An expression was invalid, errored, or did not return `true`; or the budget was
    /// already spent on entry.
    Rejected { remaining: i64 },
    /// An expression cost more than the remaining budget.
    BudgetExceeded,
    /// The evaluation reported no cost.
    AccountingFailure,
}

impl Validation {
    pub fn matched(&self) -> bool { matches!(self, Validation::Matched { .. }) }

    /// Remaining budget, or `-1` for the two accounting failures.
    pub fn remaining_budget(&self) -> i64 {
        match self {
            Validation::Matched { remaining } | Validation::Rejected { remaining } => *remaining,
            Validation::BudgetExceeded | Validation::AccountingFailure => -1,
        }
    }
}

/// Ordered CEL expressions of one cluster selector, compiled once and evaluated per cluster.
pub struct CelSelector {
    env: Arc<Env>,
    options: CelOptions,
    expressions: Vec<CompiledExpression>,
}

impl CelSelector {
    pub fn new(env: Arc<Env>, expressions: &[String], options: CelOptions) -> Self {
        Self { env, options, expressions: expressions.iter().map(|e| CompiledExpression::pending(e)).collect() }
    }

    pub fn is_empty(&self) -> bool { self.expressions.is_empty() }

    pub fn results(&self) -> &[CompiledExpression] { &self.expressions }

    /// Compile every expression independently; recompiling overwrites earlier results.
    pub fn compile(&mut self) -> &[CompiledExpression] {
        let program_options = self.options.program_options();
        for slot in self.expressions.iter_mut() {
            slot.program = None;
            slot.error = None;
            let ast = match self.env.compile(&slot.expression) {
                Ok(ast) => ast,
                Err(e) => {
                    slot.error = Some(format!("compilation failed: {}", e));
                    continue;
                }
            };
            match self.env.program(&ast, program_options) {
                Ok(p) => slot.program = Some(p),
                Err(e) => slot.error = Some(format!("instantiation failed: {}", e)),
            }
        }
        &self.expressions
    }

    /// First compile error, if any.
    pub fn first_error(&self) -> Option<&CompiledExpression> { self.expressions.iter().find(|e| e.error.is_some()) }

    /// Evaluate every expression in order against `cluster`, charging each one's actual cost
    /// to `budget`. Stops at the first expression that does not return `true`.
    pub fn validate(&self, cancel: &CancellationToken, cluster: &ManagedCluster, budget: i64) -> Validation {
        let name = cluster.metadata.name.as_deref().unwrap_or_default();
        if budget <= 0 {
            info!(cluster = %name, budget, "cel budget exhausted, skipping validation");
            return Validation::Rejected { remaining: budget };
        }
        let activation = Activation::new().bind(MANAGED_CLUSTER, projection::project(cluster));
        let start = Instant::now();
        let out = self.evaluate_all(cancel, &activation, name, budget);
        metrics::observe_cel_duration(start.elapsed());
        out
    }

    fn evaluate_all(&self, cancel: &CancellationToken, activation: &Activation, cluster: &str, budget: i64) -> Validation {
        let mut remaining = budget;
        for compiled in &self.expressions {
            let Some(program) = compiled.program.as_ref().filter(|_| compiled.error.is_none()) else {
                info!(cluster = %cluster, rule = %compiled.expression, "invalid compiled program");
                return Validation::Rejected { remaining };
            };
            let eval = program.eval_with_cancel(activation, cancel);
            let Some(cost) = eval.details.actual_cost() else {
                info!(cluster = %cluster, rule = %compiled.expression, "no cost information");
                return Validation::AccountingFailure;
            };
            let cost = match i64::try_from(cost) {
                Ok(c) if c <= remaining => c,
                _ => {
                    info!(cluster = %cluster, rule = %compiled.expression, cost, budget = remaining, "cel cost budget exceeded");
                    return Validation::BudgetExceeded;
                }
            };
            remaining -= cost;
            match eval.result {
                Ok(Value::Bool(true)) => {}
                Ok(other) => {
                    debug!(cluster = %cluster, rule = %compiled.expression, result = %other, "rule not satisfied");
                    return Validation::Rejected { remaining };
                }
                Err(e) => {
                    warn!(cluster = %cluster, rule = %compiled.expression, error = %e, "expression evaluation failed");
                    return Validation::Rejected { remaining };
                }
            }
        }
        Validation::Matched { remaining }
    }
}

/// Scores past `validUntil` are stale and must not drive decisions.
pub(crate) fn score_is_fresh(score: &AddOnPlacementScore) -> bool {
    score.status.as_ref().and_then(|s| s.valid_until.as_ref()).map(|t| t.0 > Utc::now()).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use ocm_core::cluster::{AddOnPlacementScoreItem, AddOnPlacementScoreSpec, AddOnPlacementScoreStatus, ManagedClusterSpec};
    use ocm_store::MemStore;

    fn score(ns: &str, name: &str, items: &[(&str, i32)]) -> AddOnPlacementScore {
        let mut s = AddOnPlacementScore::new(name, AddOnPlacementScoreSpec::default());
        s.metadata.namespace = Some(ns.into());
        s.status = Some(AddOnPlacementScoreStatus {
            scores: items.iter().map(|(n, v)| AddOnPlacementScoreItem { name: n.to_string(), value: *v }).collect(),
            ..Default::default()
        });
        s
    }

    fn selector(exprs: &[&str], scores: Vec<AddOnPlacementScore>) -> CelSelector {
        let env = cluster_env(Arc::new(MemStore::from_objects(scores))).expect("env");
        let exprs: Vec<String> = exprs.iter().map(|s| s.to_string()).collect();
        let mut sel = CelSelector::new(env, &exprs, CelOptions::default());
        sel.compile();
        sel
    }

    #[test]
    fn score_resolves_addon_placement_score() {
        let sel = selector(
            &[r#"managedCluster.score("resource-usage", "cpu") > 50"#, r#"managedCluster.scores("resource-usage").size() == 2"#],
            vec![score("c1", "resource-usage", &[("cpu", 80), ("mem", 10)])],
        );
        assert!(sel.first_error().is_none());
        let c1 = ManagedCluster::new("c1", ManagedClusterSpec::default());
        assert!(sel.validate(&CancellationToken::new(), &c1, 1000).matched());
        let c2 = ManagedCluster::new("c2", ManagedClusterSpec::default());
        assert!(matches!(sel.validate(&CancellationToken::new(), &c2, 1000), Validation::Rejected { .. }));
    }

    #[test]
    fn expired_scores_are_not_read() {
        let exprs = [r#"managedCluster.score("resource-usage", "cpu") > 50"#];
        let c1 = ManagedCluster::new("c1", ManagedClusterSpec::default());
        let at = |offset: chrono::Duration| {
            let mut s = score("c1", "resource-usage", &[("cpu", 80)]);
            if let Some(st) = s.status.as_mut() {
                st.valid_until = Some(Time(Utc::now() + offset));
            }
            s
        };

        let stale = selector(&exprs, vec![at(-chrono::Duration::hours(1))]);
        assert!(matches!(stale.validate(&CancellationToken::new(), &c1, 1000), Validation::Rejected { .. }));
        let all = selector(&[r#"managedCluster.scores("resource-usage").size() == 0"#], vec![at(-chrono::Duration::hours(1))]);
        assert!(!all.validate(&CancellationToken::new(), &c1, 1000).matched());

        let fresh = selector(&exprs, vec![at(chrono::Duration::hours(1))]);
        assert!(fresh.validate(&CancellationToken::new(), &c1, 1000).matched());
    }

    #[test]
    fn compile_errors_are_prefixed_and_positional() {
        let sel = selector(&["true", "invalid.expression", "managedCluster.nope("], vec![]);
        let r = sel.results();
        assert!(r[0].program().is_some() && r[0].error().is_none());
        assert!(r[1].error().expect("err").starts_with("compilation failed: "));
        assert!(r[2].error().is_some());
        assert!(r.iter().all(CompiledExpression::is_compiled));
    }

    #[test]
    fn remaining_budget_compat() {
        assert_eq!(Validation::Matched { remaining: 7 }.remaining_budget(), 7);
        assert_eq!(Validation::BudgetExceeded.remaining_budget(), -1);
        assert_eq!(Validation::AccountingFailure.remaining_budget(), -1);
    }
}
