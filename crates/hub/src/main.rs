use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ocm_apply::KubeWriter;
use ocm_controllers::{Context, ControllerConfig, HubListers};
use ocm_core::cluster::{AddOnPlacementScore, ManagedCluster, ManagedClusterClaim, ManagedClusterSpec, ManagedClusterStatus};
use ocm_kubehub::{InformerConfig, Informers};
use ocm_placement::{cel, CelOptions, CelSelector, ScheduleError, ScheduleResult, SchedulerConfig};
use ocm_store::{Lister, MemStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const FIELD_MANAGER: &str = "ocm-hub";

#[derive(Parser, Debug)]
#[command(name = "ocm-hub", version, about = "OCM placement scheduling on the hub")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Total CEL cost one scheduling pass may spend
    #[arg(long, global = true, env = "OCM_CEL_COST_BUDGET", default_value_t = 10_000_000)]
    cel_cost_budget: i64,

    /// Cost ceiling of a single CEL evaluation
    #[arg(long, global = true, env = "OCM_CEL_PER_CALL_LIMIT", default_value_t = 1_000_000)]
    cel_per_call_limit: u64,

    /// Comprehension iterations between cancellation checks
    #[arg(long, global = true, env = "OCM_CEL_CHECK_FREQUENCY", default_value_t = 100)]
    cel_check_frequency: u32,

    /// Namespace holding ClusterProfiles
    #[arg(long, global = true, env = "OCM_CLUSTER_PROFILE_NAMESPACE", default_value = "open-cluster-management")]
    cluster_profile_namespace: String,

    /// Namespace holding MultiKueue secrets and placements
    #[arg(long, global = true, env = "OCM_KUEUE_NAMESPACE", default_value = "kueue-system")]
    kueue_namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every hub controller until SIGINT/SIGTERM
    Controller {
        /// Concurrent reconciles per controller
        #[arg(long, env = "OCM_WORKERS", default_value_t = 4)]
        workers: u16,
        /// Retry delay after a failed reconcile, in seconds
        #[arg(long = "requeue-secs", env = "OCM_REQUEUE_SECS", default_value_t = 30)]
        requeue_secs: u64,
        /// Prometheus listener, e.g. 0.0.0.0:9090
        #[arg(long, env = "OCM_METRICS_ADDR")]
        metrics_addr: Option<String>,
        /// Seconds to wait for the initial cache sync
        #[arg(long = "sync-timeout", default_value_t = 60)]
        sync_timeout: u64,
    },
    /// Dry-run one scheduling pass for a Placement and print the outcome
    Schedule {
        /// Placement namespace
        #[arg(long)]
        namespace: String,
        /// Placement name
        #[arg(long)]
        name: String,
    },
    /// Compile CEL expressions and evaluate them against a synthetic cluster
    CheckCel {
        /// Expression to evaluate; repeat for several
        #[arg(long = "expr", required = true)]
        exprs: Vec<String>,
        /// Cluster label as key=value; repeatable
        #[arg(long = "labels")]
        labels: Vec<String>,
        /// Cluster claim as name=value; repeatable
        #[arg(long = "claims")]
        claims: Vec<String>,
        /// Cluster name
        #[arg(long = "cluster", default_value = "cluster1")]
        cluster: String,
    },
}

fn init_tracing() {
    let env = std::env::var("OCM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else { return };
    let Ok(sock) = addr.parse::<SocketAddr>() else {
        tracing::warn!(addr = %addr, "invalid metrics address; expected host:port");
        return;
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(_) => {
            ocm_placement::metrics::describe();
            tracing::info!(addr = %addr, "Prometheus metrics exporter listening");
        }
        Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
    }
}

fn parse_pairs(items: &[String]) -> Result<BTreeMap<String, String>> {
    items
        .iter()
        .map(|kv| kv.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())).ok_or_else(|| anyhow!("expected key=value, got {:?}", kv)))
        .collect()
}

impl Cli {
    fn cel_options(&self) -> CelOptions {
        CelOptions { cost_budget: self.cel_cost_budget, per_call_limit: self.cel_per_call_limit, check_frequency: self.cel_check_frequency }
    }

    fn informer_config(&self) -> InformerConfig {
        InformerConfig { cluster_profile_namespace: self.cluster_profile_namespace.clone(), kueue_namespace: self.kueue_namespace.clone() }
    }
}

#[derive(Serialize)]
struct ScheduleReport<'a> {
    namespace: &'a str,
    name: &'a str,
    eligible_sets: Vec<String>,
    candidates: usize,
    #[serde(flatten)]
    result: ScheduleResult,
}

#[derive(Serialize)]
struct CelReport {
    expressions: Vec<CelLine>,
    matched: bool,
    remaining_budget: i64,
}

#[derive(Serialize)]
struct CelLine {
    expression: String,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let scheduler = SchedulerConfig { cel: cli.cel_options() };

    match &cli.command {
        Commands::Controller { workers, requeue_secs, metrics_addr, sync_timeout } => {
            init_metrics(metrics_addr.as_deref());
            let client = ocm_kubehub::client().await?;
            let (informers, handles) = Informers::start(&client, &cli.informer_config());
            informers.wait_until_ready(Duration::from_secs(*sync_timeout)).await?;
            let listers = HubListers::from(&informers);
            let env = cel::cluster_env(Arc::clone(&listers.scheduling.scores)).context("building CEL environment")?;
            let config = ControllerConfig {
                cluster_profile_namespace: cli.cluster_profile_namespace.clone(),
                kueue_namespace: cli.kueue_namespace.clone(),
                requeue: Duration::from_secs(*requeue_secs),
                workers: *workers,
            };
            info!(workers, cel_budget = cli.cel_cost_budget, "hub controllers starting");
            let ctx = Arc::new(Context::new(listers, env, scheduler, KubeWriter::new(client.clone(), FIELD_MANAGER), config));
            ocm_controllers::run(client, ctx).await;
            for h in handles {
                h.abort();
            }
        }
        Commands::Schedule { namespace, name } => {
            let client = ocm_kubehub::client().await?;
            let (informers, handles) = Informers::start(&client, &cli.informer_config());
            informers.wait_until_ready(Duration::from_secs(60)).await?;
            let listers = HubListers::from(&informers);
            let placement = listers.placements.get(Some(namespace), name).with_context(|| format!("placement {}/{}", namespace, name))?;
            let env = cel::cluster_env(Arc::clone(&listers.scheduling.scores)).context("building CEL environment")?;
            let s = ocm_placement::Scheduler::new(env, scheduler, listers.scheduling.clone());
            let candidates = s.candidates(&placement)?;
            let result = match s.schedule(&CancellationToken::new(), &placement, &candidates.clusters) {
                Ok(r) => r,
                Err(ScheduleError::Misconfigured(msg)) => {
                    error!(namespace = %namespace, name = %name, reason = %msg, "placement misconfigured");
                    bail!("placement {}/{} is misconfigured: {}", namespace, name, msg);
                }
                Err(e) => return Err(e.into()),
            };
            for h in handles {
                h.abort();
            }
            let report = ScheduleReport { namespace, name, eligible_sets: candidates.eligible_sets, candidates: candidates.clusters.len(), result };
            match cli.output {
                Output::Human => {
                    println!("eligible sets: {}", report.eligible_sets.join(", "));
                    println!("candidates: {}  decided: {}  unscheduled: {}", report.candidates, report.result.decided.len(), report.result.unscheduled);
                    for c in &report.result.scored {
                        let mark = if report.result.decided.contains(&c.name) { "*" } else { " " };
                        println!("{} {:<30} {:>6}", mark, c.name, c.score);
                    }
                    for f in &report.result.filtered {
                        println!("  filtered {} by {}: {}", f.cluster, f.plugin, f.reason);
                    }
                    if let Some(d) = report.result.requeue_after {
                        println!("requeue after {}s", d.as_secs());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::CheckCel { exprs, labels, claims, cluster } => {
            let mut c = ManagedCluster::new(cluster, ManagedClusterSpec::default());
            c.metadata.labels = Some(parse_pairs(labels)?);
            c.status = Some(ManagedClusterStatus {
                cluster_claims: parse_pairs(claims)?.into_iter().map(|(name, value)| ManagedClusterClaim { name, value }).collect(),
                ..Default::default()
            });
            let scores: Arc<dyn Lister<AddOnPlacementScore>> = Arc::new(MemStore::<AddOnPlacementScore>::new());
            let env = cel::cluster_env(scores).context("building CEL environment")?;
            let mut selector = CelSelector::new(env, exprs, cli.cel_options());
            selector.compile();
            let validation = selector.validate(&CancellationToken::new(), &c, cli.cel_cost_budget);
            let report = CelReport {
                expressions: selector.results().iter().map(|r| CelLine { expression: r.expression.clone(), error: r.error().map(str::to_string) }).collect(),
                matched: validation.matched(),
                remaining_budget: validation.remaining_budget(),
            };
            match cli.output {
                Output::Human => {
                    for line in &report.expressions {
                        match &line.error {
                            Some(e) => println!("✗ {}: {}", line.expression, e),
                            None => println!("✓ {}", line.expression),
                        }
                    }
                    println!("matched: {}  remaining budget: {}", report.matched, report.remaining_budget);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        let m = parse_pairs(&["env=prod".to_string(), "expr=a=b".to_string()]).expect("ok");
        assert_eq!(m.get("env").map(String::as_str), Some("prod"));
        assert_eq!(m.get("expr").map(String::as_str), Some("a=b"));
        assert!(parse_pairs(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_schedule() {
        let cli = Cli::try_parse_from(["ocm-hub", "-o", "json", "schedule", "--namespace", "ns", "--name", "p1"]).expect("parse");
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Schedule { ref namespace, ref name } if namespace == "ns" && name == "p1"));
        assert_eq!(cli.cel_options(), CelOptions::default());
    }
}
