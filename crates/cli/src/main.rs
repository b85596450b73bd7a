use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use respread_core::PodRef;
use respread_kubehub::KubeClusterState;
use respread_ops::{DefaultEvictable, EvictionLimits, KubeEvictor};
use respread_policy::{Policy, PolicyError};
use respread_topology::{
    FailurePolicy, NamespaceFailure, NamespacePlan, PassError, PassReport, PopulationPolicy, TopologySpread,
};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "respreadctl", version, about = "Evict pods violating topology spread constraints")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Policy file (YAML or JSON)
    #[arg(long = "policy", env = "RESPREAD_POLICY", global = true, default_value = "policy.yaml")]
    policy: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum FailureArg { Abort, Continue }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PopulationArg { Evictable, All }

impl From<FailureArg> for FailurePolicy {
    fn from(a: FailureArg) -> Self {
        match a { FailureArg::Abort => FailurePolicy::AbortOnError, FailureArg::Continue => FailurePolicy::ContinueOnError }
    }
}

impl From<PopulationArg> for PopulationPolicy {
    fn from(a: PopulationArg) -> Self {
        match a { PopulationArg::Evictable => PopulationPolicy::EvictableOnly, PopulationArg::All => PopulationPolicy::AllMatching }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run rebalancing passes against the current cluster
    Run {
        /// Log and count evictions without calling the API
        #[arg(long = "dry-run", env = "RESPREAD_DRY_RUN", action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Seconds between passes; 0 runs once
        #[arg(long = "interval", env = "RESPREAD_INTERVAL", default_value_t = 0)]
        interval: u64,
        #[arg(long = "failure-policy", env = "RESPREAD_FAILURE_POLICY", value_enum, default_value_t = FailureArg::Abort)]
        failure_policy: FailureArg,
        #[arg(long = "population", env = "RESPREAD_POPULATION", value_enum, default_value_t = PopulationArg::Evictable)]
        population: PopulationArg,
    },
    /// Compute skew and candidates without evicting anything
    Plan {
        #[arg(long = "population", env = "RESPREAD_POPULATION", value_enum, default_value_t = PopulationArg::Evictable)]
        population: PopulationArg,
    },
    /// Check a policy file and report every problem found
    Validate,
}

fn init_tracing() {
    let env = std::env::var("RESPREAD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("RESPREAD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid RESPREAD_METRICS_ADDR; expected host:port");
        }
    }
}

/// Serializable view of one pass.
#[derive(Debug, Serialize)]
struct ReportView<'a> {
    namespaces: &'a [NamespacePlan],
    failed_namespaces: &'a [NamespaceFailure],
    candidates: usize,
    evicted: &'a [PodRef],
    refused: &'a [PodRef],
    errors: Vec<String>,
    not_attempted: &'a [PodRef],
    aborted: bool,
    cancelled: bool,
}

impl<'a> From<&'a PassReport> for ReportView<'a> {
    fn from(r: &'a PassReport) -> Self {
        Self {
            namespaces: &r.namespaces,
            failed_namespaces: &r.failed,
            candidates: r.candidates,
            evicted: &r.dispatch.evicted,
            refused: &r.dispatch.refused,
            errors: r.dispatch.errors.iter().map(|e| e.to_string()).collect(),
            not_attempted: &r.dispatch.not_attempted,
            aborted: r.dispatch.aborted,
            cancelled: r.dispatch.cancelled,
        }
    }
}

fn render_plans(namespaces: &[NamespacePlan], failed: &[NamespaceFailure]) -> String {
    let mut out = String::new();
    for ns in namespaces {
        for r in &ns.records {
            let counts: Vec<String> = r.counts.iter().map(|(d, c)| format!("{d}={c}")).collect();
            out.push_str(&format!(
                "{} • {} • maxSkew {} • min {} • {}\n",
                ns.namespace, r.topology_key, r.max_skew, r.minimum, counts.join(" ")
            ));
        }
        for s in &ns.skipped {
            out.push_str(&format!("{} • {} • skipped: {}\n", ns.namespace, s.topology_key, s.error));
        }
        for c in &ns.candidates {
            out.push_str(&format!("  - {c}\n"));
        }
    }
    for f in failed {
        out.push_str(&format!("{} • not listed: {}\n", f.namespace, f.error));
    }
    out
}

fn render_report(r: &PassReport) -> String {
    let mut out = render_plans(&r.namespaces, &r.failed);
    let d = &r.dispatch;
    out.push_str(&format!(
        "candidates {} • evicted {} • refused {} • errors {} • not attempted {}",
        r.candidates,
        d.evicted.len(),
        d.refused.len(),
        d.errors.len(),
        d.not_attempted.len()
    ));
    if d.aborted { out.push_str(" • aborted"); }
    if d.cancelled { out.push_str(" • cancelled"); }
    for e in &d.errors {
        out.push_str(&format!("\n  ! {e}"));
    }
    out
}

fn load_policy(path: &PathBuf) -> Result<Policy> {
    Policy::load(path).with_context(|| format!("loading policy {}", path.display()))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling pass");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => match Policy::load(&cli.policy) {
            Ok(policy) => match cli.output {
                Output::Human => println!(
                    "{} ok • topology spread {}",
                    cli.policy.display(),
                    if policy.topology_spread_enabled() { "enabled" } else { "disabled" }
                ),
                Output::Json => println!("{}", serde_json::json!({ "valid": true, "issues": [] })),
            },
            Err(PolicyError::Invalid(issues)) => {
                match cli.output {
                    Output::Human => {
                        for i in &issues {
                            println!("{}: {}", i.path, i.error);
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "valid": false, "issues": issues }))?),
                }
                return Err(anyhow!("{} problem(s) in {}", issues.len(), cli.policy.display()));
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Plan { population } => {
            let policy = load_policy(&cli.policy)?;
            let Some(params) = policy.topology_spread_params(population.into(), FailurePolicy::default())? else {
                info!("topology spread strategy disabled; nothing to plan");
                return Ok(());
            };
            let settings = policy.eviction_settings();
            let evictable = DefaultEvictable::new(settings.evict_local_storage_pods, settings.threshold_priority);
            let strategy = TopologySpread::new(params);
            let cluster = KubeClusterState::try_default().await?;
            let snap = strategy.snapshot(&cluster, &cancel_on_ctrl_c()).await?;
            let plan = strategy.plan(&snap, &evictable);
            match cli.output {
                Output::Human => {
                    print!("{}", render_plans(&plan.namespaces, &snap.failed));
                    println!("candidates {}", plan.candidates.len());
                }
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "namespaces": plan.namespaces,
                        "failed_namespaces": snap.failed,
                        "candidates": plan.candidates.refs().collect::<Vec<_>>(),
                    }))?
                ),
            }
        }
        Commands::Run { dry_run, interval, failure_policy, population } => {
            let policy = load_policy(&cli.policy)?;
            let Some(params) = policy.topology_spread_params(population.into(), failure_policy.into())? else {
                info!("topology spread strategy disabled; nothing to run");
                return Ok(());
            };
            let settings = policy.eviction_settings();
            let evictable = DefaultEvictable::new(settings.evict_local_storage_pods, settings.threshold_priority);
            let limits = EvictionLimits { per_node: settings.max_per_node, total: settings.max_total };
            let strategy = TopologySpread::new(params);
            let cluster = KubeClusterState::try_default().await?;
            let cancel = cancel_on_ctrl_c();
            info!(dry_run, interval, ?failure_policy, ?population, "respread starting");

            loop {
                // Limits apply per pass.
                let evictor = KubeEvictor::new(cluster.client().clone(), dry_run, limits);
                match strategy.run(&cluster, &evictable, &evictor, &cancel).await {
                    Ok(report) => match cli.output {
                        Output::Human => println!("{}", render_report(&report)),
                        Output::Json => println!("{}", serde_json::to_string(&ReportView::from(&report))?),
                    },
                    Err(PassError::Cancelled) => break,
                    Err(e) if interval == 0 => return Err(e.into()),
                    Err(e) => error!(error = %e, "pass failed; retrying next interval"),
                }
                if interval == 0 || cancel.is_cancelled() { break; }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            warn!("respread stopped");
        }
    }
    Ok(())
}
