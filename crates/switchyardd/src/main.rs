//! switchyardd — the switchyard daemon.
//!
//! Single binary that assembles the coordinator subsystems:
//! - State store (redb)
//! - Traffic router
//! - Health monitor (fed from persisted telemetry samples)
//! - Alarm gate over the store-backed metric source
//! - Deployment orchestrator
//!
//! On startup it resumes any in-flight deployment from its last durable
//! state, then pumps collector telemetry into the health monitor and logs
//! the deployment event stream until interrupted.
//!
//! # Usage
//!
//! ```text
//! switchyardd run --data-dir /var/lib/switchyard --tick-interval 60
//! switchyardd status --data-dir /var/lib/switchyard
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use switchyard_gate::StoreMetricSource;
use switchyard_health::HealthMonitor;
use switchyard_orchestrator::{Orchestrator, OrchestratorConfig, StoreRevisionRegistry};
use switchyard_router::TrafficRouter;
use switchyard_state::{Endpoint, StateStore};

#[derive(Parser)]
#[command(name = "switchyardd", about = "Switchyard blue/green deployment coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator, resuming any in-flight deployment.
    Run {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/switchyard")]
        data_dir: PathBuf,

        /// Orchestrator tick interval in seconds.
        #[arg(long, default_value = "60")]
        tick_interval: u64,

        /// Keep shifting when the target revision turns unhealthy, as long
        /// as alarms stay clear.
        #[arg(long)]
        no_rollback_on_unhealthy: bool,
    },
    /// Print deployments and routing tables from the store.
    Status {
        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/switchyard")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchyardd=debug,switchyard=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            data_dir,
            tick_interval,
            no_rollback_on_unhealthy,
        } => run(data_dir, tick_interval, !no_rollback_on_unhealthy).await,
        Command::Status { data_dir } => status(data_dir).await,
    }
}

fn open_store(data_dir: &PathBuf) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join("state.redb");
    Ok(StateStore::open(&path)?)
}

async fn run(
    data_dir: PathBuf,
    tick_interval: u64,
    rollback_on_unhealthy: bool,
) -> anyhow::Result<()> {
    let state = open_store(&data_dir)?;
    let router = Arc::new(TrafficRouter::load(state.clone())?);
    let health = Arc::new(HealthMonitor::new());
    let source = Arc::new(StoreMetricSource::new(state.clone()));
    let registry = Arc::new(StoreRevisionRegistry::new(state.clone()));

    let config = OrchestratorConfig {
        tick_interval: Duration::from_secs(tick_interval),
        rollback_on_unhealthy,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(
        state.clone(),
        router,
        health.clone(),
        source,
        registry,
        config,
    );

    let resumed = orchestrator.resume_all().await?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "resumed in-flight deployments");
    }

    // Log every deployment transition.
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                deployment = %event.deployment_id,
                from = %event.from_state,
                to = %event.to_state,
                reason = event.reason.as_deref().unwrap_or("-"),
                "deployment transition"
            );
        }
    });

    info!(?data_dir, tick_interval, "switchyardd running");

    // Pump collector health samples from the store into the monitor until
    // interrupted.
    let mut last_pumped = 0u64;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(tick_interval)) => {
                match state.list_health_samples_since(last_pumped) {
                    Ok(samples) => {
                        for sample in samples {
                            last_pumped = last_pumped.max(sample.timestamp + 1);
                            health.record(sample).await;
                        }
                    }
                    Err(e) => error!(error = %e, "failed to read health samples"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn status(data_dir: PathBuf) -> anyhow::Result<()> {
    let state = open_store(&data_dir)?;

    println!("deployments:");
    for d in state.list_deployments()? {
        println!(
            "  {}  {} -> {}  state={}  reason={}",
            d.id,
            d.source_revision,
            d.target_revision,
            d.state,
            d.reason.as_deref().unwrap_or("-"),
        );
        for event in state.list_events(&d.id)? {
            println!(
                "    [{}] {} -> {}  {}",
                event.seq,
                event.from_state,
                event.to_state,
                event.reason.as_deref().unwrap_or(""),
            );
        }
    }

    println!("routes:");
    for endpoint in [Endpoint::Production, Endpoint::Test] {
        match state.get_route(endpoint)? {
            Some(route) => {
                let weights: Vec<String> = route
                    .weights
                    .iter()
                    .map(|(rev, w)| format!("{rev}={w}"))
                    .collect();
                println!("  {endpoint}: {}", weights.join(" "));
            }
            None => println!("  {endpoint}: (empty)"),
        }
    }

    Ok(())
}
