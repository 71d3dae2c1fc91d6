//! rampd — the Rampline daemon.
//!
//! Single binary that assembles the progressive delivery subsystems:
//! - State store (redb): plan, release history, stages, step ledger
//! - Orchestration engine + deployment/telemetry collaborators
//! - REST API
//!
//! # Usage
//!
//! ```text
//! rampd serve --port 8090 --data-dir /var/lib/rampline --target payments
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use ramp_core::ReleaseState;
use ramp_engine::{
    DeployController, EngineConfig, FlatTelemetryClient, HttpDeployController,
    HttpTelemetryClient, LogDeployController, Orchestrator, TelemetryClient,
};

#[derive(Parser)]
#[command(name = "rampd", about = "Rampline progressive delivery daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (state store, engine, REST API).
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8090")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/rampline")]
        data_dir: PathBuf,

        /// Name of the service being rolled out.
        #[arg(long, default_value = "default")]
        target: String,

        /// Base URL of the deployment API. Without it, traffic changes
        /// are logged instead of applied.
        #[arg(long)]
        deploy_api: Option<String>,

        /// Base URL of the telemetry API. Without it, SLO checks see
        /// zero latency and never trip.
        #[arg(long)]
        telemetry_api: Option<String>,

        /// Seconds per soak tick.
        #[arg(long, default_value = "1")]
        poll_interval: u64,

        /// Seconds before the stop handler's second cancellation sweep.
        #[arg(long, default_value = "5")]
        stop_grace: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rampd=debug,ramp=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            target,
            deploy_api,
            telemetry_api,
            poll_interval,
            stop_grace,
        } => {
            serve(
                port,
                data_dir,
                target,
                deploy_api,
                telemetry_api,
                poll_interval,
                stop_grace,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    port: u16,
    data_dir: PathBuf,
    target: String,
    deploy_api: Option<String>,
    telemetry_api: Option<String>,
    poll_interval: u64,
    stop_grace: u64,
) -> anyhow::Result<()> {
    info!("Rampline daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("rampline.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = ramp_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Deployment controller.
    let deploy: Arc<dyn DeployController> = match &deploy_api {
        Some(url) => {
            info!(%url, "using HTTP deployment API");
            Arc::new(HttpDeployController::new(url.clone()))
        }
        None => {
            info!("no deployment API configured, traffic changes will be logged only");
            Arc::new(LogDeployController)
        }
    };

    // Telemetry client.
    let telemetry: Arc<dyn TelemetryClient> = match &telemetry_api {
        Some(url) => {
            info!(%url, "using HTTP telemetry API");
            Arc::new(HttpTelemetryClient::new(url.clone()))
        }
        None => {
            info!("no telemetry API configured, SLO checks will see zero latency");
            Arc::new(FlatTelemetryClient)
        }
    };

    // Orchestration engine.
    let mut config = EngineConfig::new(target);
    config.poll_interval = Duration::from_secs(poll_interval.max(1));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        deploy,
        telemetry,
        config,
    ));
    info!("orchestration engine initialized");

    // ── Resume an interrupted release ──────────────────────────

    // A release left in `running` means the previous process died
    // mid-rollout. The step ledger makes re-running it safe: completed
    // steps replay as no-ops.
    if let Some(release) = store.get_active_release()? {
        if release.state == ReleaseState::Running {
            info!(id = %release.id, "resuming interrupted release");
            let orchestrator = orchestrator.clone();
            let id = release.id.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(&id).await {
                    error!(%id, error = %e, "resumed release ended with error");
                }
            });
        }
    }

    // ── Start API server ───────────────────────────────────────

    let router = ramp_api::build_router(ramp_api::ApiState {
        store,
        orchestrator,
        stop_grace: Duration::from_secs(stop_grace),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("Rampline daemon stopped");
    Ok(())
}
