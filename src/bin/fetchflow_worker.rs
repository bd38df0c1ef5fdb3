//! # Fetchflow Worker
//!
//! Runs the consumers for one pipeline role until Ctrl+C or SIGTERM.
//!
//! ```bash
//! fetchflow-worker --role transactions --config config/fetchflow.toml
//! FETCHFLOW_ENV=production fetchflow-worker --role all
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use fetchflow_core::config::ConfigLoader;
use fetchflow_core::logging;
use fetchflow_core::runtime::{Collaborators, FetchflowRuntime, WorkerRole};

#[derive(Parser, Debug)]
#[command(name = "fetchflow-worker")]
#[command(about = "Run fetchflow pipeline consumers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Pipeline stage(s) this process consumes
    #[arg(short, long, value_enum, default_value = "all")]
    role: WorkerRole,

    /// Base configuration file
    #[arg(short, long, env = "FETCHFLOW_CONFIG_PATH", default_value = "config/fetchflow.toml")]
    config: PathBuf,

    /// Environment overlay (`<config stem>.<environment>.toml`)
    #[arg(short, long, env = "FETCHFLOW_ENV", default_value = "development")]
    environment: String,

    /// Check configuration, database, broker and stage queues, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_from_path(&cli.config, &cli.environment)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init_structured_logging(&config.telemetry);

    if cli.check {
        let report = FetchflowRuntime::preflight(&config)
            .await
            .context("running preflight checks")?;
        for endpoint in &report.endpoints {
            info!(
                endpoint = %endpoint.name,
                kind = %endpoint.kind,
                circuit = ?endpoint.circuit,
                "endpoint configured"
            );
        }
        if !report.queues.missing.is_empty() {
            warn!(missing = ?report.queues.missing, "stage queues not created yet");
        }
        info!(
            backend = ?report.backend,
            database = ?report.database,
            messaging_healthy = report.messaging_healthy,
            ready = report.is_ready(),
            "preflight finished"
        );
        if !report.is_ready() {
            anyhow::bail!("worker is not ready to start");
        }
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = ?cli.role,
        environment = %cli.environment,
        "starting fetchflow worker"
    );

    let runtime = FetchflowRuntime::bootstrap(config, Collaborators::default())
        .await
        .context("bootstrapping runtime")?;
    let handle = runtime.start(cli.role).context("starting consumers")?;
    info!(consumers = handle.consumers(), "worker running, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("shutdown signal received, draining in-flight messages");

    if let Err(e) = handle.stop().await {
        error!(error = %e, "worker did not stop cleanly");
        return Err(e.into());
    }
    info!("worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
