//! Parcel worker binary.
//!
//! Consumes a queue and executes the calls it carries.

use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use parcel_state::StateProvider;
use parcel_worker::{Consumer, Handler, WorkerConfig, WorkerError};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Parcel worker.
#[derive(Parser, Debug)]
#[command(name = "parcel-worker")]
#[command(about = "Execute remote calls delivered through a queue")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "PARCEL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = WorkerConfig::load(cli.config.as_deref())?;
    info!(
        name = %config.name,
        queue = %config.queue,
        bucket = %config.bucket,
        batch_size = config.consumer.batch_size,
        max_in_flight = ?config.consumer.max_in_flight,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics.listen_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| WorkerError::Metrics(e.to_string()))?;
        info!(address = %addr, "Metrics exporter listening");
    }

    let provider = StateProvider::connect(&config.state())
        .await
        .map_err(WorkerError::from)?;

    let handler = Handler::new(provider.blob(), config.bucket.clone())
        .with_max_in_flight(config.consumer.max_in_flight);
    info!(functions = ?handler.registry().names(), "Functions registered");

    let consumer = Consumer::new(
        Arc::new(handler),
        provider.queue(),
        config.queue.clone(),
        config.name.clone(),
        config.consumer.clone(),
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    consumer.run(cancel).await;

    info!("Parcel worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
