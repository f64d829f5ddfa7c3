use std::path::Path;

use d_keeper::utils::file_io::open_file_for_append;
use d_keeper::BrokerBuilder;
use d_keeper::KeeperConfig;
use d_keeper::Result;
use d_keeper::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = KeeperConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(config.broker.broker_id, &config.broker.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let broker = BrokerBuilder::new(config, graceful_rx).build()?;

    info!("Broker built. Waiting for shutdown signal...");
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    broker.run().await?;

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| SystemError::ShutdownSignal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| SystemError::ShutdownSignal(e.to_string()))?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM received.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        SystemError::ShutdownSignal(e.to_string())
    })?;

    info!("Shutdown signal sent");
    Ok(())
}

fn init_observability(
    broker_id: u32,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(log_dir.join(format!("{broker_id}/d-keeper.log")))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
