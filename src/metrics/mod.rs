use std::net::SocketAddr;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref WATCH_EVENTS_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events_delivered", "Watch events handed to watcher callbacks"),
        &["event_type"]
    )
    .expect("metric can not be created");

    pub static ref WATCHER_CALLBACK_FAILURES: IntCounter = IntCounter::new(
        "watcher_callback_failures",
        "Watcher callbacks that panicked and were closed"
    )
    .expect("metric can not be created");

    pub static ref REMOTE_UPDATES_DELIVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("remote_updates_delivered", "Update log records from other brokers turned into watch events"),
        &["origin_broker"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_FETCH_FAILURES: IntCounter = IntCounter::new(
        "update_fetch_failures",
        "Failed update log polls"
    )
    .expect("metric can not be created");

    pub static ref UPDATE_LOG_COMPACTED: IntCounter = IntCounter::new(
        "update_log_compacted",
        "Update log records removed by compaction"
    )
    .expect("metric can not be created");

    pub static ref SESSIONS_REAPED: IntCounter = IntCounter::new(
        "sessions_reaped",
        "Stale sessions removed by the liveness sweep"
    )
    .expect("metric can not be created");

    pub static ref EPHEMERAL_NODES_REAPED: IntCounter = IntCounter::new(
        "ephemeral_nodes_reaped",
        "Ephemeral nodes deleted on behalf of closed or dead sessions"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(WATCH_EVENTS_DELIVERED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCHER_CALLBACK_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REMOTE_UPDATES_DELIVERED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(UPDATE_FETCH_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(UPDATE_LOG_COMPACTED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(SESSIONS_REAPED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(EPHEMERAL_NODES_REAPED.clone()))
        .expect("collector can be registered");
}

/// Serves `/metrics` until the shutdown signal fires.
pub async fn start_server(
    addr: SocketAddr,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(%addr, "metrics server listening");
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(encode(&REGISTRY))
}

pub(crate) fn encode(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
