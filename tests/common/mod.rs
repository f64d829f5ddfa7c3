use std::sync::Arc;
use std::time::Duration;

use d_keeper::Broker;
use d_keeper::BrokerBuilder;
use d_keeper::KeeperConfig;
use d_keeper::MemoryStorage;
use d_keeper::StorageBackend;
use d_keeper::WatchedEvent;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const SESSION_TIMEOUT_MS: u64 = 100;

pub fn config(broker_id: u32) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.broker.broker_id = broker_id;
    config.storage.backend = StorageBackend::Memory;
    config.session.timeout_ms = SESSION_TIMEOUT_MS;
    config.propagation.poll_interval_ms = 10;
    config.propagation.compaction_interval_ms = 50;
    config.propagation.retention_ms = 5_000;
    config
}

pub struct RunningBroker {
    pub broker: Arc<Broker>,
    pub shutdown_tx: watch::Sender<()>,
    pub handle: JoinHandle<d_keeper::Result<()>>,
}

impl RunningBroker {
    pub async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("broker should stop")
            .unwrap()
            .unwrap();
    }
}

/// Builds and runs a broker over `storage`.
pub fn start_broker(
    broker_id: u32,
    storage: &Arc<MemoryStorage>,
) -> RunningBroker {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let broker = Arc::new(
        BrokerBuilder::new(config(broker_id), shutdown_rx)
            .shared_storage(storage.clone())
            .build()
            .unwrap(),
    );
    let handle = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await }
    });
    RunningBroker {
        broker,
        shutdown_tx,
        handle,
    }
}

pub async fn next_event(receiver: &mut mpsc::UnboundedReceiver<WatchedEvent>) -> WatchedEvent {
    tokio::time::timeout(Duration::from_secs(2), receiver.recv())
        .await
        .expect("no watch event within 2s")
        .expect("watch channel closed")
}

/// Polls `check` every 10ms until it holds. Panics after `within`.
pub async fn eventually(
    within: Duration,
    mut check: impl FnMut() -> bool,
) {
    let deadline = tokio::time::Instant::now() + within;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within {within:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Gives every broker a few polls to pick up earlier writes, so watches armed
/// afterwards only see later ones.
pub async fn let_propagate() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
