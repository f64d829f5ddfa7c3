use std::sync::Arc;

use tokio::sync::watch;

use crate::DispatchLoop;
use crate::EventDispatcher;
use crate::KeeperConfig;
use crate::MemoryStorage;
use crate::NodeStore;
use crate::StorageBackend;
use crate::WatchRegistry;

/// Node store over a fresh in-memory backend. The dispatch loop is returned
/// unstarted; synchronous assertions can inspect the registry directly.
pub fn memory_node_store(broker_id: u32) -> (Arc<NodeStore>, Arc<MemoryStorage>, DispatchLoop) {
    node_store_over(broker_id, Arc::new(MemoryStorage::new()))
}

/// Node store over a backend shared with other brokers.
pub fn node_store_over(
    broker_id: u32,
    storage: Arc<MemoryStorage>,
) -> (Arc<NodeStore>, Arc<MemoryStorage>, DispatchLoop) {
    let (dispatcher, consumer) = EventDispatcher::new(Arc::new(WatchRegistry::new(true)));
    let store = NodeStore::new(broker_id, storage.clone(), storage.clone(), dispatcher);
    (Arc::new(store), storage, consumer)
}

/// Runs the dispatch loop until the returned sender is dropped or fired.
pub fn spawn_dispatch_loop(consumer: DispatchLoop) -> watch::Sender<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(consumer.run(shutdown_rx));
    shutdown_tx
}

/// Config for a broker over the in-memory backend with short intervals.
pub fn memory_config(broker_id: u32) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.broker.broker_id = broker_id;
    config.storage.backend = StorageBackend::Memory;
    config.session.timeout_ms = 1_000;
    config.propagation.poll_interval_ms = 10;
    config.propagation.compaction_interval_ms = 1_000;
    config
}
