use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use super::Broker;
use crate::constants::SLED_DB_DIR;
use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::EventDispatcher;
use crate::KeeperConfig;
use crate::LogCompactor;
use crate::MemoryStorage;
use crate::NodeRepository;
use crate::NodeStore;
use crate::Result;
use crate::Session;
use crate::SessionIdGenerator;
use crate::SessionLivenessMonitor;
use crate::SessionRepository;
use crate::SledStorage;
use crate::StorageBackend;
use crate::UpdateLogRepository;
use crate::UpdatePropagator;
use crate::WatchRegistry;

type Repositories = (
    Arc<dyn NodeRepository>,
    Arc<dyn SessionRepository>,
    Arc<dyn UpdateLogRepository>,
);

/// Builds a [`Broker`]. Repositories that are not injected come from the
/// backend named in `config.storage.backend`.
pub struct BrokerBuilder {
    config: KeeperConfig,
    shutdown_signal: watch::Receiver<()>,
    nodes: Option<Arc<dyn NodeRepository>>,
    sessions: Option<Arc<dyn SessionRepository>>,
    update_log: Option<Arc<dyn UpdateLogRepository>>,
}

impl BrokerBuilder {
    pub fn new(
        config: KeeperConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            shutdown_signal,
            nodes: None,
            sessions: None,
            update_log: None,
        }
    }

    /// Sets a custom node repository
    pub fn node_repository(
        mut self,
        nodes: Arc<dyn NodeRepository>,
    ) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Sets a custom session repository
    pub fn session_repository(
        mut self,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets a custom update log repository
    pub fn update_log_repository(
        mut self,
        update_log: Arc<dyn UpdateLogRepository>,
    ) -> Self {
        self.update_log = Some(update_log);
        self
    }

    /// Uses one backend for all three repositories, e.g. a store shared by
    /// several brokers in the same process.
    pub fn shared_storage<S>(
        self,
        storage: Arc<S>,
    ) -> Self
    where
        S: NodeRepository + SessionRepository + UpdateLogRepository,
    {
        self.node_repository(storage.clone())
            .session_repository(storage.clone())
            .update_log_repository(storage)
    }

    /// Replaces the entire configuration
    pub fn config(
        mut self,
        config: KeeperConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Finalizes the builder.
    ///
    /// # Errors
    /// Storage errors while opening the configured backend.
    pub fn build(self) -> Result<Broker> {
        let broker_id = self.config.broker.broker_id;
        let (nodes, sessions, update_log) = self.repositories()?;

        let registry = Arc::new(WatchRegistry::new(self.config.watch.auto_watch_reset));
        let (dispatcher, dispatch_loop) = EventDispatcher::new(registry);

        let node_store = Arc::new(NodeStore::new(
            broker_id,
            nodes,
            update_log.clone(),
            dispatcher.clone(),
        ));
        let propagator = Arc::new(UpdatePropagator::new(broker_id, update_log.clone(), dispatcher));
        let compactor = LogCompactor::new(update_log, propagator.clone(), self.config.propagation.retention());

        let session_ids = SessionIdGenerator::new(broker_id);
        let own = Session::new(session_ids.next_id(), broker_id, self.config.session.timeout_ms);
        let monitor = Arc::new(SessionLivenessMonitor::new(
            own,
            sessions.clone(),
            node_store.clone(),
            self.config.session.stale_multiplier,
        ));

        info!(broker_id, backend = ?self.config.storage.backend, "broker built");

        Ok(Broker::new(
            Arc::new(self.config),
            node_store,
            propagator,
            compactor,
            dispatch_loop,
            monitor,
            sessions,
            session_ids,
            self.shutdown_signal,
        ))
    }

    fn repositories(&self) -> Result<Repositories> {
        if let (Some(nodes), Some(sessions), Some(update_log)) = (&self.nodes, &self.sessions, &self.update_log) {
            return Ok((nodes.clone(), sessions.clone(), update_log.clone()));
        }

        let (nodes, sessions, update_log) = self.default_repositories()?;
        Ok((
            self.nodes.clone().unwrap_or(nodes),
            self.sessions.clone().unwrap_or(sessions),
            self.update_log.clone().unwrap_or(update_log),
        ))
    }

    fn default_repositories(&self) -> Result<Repositories> {
        match self.config.storage.backend {
            StorageBackend::Memory => {
                debug!("using in-memory storage");
                let storage = Arc::new(MemoryStorage::new());
                Ok((storage.clone(), storage.clone(), storage))
            }
            StorageBackend::Sled => {
                let path = self.config.broker.data_dir.join(SLED_DB_DIR);
                create_parent_dir_if_not_exist(&path)?;
                let storage = Arc::new(SledStorage::open(path, self.config.storage.sled_cache_capacity)?);
                Ok((storage.clone(), storage.clone(), storage))
            }
        }
    }
}
