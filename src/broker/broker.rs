use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics;
use crate::DispatchLoop;
use crate::KeeperConfig;
use crate::LogCompactor;
use crate::NodeStore;
use crate::Result;
use crate::Session;
use crate::SessionIdGenerator;
use crate::SessionLivenessMonitor;
use crate::SessionRepository;
use crate::SystemError;
use crate::UpdatePropagator;

/// One running coordination broker.
pub struct Broker {
    config: Arc<KeeperConfig>,
    node_store: Arc<NodeStore>,
    propagator: Arc<UpdatePropagator>,
    monitor: Arc<SessionLivenessMonitor>,
    sessions: Arc<dyn SessionRepository>,
    session_ids: SessionIdGenerator,

    // Consumed by the first `run`
    compactor: Mutex<Option<LogCompactor>>,
    dispatch_loop: Mutex<Option<DispatchLoop>>,

    shutdown_signal: watch::Receiver<()>,
}

impl Broker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<KeeperConfig>,
        node_store: Arc<NodeStore>,
        propagator: Arc<UpdatePropagator>,
        compactor: LogCompactor,
        dispatch_loop: DispatchLoop,
        monitor: Arc<SessionLivenessMonitor>,
        sessions: Arc<dyn SessionRepository>,
        session_ids: SessionIdGenerator,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            node_store,
            propagator,
            monitor,
            sessions,
            session_ids,
            compactor: Mutex::new(Some(compactor)),
            dispatch_loop: Mutex::new(Some(dispatch_loop)),
            shutdown_signal,
        }
    }

    pub fn broker_id(&self) -> u32 {
        self.config.broker.broker_id
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn node_store(&self) -> &Arc<NodeStore> {
        &self.node_store
    }

    pub fn propagator(&self) -> &Arc<UpdatePropagator> {
        &self.propagator
    }

    pub fn monitor(&self) -> &Arc<SessionLivenessMonitor> {
        &self.monitor
    }

    /// Starts the liveness monitor and the background tasks, then waits for
    /// the shutdown signal.
    ///
    /// # Errors
    /// `SystemError::IllegalState` when called a second time, or whatever
    /// the monitor's startup sweep fails with.
    pub async fn run(&self) -> Result<()> {
        let (dispatch_loop, compactor) = match (self.dispatch_loop.lock().take(), self.compactor.lock().take()) {
            (Some(dispatch_loop), Some(compactor)) => (dispatch_loop, compactor),
            _ => {
                return Err(SystemError::IllegalState {
                    expected: "built",
                    actual: "already run",
                }
                .into())
            }
        };

        self.monitor.start()?;

        let propagation = &self.config.propagation;
        let mut tasks = vec![
            tokio::spawn(dispatch_loop.run(self.shutdown_signal.clone())),
            tokio::spawn(
                self.propagator
                    .clone()
                    .run(propagation.poll_interval(), self.shutdown_signal.clone()),
            ),
            tokio::spawn(compactor.run(propagation.compaction_interval(), self.shutdown_signal.clone())),
        ];

        if self.config.monitoring.prometheus_enabled {
            tasks.push(tokio::spawn(metrics::start_server(
                self.config.monitoring.listen_addr(),
                self.shutdown_signal.clone(),
            )));
        }

        info!(broker_id = self.broker_id(), "Broker started");

        let mut shutdown = self.shutdown_signal.clone();
        if shutdown.changed().await.is_err() {
            debug!("shutdown sender dropped");
        }

        info!(broker_id = self.broker_id(), "Broker shutting down");
        self.monitor.stop().await;

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = ?e, "background task ended abnormally");
            }
        }

        info!(broker_id = self.broker_id(), "Broker stopped");
        Ok(())
    }

    /// Registers a new client session hosted by this broker.
    pub fn open_session(
        &self,
        timeout_ms: u64,
    ) -> Result<Session> {
        let session = Session::new(self.session_ids.next_id(), self.broker_id(), timeout_ms);
        self.sessions.insert(&session)?;
        self.monitor.host(session.clone());

        debug!(session_id = session.session_id, timeout_ms, "session opened");
        Ok(session)
    }

    /// Records client activity on a hosted session.
    pub fn touch_session(
        &self,
        session_id: i64,
    ) -> Result<()> {
        self.monitor.touch(session_id)
    }

    /// Closes a session explicitly: its ephemeral nodes go, its watchers see
    /// `Closed` and its record is removed.
    ///
    /// The session stays hosted if ephemeral cleanup fails, so the close can
    /// be retried.
    pub fn close_session(
        &self,
        session_id: i64,
    ) -> Result<()> {
        self.node_store.close(session_id)?;

        if let Some(session) = self.monitor.unhost(session_id) {
            self.sessions.delete(&session.uuid)?;
        }

        info!(session_id, "session closed");
        Ok(())
    }
}
