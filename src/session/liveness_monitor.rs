//! Heartbeats this broker's sessions and reaps everybody's stale ones.
//!
//! Every broker sweeps the shared session table, so a session whose broker
//! died is cleaned up by whichever broker notices first. A stale session
//! stamped with this broker's id is reaped too unless it is the own session
//! or a hosted one: those point at a stalled heartbeat and are reported
//! instead. Anything else is a leftover of a previous run.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::SESSIONS_REAPED;
use crate::utils::time::now_ms;
use crate::Error;
use crate::NodeStore;
use crate::Result;
use crate::Session;
use crate::SessionRepository;
use crate::StorageError;
use crate::SystemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Created,
    Started,
    Stopped,
}

impl MonitorState {
    fn as_str(self) -> &'static str {
        match self {
            MonitorState::Created => "Created",
            MonitorState::Started => "Started",
            MonitorState::Stopped => "Stopped",
        }
    }
}

pub struct SessionLivenessMonitor {
    broker_id: u32,
    /// The broker's own session
    own: Mutex<Session>,
    /// Client sessions opened on this broker, by session id
    hosted: DashMap<i64, Session>,

    sessions: Arc<dyn SessionRepository>,
    node_store: Arc<NodeStore>,
    stale_multiplier: u32,

    state: Mutex<MonitorState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionLivenessMonitor {
    pub fn new(
        own: Session,
        sessions: Arc<dyn SessionRepository>,
        node_store: Arc<NodeStore>,
        stale_multiplier: u32,
    ) -> Self {
        Self {
            broker_id: own.broker_id,
            own: Mutex::new(own),
            hosted: DashMap::new(),
            sessions,
            node_store,
            stale_multiplier,
            state: Mutex::new(MonitorState::Created),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn own_session(&self) -> Session {
        self.own.lock().clone()
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.own.lock().timeout_ms)
    }

    /// Registers the own session, runs the startup sweep and spawns the
    /// heartbeat and sweep tasks.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != MonitorState::Created {
            return Err(SystemError::IllegalState {
                expected: MonitorState::Created.as_str(),
                actual: state.as_str(),
            }
            .into());
        }

        let own = self.own_session();
        self.sessions.insert(&own)?;
        let reaped = self.sweep()?;
        info!(
            broker_id = self.broker_id,
            session_id = own.session_id,
            reaped,
            "Session liveness monitor started"
        );

        let timeout = self.timeout();
        let heartbeat_every = (timeout / 2).max(Duration::from_millis(1));
        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_periodic(heartbeat_every, |m| {
            if let Err(e) = m.heartbeat() {
                warn!(error = ?e, "heartbeat failed");
            }
        }));
        tasks.push(self.spawn_periodic(timeout.max(Duration::from_millis(1)), |m| {
            if let Err(e) = m.sweep() {
                warn!(error = ?e, "session sweep failed");
            }
        }));

        *state = MonitorState::Started;
        Ok(())
    }

    fn spawn_periodic(
        self: &Arc<Self>,
        every: Duration,
        tick: fn(&SessionLivenessMonitor),
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately; start() already did that work
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(&monitor),
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// Tracks a client session for heartbeating. The record must already be
    /// in the session repository.
    pub fn host(
        &self,
        session: Session,
    ) {
        self.hosted.insert(session.session_id, session);
    }

    pub fn unhost(
        &self,
        session_id: i64,
    ) -> Option<Session> {
        self.hosted.remove(&session_id).map(|(_, s)| s)
    }

    pub fn hosted(
        &self,
        session_id: i64,
    ) -> Option<Session> {
        self.hosted.get(&session_id).map(|s| s.clone())
    }

    /// Refreshes `last_seen` of a hosted session on client activity.
    pub fn touch(
        &self,
        session_id: i64,
    ) -> Result<()> {
        let session = {
            let mut entry = self
                .hosted
                .get_mut(&session_id)
                .ok_or_else(|| StorageError::NotFound(format!("session {session_id}")))?;
            entry.touch(now_ms());
            entry.clone()
        };
        self.sessions.update(&session)
    }

    /// Refreshes every session hosted here, the broker's own first.
    pub fn heartbeat(&self) -> Result<()> {
        let now = now_ms();

        let own = {
            let mut own = self.own.lock();
            own.touch(now);
            own.clone()
        };
        match self.sessions.update(&own) {
            Err(Error::System(SystemError::Storage(StorageError::NotFound(_)))) => {
                // swept by a peer while we were stalled
                warn!(uuid = %own.uuid, "own session record missing, re-registering");
                self.sessions.insert(&own)?;
            }
            other => other?,
        }

        for mut entry in self.hosted.iter_mut() {
            entry.touch(now);
            if let Err(e) = self.sessions.update(entry.value()) {
                warn!(session_id = entry.session_id, error = ?e, "failed to refresh hosted session");
            }
        }
        debug!(broker_id = self.broker_id, hosted = self.hosted.len(), "heartbeat");
        Ok(())
    }

    /// Reaps sessions not seen for `stale_multiplier` timeouts. Returns how
    /// many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let timeout_ms = self.own.lock().timeout_ms as i64;
        let threshold = now_ms() - self.stale_multiplier as i64 * timeout_ms;
        let own_uuid = self.own.lock().uuid.clone();

        let mut reaped = 0;
        for session in self.sessions.list_stale(threshold)? {
            let live_here = session.broker_id == self.broker_id
                && (session.uuid == own_uuid || self.hosted.contains_key(&session.session_id));
            if live_here {
                warn!(
                    session_id = session.session_id,
                    last_seen = session.last_seen,
                    "own session is stale, heartbeat lagging; skipping"
                );
                continue;
            }

            if self.reap(&session) {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    fn reap(
        &self,
        session: &Session,
    ) -> bool {
        if let Err(e) = self.node_store.remove_ephemeral_nodes_of(session.session_id) {
            // the record stays so the next sweep retries its nodes
            error!(session_id = session.session_id, error = ?e, "failed to reap ephemeral nodes");
            return false;
        }
        if let Err(e) = self.sessions.delete(&session.uuid) {
            error!(uuid = %session.uuid, error = ?e, "failed to delete stale session");
            return false;
        }

        SESSIONS_REAPED.inc();
        info!(
            session_id = session.session_id,
            broker_id = session.broker_id,
            "stale session reaped"
        );
        true
    }

    /// Stops both tasks and removes the own session record. Never fails.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == MonitorState::Stopped {
                return;
            }
            *state = MonitorState::Stopped;
        }

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = ?e, "liveness task ended abnormally");
            }
        }

        let uuid = self.own.lock().uuid.clone();
        match self.sessions.delete(&uuid) {
            Ok(()) => debug!(%uuid, "own session record removed"),
            Err(e) => warn!(%uuid, error = ?e, "failed to remove own session record"),
        }
        info!(broker_id = self.broker_id, "Session liveness monitor stopped");
    }
}
