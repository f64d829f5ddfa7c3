//! One-shot watches on the node tree.
//!
//! ```text
//! NodeStore mutation / UpdatePropagator
//!   └─> EventDispatcher::dispatch(event)
//!         ├─> WatchRegistry::materialize()   [consumes matching watches]
//!         └─> queue.send((watcher, event))   [non-blocking]
//!                   ↓
//! DispatchLoop::run()  [single consumer, enqueue order]
//!   └─> watcher.process(&event)
//! ```

mod dispatcher;
mod registry;

pub use dispatcher::*;
pub use registry::*;


use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

/// Kind of change a watched event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Connection state change, carries no path
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    DataWatchRemoved,
    ChildWatchRemoved,
}

impl EventType {
    pub fn code(self) -> i32 {
        match self {
            EventType::None => -1,
            EventType::NodeCreated => 1,
            EventType::NodeDeleted => 2,
            EventType::NodeDataChanged => 3,
            EventType::NodeChildrenChanged => 4,
            EventType::DataWatchRemoved => 5,
            EventType::ChildWatchRemoved => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(EventType::None),
            1 => Some(EventType::NodeCreated),
            2 => Some(EventType::NodeDeleted),
            3 => Some(EventType::NodeDataChanged),
            4 => Some(EventType::NodeChildrenChanged),
            5 => Some(EventType::DataWatchRemoved),
            6 => Some(EventType::ChildWatchRemoved),
            _ => None,
        }
    }

    /// Events produced by node-tree mutations
    pub fn is_node_event(self) -> bool {
        matches!(
            self,
            EventType::NodeCreated
                | EventType::NodeDeleted
                | EventType::NodeDataChanged
                | EventType::NodeChildrenChanged
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::None => "none",
            EventType::NodeCreated => "node_created",
            EventType::NodeDeleted => "node_deleted",
            EventType::NodeDataChanged => "node_data_changed",
            EventType::NodeChildrenChanged => "node_children_changed",
            EventType::DataWatchRemoved => "data_watch_removed",
            EventType::ChildWatchRemoved => "child_watch_removed",
        }
    }
}

/// Connection state delivered with every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeeperState {
    Disconnected,
    SyncConnected,
    AuthFailed,
    ConnectedReadOnly,
    Expired,
    Closed,
}

impl KeeperState {
    pub fn code(self) -> i32 {
        match self {
            KeeperState::Disconnected => 0,
            KeeperState::SyncConnected => 3,
            KeeperState::AuthFailed => 4,
            KeeperState::ConnectedReadOnly => 5,
            KeeperState::Expired => -112,
            KeeperState::Closed => 7,
        }
    }
}

/// Watch category a read operation arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Data,
    Child,
    Exist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub state: KeeperState,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn node(
        event_type: EventType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    pub fn connection(state: KeeperState) -> Self {
        Self {
            event_type: EventType::None,
            state,
            path: None,
        }
    }
}

/// Callback receiving watch events.
///
/// Invoked from the dispatch loop (or the caller's thread for synchronous
/// delivery). Implementations must not block for long and must not panic;
/// a panicking watcher is cut off from further deliveries.
pub trait Watcher: Send + Sync + 'static {
    fn process(
        &self,
        event: &WatchedEvent,
    );
}

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a watcher inside the registry.
///
/// Two handles are equal when they share the same id, whatever the
/// callback. Cloning keeps the identity.
#[derive(Clone)]
pub struct WatcherHandle {
    id: u64,
    session_id: i64,
    watcher: Arc<dyn Watcher>,
}

impl WatcherHandle {
    pub fn new(
        session_id: i64,
        watcher: Arc<dyn Watcher>,
    ) -> Self {
        let id = NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed);
        trace!(watcher_id = id, session_id, "watcher handle created");
        Self {
            id,
            session_id,
            watcher,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub(crate) fn process(
        &self,
        event: &WatchedEvent,
    ) {
        self.watcher.process(event)
    }
}

impl PartialEq for WatcherHandle {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for WatcherHandle {}

impl Hash for WatcherHandle {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.id.hash(state)
    }
}

impl fmt::Debug for WatcherHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Paths to re-arm in one call, e.g. after a client reconnects
#[derive(Debug, Clone, Default)]
pub struct WatchPaths {
    pub data: Vec<String>,
    pub exist: Vec<String>,
    pub child: Vec<String>,
}

/// Forwards events into an unbounded channel.
///
/// Connection handlers own the receiving side and turn events into wire
/// notifications.
#[derive(Debug, Clone)]
pub struct ChannelWatcher {
    sender: mpsc::UnboundedSender<WatchedEvent>,
}

impl ChannelWatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatchedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Watcher for ChannelWatcher {
    fn process(
        &self,
        event: &WatchedEvent,
    ) {
        // Receiver gone means the connection is closed
        let _ = self.sender.send(event.clone());
    }
}
