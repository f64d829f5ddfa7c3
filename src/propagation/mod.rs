//! Cross-broker change propagation over the shared update log.

mod compactor;
mod propagator;

pub use compactor::*;
pub use propagator::*;


use serde::Deserialize;
use serde::Serialize;

use crate::EventType;
use crate::WatchedEvent;

/// One node event as recorded in the shared update log.
///
/// Equality covers every field: two records with the same path and
/// timestamp from different brokers are different updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub event_type: EventType,
    pub path: String,
    /// Wall clock of the origin broker, ms
    pub timestamp: i64,
    pub origin_broker: u32,
}

impl NodeUpdate {
    pub fn new(
        event_type: EventType,
        path: impl Into<String>,
        timestamp: i64,
        origin_broker: u32,
    ) -> Self {
        Self {
            event_type,
            path: path.into(),
            timestamp,
            origin_broker,
        }
    }

    pub fn to_event(&self) -> WatchedEvent {
        WatchedEvent::node(self.event_type, self.path.clone())
    }
}
