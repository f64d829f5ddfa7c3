//! Sessions and the liveness monitor that reaps them.

mod liveness_monitor;
pub use liveness_monitor::*;

#[cfg(test)]
mod session_test;

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::time::now_ms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Process-local identity, primary key in the session repository
    pub uuid: String,
    /// Id stamped into `ephemeral_owner` of the session's nodes
    pub session_id: i64,
    /// Broker hosting the session
    pub broker_id: u32,
    pub timeout_ms: u64,
    pub start_time: i64,
    pub last_seen: i64,
}

impl Session {
    pub fn new(
        session_id: i64,
        broker_id: u32,
        timeout_ms: u64,
    ) -> Self {
        let now = now_ms();
        Self {
            uuid: nanoid::nanoid!(),
            session_id,
            broker_id,
            timeout_ms,
            start_time: now,
            last_seen: now,
        }
    }

    pub fn touch(
        &mut self,
        now: i64,
    ) {
        self.last_seen = self.last_seen.max(now);
    }
}

/// Hands out session ids unique across brokers.
///
/// The top byte carries the broker id, the rest starts from the current time
/// and counts up, so ids stay unique across restarts of the same broker.
#[derive(Debug)]
pub struct SessionIdGenerator {
    next: AtomicI64,
}

impl SessionIdGenerator {
    pub fn new(broker_id: u32) -> Self {
        Self::with_start(broker_id, now_ms())
    }

    pub fn with_start(
        broker_id: u32,
        start_ms: i64,
    ) -> Self {
        let seed = ((start_ms << 24) as u64 >> 8) as i64;
        let next = seed | ((broker_id as i64 & 0xff) << 56);
        Self {
            next: AtomicI64::new(next),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn broker_of(session_id: i64) -> u32 {
        ((session_id >> 56) & 0xff) as u32
    }
}
