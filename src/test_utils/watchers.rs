use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::WatchedEvent;
use crate::Watcher;
use crate::WatcherHandle;

/// Keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingWatcher {
    events: Mutex<Vec<WatchedEvent>>,
}

impl RecordingWatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<WatchedEvent> {
        self.events.lock().clone()
    }

    /// Polls until at least `n` events arrived. Panics after one second.
    pub async fn wait_for(
        &self,
        n: usize,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while self.events.lock().len() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {n} events, got {:?}",
                self.events()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Watcher for RecordingWatcher {
    fn process(
        &self,
        event: &WatchedEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}

pub struct PanickingWatcher;

impl Watcher for PanickingWatcher {
    fn process(
        &self,
        _event: &WatchedEvent,
    ) {
        panic!("watcher exploded");
    }
}

pub fn recording_handle(session_id: i64) -> (WatcherHandle, Arc<RecordingWatcher>) {
    let recorder = RecordingWatcher::new();
    (WatcherHandle::new(session_id, recorder.clone()), recorder)
}
