use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
///
/// Node ctime/mtime, session liveness and update-log timestamps all share
/// this coarse clock.
pub fn now_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        // Clock set before 1970
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
