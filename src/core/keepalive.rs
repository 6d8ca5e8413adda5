// src/core/keepalive.rs

//! Tracks how long the connection has been idle.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// The time of the last successful write, shared by every command path.
///
/// Uses the tokio clock so tests can drive it with a paused runtime.
#[derive(Debug, Default)]
pub struct KeepAliveState {
    last_command: Mutex<Option<Instant>>,
}

impl KeepAliveState {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a successful write.
    pub fn touch(&self) {
        *self.last_command.lock() = Some(Instant::now());
    }

    pub fn last_command_time(&self) -> Option<Instant> {
        *self.last_command.lock()
    }

    /// Time elapsed since the last successful write, or `None` if nothing has
    /// been written yet (treated as idle forever).
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_command_time()
            .map(|last| now.saturating_duration_since(last))
    }

    /// Returns true when the connection has been idle for longer than `threshold`.
    pub fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        self.idle_for(now).is_none_or(|idle| idle > threshold)
    }
}
