//! Heartbeat pulse for keeping an open connection alive.
//!
//! While the channel is open the worker sends a `ping` frame every
//! interval; `pong` replies refresh the session's activity clock. The
//! state machine alone decides when the heartbeat starts and stops.

use std::time::Duration;

use tracing::debug;

use crate::timer::Timer;

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Repeating heartbeat timer.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    timer: Timer,
}

impl Heartbeat {
    /// Create a stopped heartbeat.
    pub(crate) fn new() -> Self {
        Self {
            timer: Timer::new("heartbeat"),
        }
    }

    /// Start pulsing every `interval`. Any running pulse is stopped first.
    pub(crate) fn start(&mut self, interval: Duration) {
        self.stop();
        debug!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Heartbeat started"
        );
        self.timer.schedule_repeating(interval);
    }

    /// Stop pulsing. Idempotent.
    pub(crate) fn stop(&mut self) {
        if self.timer.cancel() {
            debug!("Heartbeat stopped");
        }
    }

    /// Returns `true` while the heartbeat is running.
    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.timer.is_armed()
    }

    /// Wait for the next pulse. Pends forever while stopped.
    pub(crate) async fn tick(&mut self) {
        self.timer.expired().await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pulses_every_interval() {
        let mut heartbeat = Heartbeat::new();
        let start = Instant::now();
        heartbeat.start(Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS));

        heartbeat.tick().await;
        heartbeat.tick().await;
        heartbeat.tick().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90));
        assert!(elapsed < Duration::from_millis(90_010));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let mut heartbeat = Heartbeat::new();
        heartbeat.start(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(20)).await;

        // Restarting pushes the next pulse a full interval out.
        heartbeat.start(Duration::from_secs(30));
        let early = tokio::time::timeout(Duration::from_secs(15), heartbeat.tick()).await;
        assert!(early.is_err());
        assert!(heartbeat.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_heartbeat_never_pulses() {
        let mut heartbeat = Heartbeat::new();
        heartbeat.start(Duration::from_secs(30));
        heartbeat.stop();
        heartbeat.stop();
        assert!(!heartbeat.is_running());

        let result = tokio::time::timeout(Duration::from_secs(120), heartbeat.tick()).await;
        assert!(result.is_err());
    }
}
