//! Owned one-shot / repeating timer for the channel worker.
//!
//! A [`Timer`] holds at most one armed deadline. Arming always replaces
//! the previous deadline, so a worker holding one timer per purpose can
//! never have two pending firings of the same kind.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

struct Armed {
    sleep: Pin<Box<Sleep>>,
    /// `Some` for repeating timers.
    period: Option<Duration>,
}

/// A cancellable timer driven from a `tokio::select!` loop.
pub(crate) struct Timer {
    name: &'static str,
    armed: Option<Armed>,
}

impl Timer {
    /// Create an idle timer. `name` is only used for logging.
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name, armed: None }
    }

    /// Arm a one-shot deadline after `delay`, replacing any armed deadline.
    pub(crate) fn schedule(&mut self, delay: Duration) {
        self.arm(delay, None);
    }

    /// Arm a repeating deadline every `period`, replacing any armed
    /// deadline. The first firing happens one period from now.
    pub(crate) fn schedule_repeating(&mut self, period: Duration) {
        self.arm(period, Some(period));
    }

    /// Disarm the timer. Returns `true` if a deadline was pending.
    pub(crate) fn cancel(&mut self) -> bool {
        let was_armed = self.armed.take().is_some();
        if was_armed {
            tracing::trace!(timer = self.name, "Timer cancelled");
        }
        was_armed
    }

    /// Returns `true` while a deadline is pending.
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Wait for the armed deadline.
    ///
    /// Pends forever while idle. Cancel-safe: dropping the future keeps the
    /// deadline armed. One-shot timers disarm after firing; repeating
    /// timers re-arm for the next period.
    pub(crate) async fn expired(&mut self) {
        let period = match self.armed.as_mut() {
            Some(armed) => {
                armed.sleep.as_mut().await;
                armed.period
            },
            None => future::pending().await,
        };

        match period {
            Some(period) => {
                if let Some(armed) = self.armed.as_mut() {
                    armed.sleep = Box::pin(sleep(period));
                }
            },
            None => self.armed = None,
        }
        tracing::trace!(timer = self.name, "Timer fired");
    }

    fn arm(&mut self, delay: Duration, period: Option<Duration>) {
        self.cancel();
        tracing::trace!(
            timer = self.name,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            repeating = period.is_some(),
            "Timer armed"
        );
        self.armed = Some(Armed {
            sleep: Box::pin(sleep(delay)),
            period,
        });
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("armed", &self.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, advance};

    use super::*;

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected.saturating_add(Duration::from_millis(5)),
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_disarms() {
        let mut timer = Timer::new("test");
        let start = Instant::now();
        timer.schedule(Duration::from_millis(1000));
        assert!(timer.is_armed());

        timer.expired().await;
        assert_elapsed(start, Duration::from_millis(1000));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_rearms_after_each_firing() {
        let mut timer = Timer::new("test");
        let start = Instant::now();
        timer.schedule_repeating(Duration::from_secs(30));

        timer.expired().await;
        assert_elapsed(start, Duration::from_secs(30));
        assert!(timer.is_armed());

        timer.expired().await;
        assert_elapsed(start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_deadline() {
        let mut timer = Timer::new("test");
        let start = Instant::now();
        timer.schedule(Duration::from_millis(100));
        timer.schedule(Duration::from_millis(500));

        timer.expired().await;
        assert_elapsed(start, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_never_fires() {
        let mut timer = Timer::new("test");
        let result = tokio::time::timeout(Duration::from_secs(3600), timer.expired()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reports_whether_armed() {
        let mut timer = Timer::new("test");
        assert!(!timer.cancel());
        timer.schedule(Duration::from_secs(1));
        assert!(timer.cancel());
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_keeps_deadline() {
        let mut timer = Timer::new("test");
        let start = Instant::now();
        timer.schedule(Duration::from_millis(1000));

        let early = tokio::time::timeout(Duration::from_millis(400), timer.expired()).await;
        assert!(early.is_err());
        assert!(timer.is_armed());

        advance(Duration::from_millis(100)).await;
        timer.expired().await;
        assert_elapsed(start, Duration::from_millis(1000));
    }
}
