use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Default spacing between outbound forward/send calls.
pub const DEFAULT_PACE_INTERVAL: Duration = Duration::from_secs(3);

/// Fixed-interval limiter for the consumer stage.
///
/// Each `wait` reserves the next slot; consecutive slots are at least `interval`
/// apart no matter how long the work between them took. Slots that were missed
/// are not made up in a burst.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot and return how long to wait before using it.
    fn reserve_at(&mut self, now: Instant) -> (Instant, Duration) {
        let start = match self.next {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next = Some(start + self.interval);
        (start, start.saturating_duration_since(now))
    }

    /// Wait for the next slot. Returns `false` if `cancel` fired first; the slot is
    /// then left unused.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let (start, wait) = self.reserve_at(Instant::now());
        if wait.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep_until(start) => true,
        }
    }
}
