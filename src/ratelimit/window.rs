//! Per-client fixed window.

use std::time::{Duration, Instant};

use super::limiter::Decision;

/// Counting window for a single client identifier.
///
/// The window is anchored at the first request it admits and is reinitialized,
/// not removed, once more than one window length has elapsed since then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindow {
    /// Requests admitted in the current window
    count: u32,
    /// When the current window began
    window_start: Instant,
}

impl ClientWindow {
    /// Open a window holding one admitted request.
    pub fn open(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    /// Record a request at `now` and decide whether it is admitted.
    ///
    /// Denied requests do not count, so `count` never exceeds `limit`.
    pub fn record(&mut self, now: Instant, limit: u32, window: Duration) -> Decision {
        if self.is_expired(now, window) {
            *self = Self::open(now);
            return Decision::Allow;
        }

        if self.count < limit {
            self.count += 1;
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    /// Whether strictly more than `window` has elapsed since the window began.
    ///
    /// A `now` earlier than the window start counts as no time elapsed.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.elapsed(now) > window
    }

    /// Time until the window expires, or `None` if it already has.
    pub fn duration_until_reset(&self, now: Instant, window: Duration) -> Option<Duration> {
        if self.is_expired(now, window) {
            None
        } else {
            Some(window - self.elapsed(now))
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    #[cfg(test)]
    fn window_start(&self) -> Instant {
        self.window_start
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }
}
