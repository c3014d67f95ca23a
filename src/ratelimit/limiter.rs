//! Core fixed-window limiter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::AdmissionBackend;
use super::window::ClientWindow;
use crate::config::RateLimitingConfig;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request may proceed
    Allow,
    /// The client is over its limit for the current window
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// A decision together with when a denied client may try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub decision: Decision,
    /// Time until the window that denied the request expires; `None` when allowed
    pub retry_after: Option<Duration>,
}

/// Per-client fixed-window rate limiter.
///
/// One lock guards the whole table so that the check and the increment for an
/// identifier happen as a single step. Share it across tasks with an `Arc`.
pub struct Limiter {
    /// Windows indexed by client identifier
    windows: Mutex<HashMap<String, ClientWindow>>,
    /// Maximum admits per window
    limit: u32,
    /// Window length
    window: Duration,
}

impl Limiter {
    /// Create a limiter admitting `limit` requests per `window` for each identifier.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Create a limiter from the rate limiting section of the configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.limit, config.window())
    }

    /// Decide whether a request from `identifier` at `now` is admitted.
    ///
    /// The empty identifier is an ordinary key, so callers without an address
    /// all share one counter.
    pub fn admit(&self, identifier: &str, now: Instant) -> Decision {
        self.check(identifier, now).decision
    }

    /// Like [`Limiter::admit`], also reporting the retry delay of a denial.
    ///
    /// Both come from the same lock acquisition, so the delay always describes
    /// the window that made the decision.
    pub fn check(&self, identifier: &str, now: Instant) -> Admission {
        let mut windows = self.windows.lock();

        let admission = match windows.get_mut(identifier) {
            Some(window) => {
                let reset = window.is_expired(now, self.window);
                let decision = window.record(now, self.limit, self.window);
                if reset {
                    debug!(identifier = %identifier, "Window expired, starting a new one");
                }
                let retry_after = match decision {
                    Decision::Allow => None,
                    Decision::Deny => window.duration_until_reset(now, self.window),
                };
                Admission {
                    decision,
                    retry_after,
                }
            }
            None => {
                debug!(
                    identifier = %identifier,
                    limit = self.limit,
                    window_ms = self.window.as_millis() as u64,
                    "Opening window for new client"
                );
                windows.insert(identifier.to_owned(), ClientWindow::open(now));
                Admission {
                    decision: Decision::Allow,
                    retry_after: None,
                }
            }
        };

        trace!(identifier = %identifier, decision = ?admission.decision, "Admission checked");
        admission
    }

    /// Time until the identifier's current window expires.
    ///
    /// Returns `None` for unseen identifiers or windows that have already expired.
    pub fn retry_after(&self, identifier: &str, now: Instant) -> Option<Duration> {
        let windows = self.windows.lock();
        windows
            .get(identifier)
            .and_then(|w| w.duration_until_reset(now, self.window))
    }

    /// Remove windows that began more than `retention` before `now`.
    ///
    /// Returns the number of windows removed.
    pub fn evict_stale(&self, now: Instant, retention: Duration) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now, retention));
        before - windows.len()
    }

    /// Get the current count for an identifier.
    ///
    /// Returns `None` if the identifier has never been seen.
    pub fn count(&self, identifier: &str) -> Option<u32> {
        self.windows.lock().get(identifier).map(|w| w.count())
    }

    /// Get the number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every window.
    pub fn clear(&self) {
        self.windows.lock().clear();
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}

impl AdmissionBackend for Limiter {
    fn admit(&self, identifier: &str, now: Instant) -> Decision {
        Limiter::admit(self, identifier, now)
    }

    fn check(&self, identifier: &str, now: Instant) -> Admission {
        Limiter::check(self, identifier, now)
    }
}
