//! Admission trait the HTTP gate is generic over.

use std::time::Instant;

use super::limiter::{Admission, Decision};

/// Trait for admission control implementations.
///
/// Decisions are synchronous and never fail; implementations must be safe to
/// call from many request-handling tasks at once.
pub trait AdmissionBackend: Send + Sync {
    /// Decide whether a request from `identifier` at `now` is admitted.
    fn admit(&self, identifier: &str, now: Instant) -> Decision;

    /// Decide, and report when a denied identifier may be admitted again if known.
    fn check(&self, identifier: &str, now: Instant) -> Admission {
        Admission {
            decision: self.admit(identifier, now),
            retry_after: None,
        }
    }
}
