//! HTTP admission layer: path selection, client identification and denial.

mod identity;
mod matcher;
mod middleware;

pub use identity::IdentitySource;
pub use matcher::PathMatcher;
pub use middleware::{admission, Gate, RejectBody};
