//! Rate limiting logic and state management.

mod backend;
mod limiter;
mod sweep;
mod window;

pub use backend::AdmissionBackend;
pub use limiter::{Admission, Decision, Limiter};
pub use sweep::Sweeper;
pub use window::ClientWindow;
