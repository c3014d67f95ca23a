//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// The admission decision itself never fails; these cover everything around it.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (config files, listener bind, serving)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
