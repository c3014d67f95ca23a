//! Turnstile - fixed-window admission control
//!
//! This crate limits how many requests each client may make per time window.
//! The core is [`ratelimit::Limiter`], an in-process limiter that takes a
//! client identifier and a timestamp and answers allow or deny. The [`gate`]
//! module wraps it as axum middleware for HTTP services.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub mod server;
