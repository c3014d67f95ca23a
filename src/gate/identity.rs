//! Client identifier derivation.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

use crate::config::GateConfig;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Derives the rate limiting key for an inbound request.
///
/// Order: first `X-Forwarded-For` entry (only when trusted), then the peer
/// address, then a fixed fallback shared by every unidentified client.
#[derive(Debug, Clone)]
pub struct IdentitySource {
    trust_forwarded_for: bool,
    fallback: String,
}

impl IdentitySource {
    pub fn new(trust_forwarded_for: bool, fallback: impl Into<String>) -> Self {
        Self {
            trust_forwarded_for,
            fallback: fallback.into(),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.trust_forwarded_for, config.fallback_identifier.clone())
    }

    pub fn identify<B>(&self, request: &Request<B>) -> String {
        if self.trust_forwarded_for {
            if let Some(forwarded) = first_forwarded_for(request.headers()) {
                return forwarded.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
