//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g. `TURNSTILE_RATE_LIMITING__LIMIT=10`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Stale window eviction
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Which requests are checked and what a denial looks like
    #[serde(default)]
    pub gate: GateConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum admits per client per window
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl RateLimitingConfig {
    /// The window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_limit() -> u32 {
    5
}

fn default_window_ms() -> u64 {
    10_000
}

/// Background sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the sweep task runs at all
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Windows older than this many window lengths are evicted
    #[serde(default = "default_retention_windows")]
    pub retention_windows: u32,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Age beyond which a window is removed, given the configured window length.
    pub fn retention(&self, window: Duration) -> Duration {
        window.saturating_mul(self.retention_windows)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval(),
            retention_windows: default_retention_windows(),
        }
    }
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_retention_windows() -> u32 {
    3
}

/// Gate configuration: path selection, client identification, denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Path patterns subject to admission checks. `/x` is exact, `/x/*` is a prefix.
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,

    /// Use the first `X-Forwarded-For` entry as the client identifier
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Identifier used when no client address is available
    #[serde(default = "default_fallback_identifier")]
    pub fallback_identifier: String,

    /// What a denied request receives
    #[serde(default)]
    pub deny: DenyAction,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            paths: default_paths(),
            trust_forwarded_for: false,
            fallback_identifier: default_fallback_identifier(),
            deny: DenyAction::default(),
        }
    }
}

fn default_paths() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_fallback_identifier() -> String {
    "127.0.0.1".to_string()
}

/// Response given to a denied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DenyAction {
    /// Temporary redirect to a fixed location
    Redirect {
        #[serde(default = "default_blocked_location")]
        location: String,
    },
    /// Respond directly with an error status
    Reject {
        #[serde(default = "default_reject_status")]
        status: u16,
    },
}

impl Default for DenyAction {
    fn default() -> Self {
        DenyAction::Redirect {
            location: default_blocked_location(),
        }
    }
}

fn default_blocked_location() -> String {
    "/blocked".to_string()
}

fn default_reject_status() -> u16 {
    429
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus `TURNSTILE_*` environment overrides.
    ///
    /// Nested keys use a double underscore: `TURNSTILE_SWEEP__INTERVAL_SECS=5`.
    /// The result is not validated, so callers can apply further overrides
    /// (command line flags) before calling [`TurnstileConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`TurnstileConfig::load`], reading overrides from `env` instead of
    /// the process environment when it is given.
    fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values a limiter cannot meaningfully run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.limit == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.limit must be at least 1".to_string(),
            ));
        }
        if self.rate_limiting.window_ms == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.window_ms must be greater than 0".to_string(),
            ));
        }

        if self.sweep.enabled {
            if self.sweep.interval_secs == 0 {
                return Err(TurnstileError::Config(
                    "sweep.interval_secs must be greater than 0".to_string(),
                ));
            }
            // Anything shorter would evict windows that are still counting.
            if self.sweep.retention_windows == 0 {
                return Err(TurnstileError::Config(
                    "sweep.retention_windows must be at least 1".to_string(),
                ));
            }
        }

        if let Some(bad) = self.gate.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(TurnstileError::Config(format!(
                "gate.paths entry {:?} must start with '/'",
                bad
            )));
        }

        match &self.gate.deny {
            DenyAction::Redirect { location } if location.is_empty() => Err(
                TurnstileError::Config("gate.deny.location must not be empty".to_string()),
            ),
            DenyAction::Reject { status } if !(400..=599).contains(status) => {
                Err(TurnstileError::Config(format!(
                    "gate.deny.status {} is not an error status",
                    status
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = TurnstileConfig::default();
        assert_eq!(config.rate_limiting.limit, 5);
        assert_eq!(config.rate_limiting.window(), Duration::from_secs(10));
        assert_eq!(config.gate.paths, vec!["/".to_string()]);
        assert_eq!(config.gate.fallback_identifier, "127.0.0.1");
        assert_eq!(
            config.gate.deny,
            DenyAction::Redirect {
                location: "/blocked".to_string()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:8088"
rate_limiting:
  limit: 20
  window_ms: 60000
sweep:
  enabled: true
  interval_secs: 15
  retention_windows: 4
gate:
  paths: ["/", "/restore/*"]
  trust_forwarded_for: true
  fallback_identifier: anonymous
  deny:
    action: reject
    status: 503
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8088);
        assert_eq!(config.rate_limiting.limit, 20);
        assert_eq!(config.sweep.interval(), Duration::from_secs(15));
        assert_eq!(
            config.sweep.retention(config.rate_limiting.window()),
            Duration::from_secs(240)
        );
        assert_eq!(config.gate.paths.len(), 2);
        assert!(config.gate.trust_forwarded_for);
        assert_eq!(config.gate.deny, DenyAction::Reject { status: 503 });
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
gate:
  deny:
    action: reject
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.limit, 5);
        assert!(config.sweep.enabled);
        assert_eq!(config.gate.deny, DenyAction::Reject { status: 429 });
    }

    #[test]
    fn test_rejects_zero_limit() {
        let err = TurnstileConfig::from_yaml("rate_limiting:\n  limit: 0\n").unwrap_err();
        assert!(matches!(err, TurnstileError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_window() {
        assert!(TurnstileConfig::from_yaml("rate_limiting:\n  window_ms: 0\n").is_err());
    }

    #[test]
    fn test_rejects_zero_retention_only_when_sweeping() {
        assert!(TurnstileConfig::from_yaml("sweep:\n  retention_windows: 0\n").is_err());
        assert!(
            TurnstileConfig::from_yaml("sweep:\n  enabled: false\n  retention_windows: 0\n")
                .is_ok()
        );
    }

    #[test]
    fn test_rejects_non_error_status() {
        let yaml = "gate:\n  deny:\n    action: reject\n    status: 200\n";
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_relative_path_pattern() {
        assert!(TurnstileConfig::from_yaml("gate:\n  paths: [\"restore\"]\n").is_err());
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        assert!(TurnstileConfig::from_yaml("rate_limiting: [").is_err());
    }

    fn env(vars: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_load_file_with_env_override() {
        let path = std::env::temp_dir().join(format!("turnstile-test-{}.yaml", std::process::id()));
        std::fs::write(&path, "rate_limiting:\n  limit: 9\n  window_ms: 1000\n").unwrap();

        let config = TurnstileConfig::load_with_env(
            Some(&path),
            env(&[("TURNSTILE_RATE_LIMITING__WINDOW_MS", "2500")]),
        );
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.limit, 9);
        assert_eq!(config.rate_limiting.window_ms, 2500);
    }

    #[test]
    fn test_invalid_env_value_can_be_overridden_before_validation() {
        let mut config =
            TurnstileConfig::load_with_env(None, env(&[("TURNSTILE_RATE_LIMITING__LIMIT", "0")]))
                .unwrap();
        assert_eq!(config.rate_limiting.limit, 0);
        assert!(config.validate().is_err());

        // A --limit flag applied after loading replaces the bad value.
        config.rate_limiting.limit = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_sources_uses_defaults() {
        let config = TurnstileConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.rate_limiting.limit, 5);
        assert_eq!(config.gate.paths, vec!["/".to_string()]);
    }
}
