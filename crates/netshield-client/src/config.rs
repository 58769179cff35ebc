//! Client configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it wants
//! to override:
//!
//! ```toml
//! url = "ws://10.0.0.5:5000/ws"
//! keepalive_interval_ms = 25000
//!
//! [reconnect]
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//! ```

use crate::error::ConfigError;
use netshield_core::LIVENESS_PROBE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Endpoint used when none is configured.
pub const DEFAULT_URL: &str = "ws://localhost:5000/ws";
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend event-stream endpoint.
    pub url: String,
    /// Interval between liveness probes while open.
    pub keepalive_interval_ms: u64,
    /// Text of the liveness probe frame.
    pub ping_text: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            ping_text: LIVENESS_PROBE.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Default config pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("url cannot be empty".into()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_ms must be greater than zero".into(),
            ));
        }
        self.reconnect.validate()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Exponential backoff between automatic reconnect attempts.
///
/// The n-th scheduled attempt (1-based) waits
/// `min(max_delay_ms, base_delay_ms * 2^(n-1))`, so the first retry comes
/// after one base delay. After `max_attempts` consecutive failures the
/// manager stops retrying on its own.
///
/// With the defaults the schedule is 1, 2, 4, 8, 16 s and the 30 s cap is
/// never reached; it only applies when `max_attempts` is raised past 5 or
/// `base_delay_ms` is increased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before scheduled attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether another automatic attempt is allowed after `attempts` so far.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must be at least base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backoff_schedule() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn backoff_caps_at_max() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(100), Duration::from_millis(30_000));
    }

    #[test]
    fn attempt_budget() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = ClientConfig::from_toml_str(
            r#"
            url = "ws://10.0.0.5:5000/ws"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "ws://10.0.0.5:5000/ws");
        assert_eq!(config.keepalive_interval_ms, 25_000);
        assert_eq!(config.ping_text, "ping");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(ClientConfig::from_toml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            ClientConfig::from_toml_str("keepalive_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("url = \"\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("[reconnect]\nbase_delay_ms = 5000\nmax_delay_ms = 10"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("url = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url = \"ws://backend:5000/ws\"").unwrap();
        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "ws://backend:5000/ws");

        let missing = ClientConfig::load("/nonexistent/netshield.toml");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
