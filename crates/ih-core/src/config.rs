//! Host configuration
//!
//! Loaded from TOML; every key is optional and falls back to the values
//! used by the reference deployment.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Deadline for one interactive to answer a state request
    pub state_request_timeout_ms: u64,
    /// Per-request watchdog when saving every interactive
    pub save_watchdog_ms: u64,
    /// Interval between handshake re-posts
    pub handshake_retry_ms: u64,
    /// Default lifetime of signed attachment URLs
    pub attachment_expires_in_secs: u64,
    /// Buffer size of the host event bus
    pub event_capacity: usize,
    /// Default tracing filter
    pub log_filter: String,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl HostConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML
    /// - `ConfigError::Invalid` for out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`HostConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject zero durations and capacities
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("state_request_timeout_ms", self.state_request_timeout_ms),
            ("save_watchdog_ms", self.save_watchdog_ms),
            ("handshake_retry_ms", self.handshake_retry_ms),
            ("attachment_expires_in_secs", self.attachment_expires_in_secs),
            ("event_capacity", self.event_capacity as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// With state request timeout
    #[inline]
    #[must_use]
    pub fn with_state_request_timeout(mut self, timeout: Duration) -> Self {
        self.state_request_timeout_ms = duration_ms(timeout);
        self
    }

    /// With save watchdog
    #[inline]
    #[must_use]
    pub fn with_save_watchdog(mut self, watchdog: Duration) -> Self {
        self.save_watchdog_ms = duration_ms(watchdog);
        self
    }

    /// With handshake retry interval
    #[inline]
    #[must_use]
    pub fn with_handshake_retry(mut self, retry: Duration) -> Self {
        self.handshake_retry_ms = duration_ms(retry);
        self
    }

    /// State request timeout
    #[inline]
    #[must_use]
    pub fn state_request_timeout(&self) -> Duration {
        Duration::from_millis(self.state_request_timeout_ms)
    }

    /// Save watchdog
    #[inline]
    #[must_use]
    pub fn save_watchdog(&self) -> Duration {
        Duration::from_millis(self.save_watchdog_ms)
    }

    /// Handshake retry interval
    #[inline]
    #[must_use]
    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    /// Default signed URL lifetime
    #[inline]
    #[must_use]
    pub fn attachment_expires_in(&self) -> Duration {
        Duration::from_secs(self.attachment_expires_in_secs)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            state_request_timeout_ms: 20_000,
            save_watchdog_ms: 10_000,
            handshake_retry_ms: 200,
            attachment_expires_in_secs: 3600,
            event_capacity: 256,
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
