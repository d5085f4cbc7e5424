//! Channel configuration.
//!
//! Loaded from TOML. Every field is optional and falls back to the
//! defaults below:
//!
//! ```toml
//! url = "ws://127.0.0.1:8000/ws"
//! heartbeat_interval_ms = 30000
//! max_reconnect_attempts = 5
//! backoff_base_ms = 1000
//! backoff_cap_attempts = 5
//! close_grace_ms = 2000
//! ```

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_CAP_ATTEMPTS};
use crate::connection::DEFAULT_CLOSE_GRACE_MS;
use crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL_MS;
use crate::machine::DEFAULT_MAX_RECONNECT_ATTEMPTS;

/// Default channel endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8000/ws";

/// Source name reported for configuration parsed from a string.
pub const INLINE_SOURCE: &str = "<inline>";

/// Errors from loading or validating a [`ChannelConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        /// Path of the file, or [`INLINE_SOURCE`] for in-memory text.
        path: String,
        /// Underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// Field that failed validation.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one [`SessionChannel`](crate::SessionChannel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Base endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Heartbeat period while open.
    pub heartbeat_interval_ms: u64,
    /// Consecutive failures before the channel gives up.
    pub max_reconnect_attempts: u32,
    /// Backoff delay unit.
    pub backoff_base_ms: u64,
    /// Attempt count at which backoff growth stops.
    pub backoff_cap_attempts: u32,
    /// How long a local close waits for the peer's close frame.
    pub close_grace_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff_base_ms: DEFAULT_BASE_DELAY_MS,
            backoff_cap_attempts: DEFAULT_CAP_ATTEMPTS,
            close_grace_ms: DEFAULT_CLOSE_GRACE_MS,
        }
    }
}

impl ChannelConfig {
    /// Default settings pointed at `url`.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys and
    /// [`ConfigError::Validation`] on out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: INLINE_SOURCE.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// the same errors as [`ChannelConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: shown.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: shown.clone(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %shown, url = %config.url, "Loaded channel config");
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(invalid(
                "url",
                format!("'{}' must use the ws:// or wss:// scheme", self.url),
            ));
        }
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("max_reconnect_attempts", u64::from(self.max_reconnect_attempts)),
            ("backoff_base_ms", self.backoff_base_ms),
            ("backoff_cap_attempts", u64::from(self.backoff_cap_attempts)),
            ("close_grace_ms", self.close_grace_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero".to_owned()));
            }
        }
        Ok(())
    }

    /// Heartbeat period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Close grace period.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Backoff policy built from the configured base and cap.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_ms, self.backoff_cap_attempts)
    }
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::Validation {
        field: field.to_owned(),
        message,
    }
}
