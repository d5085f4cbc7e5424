//! Error types for the session channel.

use serde::{Deserialize, Serialize};

/// Errors produced by channel plumbing (transport setup, encoding, worker
/// lifecycle).
///
/// None of these cross the `connect`/`disconnect`/`send` surface; they are
/// logged by the worker or returned from explicit lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The channel worker task panicked or was cancelled.
    #[error("Channel worker stopped unexpectedly: {0}")]
    WorkerStopped(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// User-visible problem recorded in the channel's `last_error` slot.
///
/// Last write wins; the slot is cleared on the next successful open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelIssue {
    /// The transport closed with an abnormal close code.
    #[error("Connection closed (code {code})")]
    ConnectionClosed {
        /// Close code reported by the transport.
        code: u16,
    },

    /// The transport failed without a close handshake.
    #[error("Connection error: {reason}")]
    ConnectionFailed {
        /// Transport-provided description.
        reason: String,
    },

    /// Reconnection gave up after the configured number of attempts.
    #[error("Failed to reconnect after {attempts} attempts")]
    MaxAttempts {
        /// Number of consecutive failures observed.
        attempts: u32,
    },

    /// An inbound frame could not be decoded.
    #[error("Malformed data received")]
    MalformedData,

    /// The session provider reported the session as invalid.
    #[error("Session is no longer valid")]
    InvalidSession,
}

impl ChannelIssue {
    /// Returns `true` if no further automatic recovery will happen.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MaxAttempts { .. } | Self::InvalidSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_display_messages() {
        let issue = ChannelIssue::ConnectionClosed { code: 1006 };
        assert!(issue.to_string().contains("1006"));

        let issue = ChannelIssue::MaxAttempts { attempts: 5 };
        assert!(issue.to_string().contains('5'));

        let issue = ChannelIssue::ConnectionFailed {
            reason: "refused".into(),
        };
        assert!(issue.to_string().contains("refused"));
    }

    #[test]
    fn fatal_issues() {
        assert!(ChannelIssue::MaxAttempts { attempts: 5 }.is_fatal());
        assert!(ChannelIssue::InvalidSession.is_fatal());
        assert!(!ChannelIssue::MalformedData.is_fatal());
        assert!(!ChannelIssue::ConnectionClosed { code: 1006 }.is_fatal());
    }

    #[test]
    fn issue_serializes_with_kind_tag() {
        let json = serde_json::to_value(ChannelIssue::ConnectionClosed { code: 4000 }).unwrap();
        assert_eq!(json["kind"], "connection_closed");
        assert_eq!(json["code"], 4000);
    }

    #[test]
    fn channel_error_wraps_json() {
        let err: ChannelError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
