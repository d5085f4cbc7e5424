//! Wire frame types for the session channel.
//!
//! Every frame is a JSON object carrying at least `type` and `timestamp`.
//! Inbound frames are decoded loosely: only `type` is interpreted, the
//! rest is kept as an opaque `serde_json::Value`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

// ── Close Codes ──────────────────────────────────────────────

/// Transport close codes with special meaning to the channel.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (page unload, server shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
}

/// Returns `true` if the close code is an expected closure that must not
/// trigger reconnection.
#[must_use]
pub fn is_expected_close(code: u16) -> bool {
    matches!(code, close_code::NORMAL | close_code::GOING_AWAY)
}

// ── Frame Types ──────────────────────────────────────────────

/// Inbound frame types the channel acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// Heartbeat reply.
    Pong,
    /// Server-side session refresh.
    SessionUpdate,
    /// Out-of-band metrics for the application.
    MetricsUpdate,
    /// Anything else, including frames without a `type`.
    Other(Option<String>),
}

impl InboundKind {
    /// Classify a frame by its `type` field.
    #[must_use]
    pub fn of(frame: &serde_json::Value) -> Self {
        match frame.get("type").and_then(serde_json::Value::as_str) {
            Some("pong") => Self::Pong,
            Some("session_update") => Self::SessionUpdate,
            Some("metrics_update") => Self::MetricsUpdate,
            other => Self::Other(other.map(str::to_owned)),
        }
    }
}

/// Outbound frame as serialized onto the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent once per successful open.
    SessionStart {
        /// Customer the session belongs to.
        #[serde(rename = "customerId")]
        customer_id: Option<String>,
        /// Creation time.
        timestamp: String,
    },
    /// Sent before a deliberate close.
    SessionEnd {
        /// Token of the session being ended.
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        /// Creation time.
        timestamp: String,
    },
    /// Heartbeat.
    Ping {
        /// Creation time.
        timestamp: String,
    },
    /// Pushed when the session token rotates while connected.
    SessionUpdate {
        /// The new token.
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Creation time.
        timestamp: String,
    },
}

/// Format a timestamp the way frames carry it (`2026-01-01T00:00:00.000Z`).
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in frame format.
#[must_use]
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

// ── Builders ─────────────────────────────────────────────────

/// Build a `session_start` frame.
#[must_use]
pub fn build_session_start(customer_id: Option<String>) -> OutboundFrame {
    OutboundFrame::SessionStart {
        customer_id,
        timestamp: now_timestamp(),
    }
}

/// Build a `session_end` frame.
#[must_use]
pub fn build_session_end(session_id: Option<String>) -> OutboundFrame {
    OutboundFrame::SessionEnd {
        session_id,
        timestamp: now_timestamp(),
    }
}

/// Build a `ping` frame.
#[must_use]
pub fn build_ping() -> OutboundFrame {
    OutboundFrame::Ping {
        timestamp: now_timestamp(),
    }
}

/// Build a `session_update` frame.
#[must_use]
pub fn build_session_update(session_id: impl Into<String>) -> OutboundFrame {
    OutboundFrame::SessionUpdate {
        session_id: session_id.into(),
        timestamp: now_timestamp(),
    }
}
