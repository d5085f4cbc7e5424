//! Chatline Channel - session-aware reconnecting real-time channel.
//!
//! This crate provides:
//! - A pure connection state machine with bounded linear backoff
//! - Heartbeat liveness (`ping` / `pong`) while the connection is open
//! - Binding to a rotating session token through [`SessionProvider`]
//! - Inbound frame routing and out-of-band event delivery via [`MessageSink`]
//! - A `WebSocket` transport behind the [`Transport`] seam
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chatline_channel::prelude::*;
//!
//! # async fn run() -> ChannelResult<()> {
//! let config = ChannelConfig::with_url("ws://127.0.0.1:8000/ws");
//! let session = Arc::new(SessionStore::with_session("customer-1", "token-A"));
//! let sink = Arc::new(BroadcastSink::new());
//! let mut events = sink.subscribe();
//!
//! let channel = SessionChannel::spawn(
//!     &config,
//!     Arc::new(WsTransport::new()),
//!     session.clone(),
//!     sink,
//! )?;
//! channel.connect();
//!
//! // Token rotation is pushed to the server while connected.
//! session.rotate_token("token-B");
//!
//! if let Ok(event) = events.recv().await {
//!     println!("{}", event.frame());
//! }
//! channel.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod frame;
pub mod prelude;

mod backoff;
mod channel;
mod config;
mod connection;
mod error;
mod heartbeat;
mod machine;
mod router;
mod session;
mod sink;
mod timer;
mod transport;

pub use backoff::{BackoffPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_CAP_ATTEMPTS};
pub use channel::{ChannelStatus, SessionChannel, connection_target};
pub use config::{ChannelConfig, ConfigError, ConfigResult, DEFAULT_URL, INLINE_SOURCE};
pub use connection::{DEFAULT_CLOSE_GRACE_MS, WsTransport};
pub use error::{ChannelError, ChannelIssue, ChannelResult};
pub use heartbeat::DEFAULT_HEARTBEAT_INTERVAL_MS;
pub use machine::{
    ConnectionMachine, ConnectionState, DEFAULT_MAX_RECONNECT_ATTEMPTS, Effect, Input,
    NORMAL_CLOSE_REASON, Outgoing,
};
pub use router::{Dispatch, FrameRouter};
pub use session::{SessionInfo, SessionProvider, SessionStore};
pub use sink::{BroadcastSink, DEFAULT_SINK_CAPACITY, InboundEvent, MessageSink};
pub use transport::{EventSender, Transport, TransportCommand, TransportEvent, TransportLink};
