//! Prelude module - commonly used types for convenient import.
//!
//! Use `use chatline_channel::prelude::*;` to import all essential types.

// Errors
pub use crate::{ChannelError, ChannelIssue, ChannelResult, ConfigError};

// Channel
pub use crate::{ChannelConfig, ChannelStatus, ConnectionState, SessionChannel};

// Session and delivery
pub use crate::{BroadcastSink, InboundEvent, MessageSink, SessionProvider, SessionStore};

// Transport
pub use crate::{Transport, TransportEvent, TransportLink, WsTransport};
