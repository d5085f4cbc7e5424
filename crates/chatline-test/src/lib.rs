//! Chatline Test - Shared test utilities for the chatline channel.
//!
//! This crate provides scripted stand-ins for the channel's seams and a few
//! harness helpers. Use it as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! chatline-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use chatline_channel::{ChannelConfig, ConnectionState, SessionChannel};
//! use chatline_test::{MockSession, MockTransport, RecordingSink, settle};
//!
//! #[tokio::test(start_paused = true)]
//! async fn opens() {
//!     let transport = MockTransport::new();
//!     let channel = SessionChannel::spawn(
//!         &ChannelConfig::default(),
//!         Arc::new(transport.clone()),
//!         Arc::new(MockSession::new("cust", "A")),
//!         Arc::new(RecordingSink::new()),
//!     )
//!     .unwrap();
//!     channel.connect();
//!     settle().await;
//!     transport.open_latest();
//!     settle().await;
//!     assert_eq!(channel.state(), ConnectionState::Open);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod harness;
pub mod mocks;

pub use harness::*;
pub use mocks::*;
