//! Chatline Telemetry - Logging setup for the chatline channel.
//!
//! This crate provides:
//! - Configurable logging setup with pretty, compact and JSON formats
//! - A `CHATLINE_LOG` environment override for the level filter
//!
//! # Example
//!
//! ```rust,no_run
//! use chatline_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), chatline_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("chatline_channel=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("Logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LOG_ENV_VAR, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
