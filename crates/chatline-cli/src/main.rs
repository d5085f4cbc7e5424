//! Chatline CLI - connect a session channel from the terminal.
//!
//! Inbound out-of-band events are printed to stdout as JSON lines. Each
//! line typed on stdin is sent as a `chat_message` payload. Ctrl-C ends
//! the session and closes the connection cleanly.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatline_channel::frame::now_timestamp;
use chatline_channel::{
    BroadcastSink, ChannelConfig, ChannelStatus, ConnectionState, SessionChannel, SessionStore,
    WsTransport,
};
use chatline_telemetry::LogFormat;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Chatline - session-aware real-time channel client
#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Channel endpoint (overrides the config file)
    #[arg(long, env = "CHATLINE_URL")]
    url: Option<String>,

    /// Customer the session belongs to
    #[arg(long, env = "CHATLINE_CUSTOMER_ID")]
    customer_id: String,

    /// Existing session token; one is generated when omitted
    #[arg(long, env = "CHATLINE_TOKEN")]
    token: Option<String>,

    /// Path to a TOML channel configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log format: pretty, compact (default) or json
    #[arg(long, default_value = "compact")]
    log_format: String,
}

impl Args {
    fn channel_config(&self) -> Result<ChannelConfig> {
        let mut config = match &self.config {
            Some(path) => ChannelConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ChannelConfig::default(),
        };
        if let Some(url) = &self.url {
            config.url.clone_from(url);
        }
        config.validate().context("invalid channel configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let format = args.log_format.parse().unwrap_or_else(|e| {
        eprintln!("{e}; using compact");
        LogFormat::Compact
    });
    let log_config = chatline_telemetry::LogConfig::new(level).with_format(format);
    if let Err(e) = chatline_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = args.channel_config()?;
    let session = Arc::new(SessionStore::new());
    let info = session.initialize(args.customer_id.clone(), args.token.clone());
    let sink = Arc::new(BroadcastSink::new());
    let mut events = sink.subscribe();

    let channel = SessionChannel::spawn(
        &config,
        Arc::new(WsTransport::with_close_grace(config.close_grace())),
        session.clone(),
        sink,
    )?;
    let mut status = channel.subscribe();
    channel.connect();
    info!(url = %config.url, session_id = %info.id, "Connecting");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut reading_stdin = true;

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing channel");
                break;
            },

            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(event.frame())?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => break,
            },

            changed = status.changed() => {
                if changed.is_err() {
                    warn!("Channel worker stopped");
                    break;
                }
                let current = status.borrow_and_update().clone();
                if report_status(&current) {
                    break;
                }
            },

            line = stdin.next_line(), if reading_stdin => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if !text.is_empty() {
                        channel.send(chat_message(text));
                    }
                },
                Ok(None) => reading_stdin = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    reading_stdin = false;
                },
            },
        }
    }

    channel.shutdown().await?;
    info!(duration = %session.duration_label(), "Session finished");
    session.end();
    Ok(())
}

/// Log a status change. Returns `true` if the channel gave up for good.
fn report_status(status: &ChannelStatus) -> bool {
    match (&status.state, &status.last_error) {
        (ConnectionState::Closed, Some(issue)) if issue.is_fatal() => {
            warn!(issue = %issue, "Channel closed");
            true
        },
        (state, Some(issue)) => {
            info!(state = %state, issue = %issue, "Channel status");
            false
        },
        (state, None) => {
            info!(state = %state, "Channel status");
            false
        },
    }
}

fn chat_message(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "chat_message",
        "text": text,
        "timestamp": now_timestamp(),
    })
}
