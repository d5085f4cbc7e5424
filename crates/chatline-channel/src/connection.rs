//! `WebSocket` transport backed by `tokio-tungstenite`.
//!
//! Each link runs on its own task: it dials the endpoint, forwards text
//! frames both ways and reports exactly one terminal event. Binary frames
//! are ignored; ping/pong control frames are answered by tungstenite.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::frame::close_code;
use crate::timer::Timer;
use crate::transport::{EventSender, Transport, TransportCommand, TransportEvent, TransportLink};

/// Default time to wait for the peer's close frame after a local close.
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 2000;

/// [`Transport`] that dials `ws://` / `wss://` endpoints.
#[derive(Debug, Clone)]
pub struct WsTransport {
    close_grace: Duration,
}

impl WsTransport {
    /// Create a transport with the default close grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::with_close_grace(Duration::from_millis(DEFAULT_CLOSE_GRACE_MS))
    }

    /// Create a transport with a custom close grace period.
    #[must_use]
    pub fn with_close_grace(close_grace: Duration) -> Self {
        Self { close_grace }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, generation: u64, events: EventSender) -> TransportLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = LinkTask {
            url: url.to_string(),
            generation,
            events,
            close_grace: self.close_grace,
        };
        let task = tokio::spawn(link.run(rx));
        TransportLink::new(generation, tx, Some(task))
    }
}

// ── Link Task ────────────────────────────────────────────────

struct LinkTask {
    url: String,
    generation: u64,
    events: EventSender,
    close_grace: Duration,
}

impl LinkTask {
    fn emit(&self, event: TransportEvent) {
        // The worker may already have moved on.
        let _ = self.events.send((self.generation, event));
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<TransportCommand>) {
        debug!(url = %self.url, generation = self.generation, "Dialing");

        let connect = connect_async(self.url.as_str());
        tokio::pin!(connect);
        let ws = loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(TransportCommand::Close { code, reason }) => {
                        debug!(generation = self.generation, "Closed before open");
                        self.emit(TransportEvent::Closed { code, reason });
                        return;
                    },
                    Some(TransportCommand::Text(_)) => {
                        debug!(generation = self.generation, "Dropping frame queued before open");
                    },
                    None => return,
                },

                result = &mut connect => match result {
                    Ok((ws, _response)) => break ws,
                    Err(e) => {
                        let err = ChannelError::from(e);
                        warn!(url = %self.url, error = %err, "Failed to connect");
                        self.emit(TransportEvent::Failed(err.to_string()));
                        return;
                    },
                },
            }
        };

        info!(url = %self.url, generation = self.generation, "WebSocket connected");
        self.emit(TransportEvent::Opened);

        let (mut writer, mut reader) = ws.split();
        let mut grace = Timer::new("close_grace");
        let mut local_close: Option<(u16, String)> = None;

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv(), if local_close.is_none() => match cmd {
                    Some(TransportCommand::Text(text)) => {
                        if let Err(e) = writer.send(Message::Text(text.into())).await {
                            let err = ChannelError::from(e);
                            warn!(error = %err, "WebSocket send failed");
                            self.emit(TransportEvent::Failed(err.to_string()));
                            return;
                        }
                    },
                    Some(TransportCommand::Close { code, reason }) => {
                        debug!(code, reason = %reason, "Sending close frame");
                        let frame = CloseFrame {
                            code: code.into(),
                            reason: reason.clone().into(),
                        };
                        if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                            debug!(error = %e, "Close frame not sent");
                            self.emit(TransportEvent::Closed { code, reason });
                            return;
                        }
                        local_close = Some((code, reason));
                        grace.schedule(self.close_grace);
                    },
                    None => {
                        debug!(generation = self.generation, "Link dropped, closing");
                        let _ = writer.close().await;
                        return;
                    },
                },

                () = grace.expired() => {
                    debug!(generation = self.generation, "Peer did not answer close in time");
                    let (code, reason) = local_close.take().unwrap_or_else(normal_close);
                    self.emit(TransportEvent::Closed { code, reason });
                    return;
                },

                msg = reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(TransportEvent::Message(text.as_str().to_owned()));
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match (frame, local_close.take()) {
                            (_, Some(local)) => local,
                            (Some(f), None) => (f.code.into(), f.reason.as_str().to_owned()),
                            (None, None) => (close_code::NO_STATUS, String::new()),
                        };
                        let _ = writer.close().await;
                        info!(code, reason = %reason, "WebSocket closed");
                        self.emit(TransportEvent::Closed { code, reason });
                        return;
                    },
                    Some(Ok(
                        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_),
                    )) => {},
                    Some(Err(e)) => {
                        if let Some((code, reason)) = local_close.take() {
                            self.emit(TransportEvent::Closed { code, reason });
                        } else {
                            let err = ChannelError::from(e);
                            warn!(error = %err, "WebSocket read error");
                            self.emit(TransportEvent::Failed(err.to_string()));
                        }
                        return;
                    },
                    None => {
                        let (code, reason) = local_close.take().unwrap_or_else(|| {
                            warn!("WebSocket stream ended");
                            (close_code::ABNORMAL, String::new())
                        });
                        self.emit(TransportEvent::Closed { code, reason });
                        return;
                    },
                },
            }
        }
    }
}

fn normal_close() -> (u16, String) {
    (close_code::NORMAL, String::new())
}
