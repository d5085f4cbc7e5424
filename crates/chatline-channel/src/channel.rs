//! The session channel: public facade plus the worker task behind it.
//!
//! [`SessionChannel`] is a cheap handle. All state lives on one spawned
//! worker task that owns the [`ConnectionMachine`], the frame router, both
//! timers and the live transport link, and processes commands, transport
//! events, timer firings and token changes strictly one at a time.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelIssue, ChannelResult};
use crate::frame::{
    build_ping, build_session_end, build_session_start, build_session_update, close_code,
};
use crate::heartbeat::Heartbeat;
use crate::machine::{ConnectionMachine, ConnectionState, Effect, Input, Outgoing};
use crate::router::{Dispatch, FrameRouter};
use crate::session::SessionProvider;
use crate::sink::MessageSink;
use crate::timer::Timer;
use crate::transport::{EventSender, Transport, TransportEvent, TransportLink};

/// Reason sent when a link is replaced by a fresh connection attempt.
const REPLACED_CLOSE_REASON: &str = "Closing before reconnect";

// ── Status ───────────────────────────────────────────────────

/// Observable snapshot of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Most recent user-visible issue. Cleared on the next successful open.
    pub last_error: Option<ChannelIssue>,
    /// Consecutive failures since the last successful open.
    pub reconnect_attempt: u32,
    /// Payloads dropped because the channel was not open.
    pub dropped_sends: u64,
}

impl ChannelStatus {
    /// Returns `true` while the channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            last_error: None,
            reconnect_attempt: 0,
            dropped_sends: 0,
        }
    }
}

/// Connection target the channel would use for `token`.
///
/// The transport is still dialed at `base`; the qualified target is only
/// logged.
#[must_use]
pub fn connection_target(base: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => format!("{base}?token={token}"),
        None => base.to_string(),
    }
}

// ── Facade ───────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(serde_json::Value),
    Shutdown,
}

/// Handle to a reconnecting, session-bound channel.
///
/// `connect`, `disconnect` and `send` never block and never fail; their
/// effects show up in [`SessionChannel::status`] once the worker has
/// processed them. Dropping the handle shuts the worker down.
#[derive(Debug)]
pub struct SessionChannel {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    worker: Option<JoinHandle<()>>,
}

impl SessionChannel {
    /// Spawn the channel worker on the current Tokio runtime.
    ///
    /// The channel starts `Idle`; call [`SessionChannel::connect`] to dial.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Config`] if `config` fails
    /// [`ChannelConfig::validate`]. Nothing is spawned in that case.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        config: &ChannelConfig,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionProvider>,
        sink: Arc<dyn MessageSink>,
    ) -> ChannelResult<Self> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let worker = ChannelWorker {
            url: config.url.clone(),
            close_grace: config.close_grace(),
            machine: ConnectionMachine::new(
                config.backoff(),
                config.max_reconnect_attempts,
                config.heartbeat_interval(),
            ),
            router: FrameRouter::new(Arc::clone(&session), sink),
            session,
            transport,
            link: None,
            generation: 0,
            events_tx,
            events_rx,
            commands: commands_rx,
            heartbeat: Heartbeat::new(),
            reconnect: Timer::new("reconnect"),
            last_error: None,
            dropped_sends: 0,
            status: status_tx,
        };

        info!(url = %config.url, "Starting session channel");
        let handle = tokio::spawn(worker.run());
        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            worker: Some(handle),
        })
    }

    /// Open the connection. No-op while connecting or open.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Send an application payload. Dropped if the channel is not open.
    pub fn send(&self, payload: serde_json::Value) {
        self.command(Command::Send(payload));
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Returns `true` while the channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    /// Most recent user-visible issue.
    #[must_use]
    pub fn last_error(&self) -> Option<ChannelIssue> {
        self.status.borrow().last_error.clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Disconnect and wait for the worker to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::WorkerStopped`] if the worker panicked or
    /// was cancelled.
    pub async fn shutdown(mut self) -> ChannelResult<()> {
        self.command(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| ChannelError::WorkerStopped(e.to_string()))?;
        }
        Ok(())
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Channel worker is gone, ignoring command");
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

// ── Worker ───────────────────────────────────────────────────

struct ChannelWorker {
    url: String,
    close_grace: Duration,
    machine: ConnectionMachine,
    router: FrameRouter,
    session: Arc<dyn SessionProvider>,
    transport: Arc<dyn Transport>,
    link: Option<TransportLink>,
    generation: u64,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    commands: mpsc::UnboundedReceiver<Command>,
    heartbeat: Heartbeat,
    reconnect: Timer,
    last_error: Option<ChannelIssue>,
    dropped_sends: u64,
    status: watch::Sender<ChannelStatus>,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut token_rx = self.session.watch_token();
        let mut watching_token = true;

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => self.apply(Input::Connect),
                    Some(Command::Disconnect) => self.apply(Input::Disconnect),
                    Some(Command::Send(payload)) => self.apply(Input::Send(payload)),
                    Some(Command::Shutdown) | None => {
                        self.shutdown().await;
                        break;
                    },
                },

                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_transport_event(generation, event);
                },

                () = self.reconnect.expired() => self.apply(Input::ReconnectDue),

                () = self.heartbeat.tick() => self.apply(Input::HeartbeatTick),

                changed = token_rx.changed(), if watching_token => match changed {
                    Ok(()) => {
                        let token = token_rx.borrow_and_update().clone();
                        debug!(has_token = token.is_some(), "Session token changed");
                        self.apply(Input::TokenChanged(token));
                    },
                    Err(_) => {
                        debug!("Session token watch closed");
                        watching_token = false;
                    },
                },
            }
        }

        info!("Session channel stopped");
    }

    /// Feed one input through the machine and carry out its effects.
    fn apply(&mut self, input: Input) {
        let effects = self.machine.step(input);
        for effect in effects {
            self.execute(effect);
        }
        self.publish();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => self.open_transport(),
            Effect::CloseTransport { code, reason } => {
                if let Some(link) = &self.link {
                    debug!(code, reason = %reason, "Closing transport");
                    link.close(code, reason);
                }
            },
            Effect::Send(outgoing) => self.send(outgoing),
            Effect::StartHeartbeat { interval } => self.heartbeat.start(interval),
            Effect::StopHeartbeat => self.heartbeat.stop(),
            Effect::ScheduleReconnect { delay, .. } => self.reconnect.schedule(delay),
            Effect::CancelReconnect => {
                self.reconnect.cancel();
            },
            Effect::RecordIssue(issue) => {
                debug!(issue = %issue, "Recording channel issue");
                self.last_error = Some(issue);
            },
            Effect::ClearIssue => self.last_error = None,
            Effect::DropOutgoing => {
                self.dropped_sends = self.dropped_sends.saturating_add(1);
                warn!(state = %self.machine.state(), "Not connected, dropping outbound payload");
            },
        }
    }

    fn open_transport(&mut self) {
        let token = self.session.current_token();
        let target = connection_target(&self.url, token.as_deref());
        trace!(target = %target, "Resolved connection target");

        if let Some(old) = self.link.take() {
            debug!(generation = old.generation(), "Replacing transport link");
            old.close(close_code::NORMAL, REPLACED_CLOSE_REASON);
        }

        self.generation = self.generation.wrapping_add(1);
        info!(url = %self.url, generation = self.generation, "Opening transport");
        self.link = Some(
            self.transport
                .open(&self.url, self.generation, self.events_tx.clone()),
        );
    }

    fn send(&mut self, outgoing: Outgoing) {
        let encoded = match outgoing {
            Outgoing::SessionStart => {
                serde_json::to_string(&build_session_start(self.session.current_customer_id()))
            },
            Outgoing::SessionEnd => {
                serde_json::to_string(&build_session_end(self.session.current_token()))
            },
            Outgoing::Ping => serde_json::to_string(&build_ping()),
            Outgoing::SessionUpdate(token) => serde_json::to_string(&build_session_update(token)),
            Outgoing::Payload(payload) => serde_json::to_string(&payload),
        };
        let text = match encoded.map_err(ChannelError::from) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode outbound frame");
                return;
            },
        };

        let sent = self.link.as_ref().is_some_and(|link| link.send(text));
        if !sent {
            warn!("Transport link unavailable, frame not sent");
        }
    }

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            trace!(generation, current = self.generation, "Ignoring stale transport event");
            return;
        }
        if event.is_terminal() {
            self.link = None;
        }

        match event {
            TransportEvent::Opened => self.apply(Input::Opened),
            TransportEvent::Message(text) => match self.router.route(&text) {
                Dispatch::Continue => {},
                Dispatch::Malformed => {
                    self.last_error = Some(ChannelIssue::MalformedData);
                    self.publish();
                },
                Dispatch::Disconnect => {
                    warn!("Session invalid, disconnecting");
                    self.apply(Input::Disconnect);
                    self.last_error = Some(ChannelIssue::InvalidSession);
                    self.publish();
                },
            },
            TransportEvent::Closed { code, reason } => {
                debug!(code, reason = %reason, "Transport closed");
                self.apply(Input::Closed { code });
            },
            TransportEvent::Failed(reason) => self.apply(Input::Failed { reason }),
        }
    }

    /// Disconnect and give the transport up to the close grace period to
    /// finish the closing handshake.
    async fn shutdown(&mut self) {
        self.apply(Input::Disconnect);
        if self.machine.state() != ConnectionState::Closing {
            return;
        }

        let generation = self.generation;
        let events = &mut self.events_rx;
        let finished = tokio::time::timeout(self.close_grace, async {
            while let Some((g, event)) = events.recv().await {
                if g == generation && event.is_terminal() {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match finished {
            Ok(Some(event)) => self.on_transport_event(generation, event),
            _ => {
                debug!("Close handshake did not finish in time");
                if let Some(link) = self.link.take() {
                    link.abort();
                }
                self.apply(Input::Closed {
                    code: close_code::NORMAL,
                });
            },
        }
    }

    fn publish(&self) {
        let next = ChannelStatus {
            state: self.machine.state(),
            last_error: self.last_error.clone(),
            reconnect_attempt: self.machine.attempt(),
            dropped_sends: self.dropped_sends,
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                if current.state != next.state {
                    debug!(from = %current.state, to = %next.state, "Channel state changed");
                }
                *current = next;
                true
            }
        });
    }
}
