//! Connection lifecycle state machine.
//!
//! [`ConnectionMachine`] is pure: it consumes one [`Input`] at a time and
//! returns the [`Effect`]s the channel worker must carry out. It never
//! touches the transport, timers or session provider itself, which keeps
//! every transition testable without a runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::ChannelIssue;
use crate::frame::{close_code, is_expected_close};

/// Default number of consecutive failures before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Reason sent with a deliberate close.
pub const NORMAL_CLOSE_REASON: &str = "Normal closure";

// ── States, Inputs, Effects ──────────────────────────────────

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Transport open requested, waiting for the open report.
    Connecting,
    /// Transport open and session announced.
    Open,
    /// Deliberate close in flight.
    Closing,
    /// Not connected and no automatic recovery pending.
    Closed,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Wire-style name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The application asked to connect.
    Connect,
    /// The application asked to disconnect.
    Disconnect,
    /// The application wants to send a payload.
    Send(serde_json::Value),
    /// The transport finished its opening handshake.
    Opened,
    /// The transport closed with a close code.
    Closed {
        /// Close code reported by the transport.
        code: u16,
    },
    /// The transport failed without a close code.
    Failed {
        /// Transport-provided description.
        reason: String,
    },
    /// The backoff timer fired.
    ReconnectDue,
    /// The heartbeat timer fired.
    HeartbeatTick,
    /// The session token changed.
    TokenChanged(Option<String>),
}

/// Outbound frame the worker must build and send.
///
/// Frames that carry session data are built by the worker at send time so
/// they always read the session provider's current values.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// `session_start` with the current customer.
    SessionStart,
    /// `session_end` with the current token.
    SessionEnd,
    /// Heartbeat `ping`.
    Ping,
    /// `session_update` carrying the new token.
    SessionUpdate(String),
    /// Application payload, sent as-is.
    Payload(serde_json::Value),
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new transport connection.
    OpenTransport,
    /// Close the live transport connection.
    CloseTransport {
        /// Close code to send.
        code: u16,
        /// Close reason to send.
        reason: String,
    },
    /// Send a frame over the live transport.
    Send(Outgoing),
    /// Start the repeating heartbeat.
    StartHeartbeat {
        /// Pulse period.
        interval: Duration,
    },
    /// Stop the heartbeat.
    StopHeartbeat,
    /// Arm the reconnect timer, replacing any pending one.
    ScheduleReconnect {
        /// Delay before the next attempt.
        delay: Duration,
        /// 1-indexed retry number.
        attempt: u32,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Record a user-visible issue.
    RecordIssue(ChannelIssue),
    /// Clear the recorded issue.
    ClearIssue,
    /// An outbound payload was dropped because the channel is not open.
    DropOutgoing,
}

// ── Machine ──────────────────────────────────────────────────

/// Pure connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempt: u32,
    max_attempts: u32,
    policy: BackoffPolicy,
    heartbeat_interval: Duration,
    reconnect_pending: bool,
    heartbeat_running: bool,
}

impl ConnectionMachine {
    /// Create an idle machine.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(policy: BackoffPolicy, max_attempts: u32, heartbeat_interval: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            policy,
            heartbeat_interval,
            reconnect_pending: false,
            heartbeat_running: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configured failure limit.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `true` while a reconnect timer is armed.
    #[must_use]
    pub fn pending_reconnect(&self) -> bool {
        self.reconnect_pending
    }

    /// Returns `true` while the heartbeat is running.
    #[must_use]
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    /// Apply one input and return the effects to carry out, in order.
    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::Connect => self.on_connect(&mut effects),
            Input::Disconnect => self.on_disconnect(&mut effects),
            Input::Send(payload) => {
                if self.state == ConnectionState::Open {
                    effects.push(Effect::Send(Outgoing::Payload(payload)));
                } else {
                    effects.push(Effect::DropOutgoing);
                }
            },
            Input::Opened => self.on_opened(&mut effects),
            Input::Closed { code } => self.on_closed(code, &mut effects),
            Input::Failed { reason } => self.on_failed(reason, &mut effects),
            Input::ReconnectDue => {
                if self.state == ConnectionState::Reconnecting {
                    self.reconnect_pending = false;
                    info!(attempt = self.attempt, "Reconnecting");
                    self.state = ConnectionState::Connecting;
                    effects.push(Effect::OpenTransport);
                }
            },
            Input::HeartbeatTick => {
                if self.state == ConnectionState::Open {
                    effects.push(Effect::Send(Outgoing::Ping));
                }
            },
            Input::TokenChanged(token) => {
                if let (ConnectionState::Open, Some(token)) = (self.state, token) {
                    effects.push(Effect::Send(Outgoing::SessionUpdate(token)));
                }
            },
        }
        effects
    }

    fn on_connect(&mut self, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Open => {},
            ConnectionState::Connecting => {
                debug!("Connect requested while already connecting");
            },
            ConnectionState::Reconnecting => {
                self.cancel_reconnect(effects);
                self.begin_connect(effects);
            },
            ConnectionState::Closed => {
                self.attempt = 0;
                self.begin_connect(effects);
            },
            ConnectionState::Idle | ConnectionState::Closing => self.begin_connect(effects),
        }
    }

    fn on_disconnect(&mut self, effects: &mut Vec<Effect>) {
        effects.push(Effect::CancelReconnect);
        effects.push(Effect::StopHeartbeat);
        self.reconnect_pending = false;
        self.heartbeat_running = false;

        match self.state {
            ConnectionState::Open => {
                effects.push(Effect::Send(Outgoing::SessionEnd));
                effects.push(normal_close());
                self.state = ConnectionState::Closing;
            },
            ConnectionState::Connecting => {
                effects.push(normal_close());
                self.state = ConnectionState::Closed;
            },
            _ => self.state = ConnectionState::Closed,
        }
    }

    fn on_opened(&mut self, effects: &mut Vec<Effect>) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Ignoring open report");
            return;
        }
        info!("Connection open");
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.heartbeat_running = true;
        effects.push(Effect::ClearIssue);
        effects.push(Effect::StartHeartbeat {
            interval: self.heartbeat_interval,
        });
        effects.push(Effect::Send(Outgoing::SessionStart));
    }

    fn on_closed(&mut self, code: u16, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.stop_heartbeat(effects);
                if is_expected_close(code) {
                    info!(code, "Connection closed normally");
                    self.state = ConnectionState::Closed;
                } else {
                    warn!(code, "Connection closed unexpectedly");
                    effects.push(Effect::RecordIssue(ChannelIssue::ConnectionClosed { code }));
                    self.schedule_reconnect(effects);
                }
            },
            ConnectionState::Closing => {
                debug!(code, "Close completed");
                self.state = ConnectionState::Closed;
            },
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Reconnecting => {
                debug!(code, state = %self.state, "Ignoring close report");
            },
        }
    }

    fn on_failed(&mut self, reason: String, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.stop_heartbeat(effects);
                warn!(reason = %reason, "Connection failed");
                effects.push(Effect::RecordIssue(ChannelIssue::ConnectionFailed { reason }));
                self.schedule_reconnect(effects);
            },
            ConnectionState::Closing => {
                debug!(reason = %reason, "Transport failed while closing");
                self.state = ConnectionState::Closed;
            },
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Reconnecting => {
                debug!(reason = %reason, state = %self.state, "Ignoring failure report");
            },
        }
    }

    // ── Helpers ──────────────────────────────────────────────

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        debug!(from = %self.state, attempt = self.attempt, "Connecting");
        self.state = ConnectionState::Connecting;
        effects.push(Effect::OpenTransport);
    }

    /// Count a failure and either arm the backoff timer or give up.
    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.attempt = self.attempt.saturating_add(1);
        // `max_attempts` counts failures, not retries: the failure that
        // reaches the limit is terminal, so 5 allows 4 retries in total.
        if self.attempt >= self.max_attempts {
            self.cancel_reconnect(effects);
            warn!(attempts = self.attempt, "Giving up on reconnection");
            effects.push(Effect::RecordIssue(ChannelIssue::MaxAttempts {
                attempts: self.attempt,
            }));
            self.state = ConnectionState::Closed;
            return;
        }

        self.cancel_reconnect(effects);
        let delay = self.policy.delay(self.attempt);
        info!(
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );
        effects.push(Effect::ScheduleReconnect {
            delay,
            attempt: self.attempt,
        });
        self.reconnect_pending = true;
        self.state = ConnectionState::Reconnecting;
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
    }

    fn stop_heartbeat(&mut self, effects: &mut Vec<Effect>) {
        if self.heartbeat_running {
            self.heartbeat_running = false;
            effects.push(Effect::StopHeartbeat);
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(
            BackoffPolicy::default(),
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
            Duration::from_millis(crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL_MS),
        )
    }
}

fn normal_close() -> Effect {
    Effect::CloseTransport {
        code: close_code::NORMAL,
        reason: NORMAL_CLOSE_REASON.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_machine() -> ConnectionMachine {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        machine.step(Input::Opened);
        assert_eq!(machine.state(), ConnectionState::Open);
        machine
    }

    fn scheduled(effects: &[Effect]) -> Vec<(Duration, u32)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::ScheduleReconnect { delay, attempt } => Some((*delay, *attempt)),
                _ => None,
            })
            .collect()
    }

    fn recorded(effects: &[Effect]) -> Vec<ChannelIssue> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::RecordIssue(issue) => Some(issue.clone()),
                _ => None,
            })
            .collect()
    }

    // ── Connect ─────────────────────────────────────────────

    #[test]
    fn connect_from_idle_opens_transport() {
        let mut machine = ConnectionMachine::default();
        assert_eq!(machine.state(), ConnectionState::Idle);
        let effects = machine.step(Input::Connect);
        assert_eq!(effects, vec![Effect::OpenTransport]);
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_while_connecting_is_noop() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        assert!(machine.step(Input::Connect).is_empty());
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_while_open_is_noop() {
        let mut machine = open_machine();
        assert!(machine.step(Input::Connect).is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn connect_while_reconnecting_cancels_timer_and_keeps_count() {
        let mut machine = open_machine();
        machine.step(Input::Closed { code: 1006 });
        assert!(machine.pending_reconnect());

        let effects = machine.step(Input::Connect);
        assert_eq!(effects, vec![Effect::CancelReconnect, Effect::OpenTransport]);
        assert!(!machine.pending_reconnect());
        assert_eq!(machine.attempt(), 1);
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    // ── Open ────────────────────────────────────────────────

    #[test]
    fn opened_starts_heartbeat_and_announces_session() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        let effects = machine.step(Input::Opened);
        assert_eq!(
            effects,
            vec![
                Effect::ClearIssue,
                Effect::StartHeartbeat {
                    interval: Duration::from_millis(30_000)
                },
                Effect::Send(Outgoing::SessionStart),
            ]
        );
        assert!(machine.heartbeat_running());
    }

    #[test]
    fn opened_outside_connecting_is_ignored() {
        let mut machine = ConnectionMachine::default();
        assert!(machine.step(Input::Opened).is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn heartbeat_tick_sends_ping_only_when_open() {
        let mut machine = open_machine();
        assert_eq!(
            machine.step(Input::HeartbeatTick),
            vec![Effect::Send(Outgoing::Ping)]
        );

        machine.step(Input::Closed { code: 1000 });
        assert!(machine.step(Input::HeartbeatTick).is_empty());
    }

    // ── Close / Failure ─────────────────────────────────────

    #[test]
    fn normal_close_does_not_reconnect() {
        for code in [1000, 1001] {
            let mut machine = open_machine();
            let effects = machine.step(Input::Closed { code });
            assert_eq!(effects, vec![Effect::StopHeartbeat]);
            assert_eq!(machine.state(), ConnectionState::Closed);
            assert!(!machine.pending_reconnect());
        }
    }

    #[test]
    fn abnormal_close_schedules_first_retry() {
        let mut machine = open_machine();
        let effects = machine.step(Input::Closed { code: 1006 });
        assert_eq!(
            effects,
            vec![
                Effect::StopHeartbeat,
                Effect::RecordIssue(ChannelIssue::ConnectionClosed { code: 1006 }),
                Effect::ScheduleReconnect {
                    delay: Duration::from_millis(1000),
                    attempt: 1
                },
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Reconnecting);
        assert!(machine.pending_reconnect());
    }

    #[test]
    fn failure_while_open_records_reason() {
        let mut machine = open_machine();
        let effects = machine.step(Input::Failed {
            reason: "reset by peer".into(),
        });
        assert_eq!(
            recorded(&effects),
            vec![ChannelIssue::ConnectionFailed {
                reason: "reset by peer".into()
            }]
        );
        assert_eq!(machine.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn failure_before_open_follows_reconnect_rule() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        let effects = machine.step(Input::Failed {
            reason: "refused".into(),
        });
        assert_eq!(scheduled(&effects), vec![(Duration::from_millis(1000), 1)]);
        assert!(!effects.contains(&Effect::StopHeartbeat));
    }

    #[test]
    fn reconnect_due_opens_transport() {
        let mut machine = open_machine();
        machine.step(Input::Closed { code: 4000 });
        let effects = machine.step(Input::ReconnectDue);
        assert_eq!(effects, vec![Effect::OpenTransport]);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert!(!machine.pending_reconnect());
    }

    #[test]
    fn stale_reconnect_due_is_ignored() {
        let mut machine = open_machine();
        assert!(machine.step(Input::ReconnectDue).is_empty());
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn retry_delays_grow_linearly() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        let mut delays = Vec::new();
        for _ in 0..4 {
            let effects = machine.step(Input::Closed { code: 1006 });
            delays.extend(scheduled(&effects));
            machine.step(Input::ReconnectDue);
        }
        assert_eq!(
            delays,
            vec![
                (Duration::from_millis(1000), 1),
                (Duration::from_millis(2000), 2),
                (Duration::from_millis(3000), 3),
                (Duration::from_millis(4000), 4),
            ]
        );
    }

    #[test]
    fn exhausting_attempts_is_terminal() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        for _ in 0..4 {
            machine.step(Input::Closed { code: 1006 });
            machine.step(Input::ReconnectDue);
        }

        let effects = machine.step(Input::Closed { code: 1006 });
        assert!(scheduled(&effects).is_empty());
        assert_eq!(
            recorded(&effects).last(),
            Some(&ChannelIssue::MaxAttempts { attempts: 5 })
        );
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.pending_reconnect());
        assert!(machine.attempt() <= machine.max_attempts());

        // Late reports never revive a terminal channel.
        assert!(machine.step(Input::Closed { code: 1006 }).is_empty());
        assert!(machine.step(Input::ReconnectDue).is_empty());
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn connect_after_exhaustion_starts_fresh() {
        let mut machine =
            ConnectionMachine::new(BackoffPolicy::default(), 1, Duration::from_secs(30));
        machine.step(Input::Connect);
        machine.step(Input::Closed { code: 1006 });
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert_eq!(machine.attempt(), 1);

        assert_eq!(machine.step(Input::Connect), vec![Effect::OpenTransport]);
        assert_eq!(machine.attempt(), 0);
    }

    #[test]
    fn open_resets_attempt_counter() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        machine.step(Input::Closed { code: 1006 });
        machine.step(Input::ReconnectDue);
        machine.step(Input::Closed { code: 1006 });
        machine.step(Input::ReconnectDue);
        assert_eq!(machine.attempt(), 2);

        machine.step(Input::Opened);
        assert_eq!(machine.attempt(), 0);

        let effects = machine.step(Input::Closed { code: 1006 });
        assert_eq!(scheduled(&effects), vec![(Duration::from_millis(1000), 1)]);
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        let machine = ConnectionMachine::new(BackoffPolicy::default(), 0, Duration::from_secs(1));
        assert_eq!(machine.max_attempts(), 1);
    }

    // ── Disconnect ──────────────────────────────────────────

    #[test]
    fn disconnect_while_open_ends_session_before_close() {
        let mut machine = open_machine();
        let effects = machine.step(Input::Disconnect);
        assert_eq!(
            effects,
            vec![
                Effect::CancelReconnect,
                Effect::StopHeartbeat,
                Effect::Send(Outgoing::SessionEnd),
                Effect::CloseTransport {
                    code: 1000,
                    reason: "Normal closure".into()
                },
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Closing);
        assert!(!machine.heartbeat_running());

        assert!(machine.step(Input::Closed { code: 1000 }).is_empty());
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn disconnect_while_reconnecting_cancels_timer() {
        let mut machine = open_machine();
        machine.step(Input::Closed { code: 1006 });
        let effects = machine.step(Input::Disconnect);
        assert!(effects.contains(&Effect::CancelReconnect));
        assert!(!effects.iter().any(|e| matches!(e, Effect::CloseTransport { .. })));
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.pending_reconnect());
    }

    #[test]
    fn disconnect_while_connecting_closes_half_open_transport() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Connect);
        let effects = machine.step(Input::Disconnect);
        assert!(effects.contains(&normal_close()));
        assert!(!effects.contains(&Effect::Send(Outgoing::SessionEnd)));
        assert_eq!(machine.state(), ConnectionState::Closed);

        // The half-open transport may still report; it must be ignored.
        assert!(machine.step(Input::Opened).is_empty());
        assert!(machine.step(Input::Closed { code: 1006 }).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent_when_closed() {
        let mut machine = ConnectionMachine::default();
        machine.step(Input::Disconnect);
        machine.step(Input::Disconnect);
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    // ── Send / Token ────────────────────────────────────────

    #[test]
    fn send_while_not_open_is_dropped() {
        let mut machine = ConnectionMachine::default();
        let payload = serde_json::json!({"type": "chat_message"});
        assert_eq!(
            machine.step(Input::Send(payload.clone())),
            vec![Effect::DropOutgoing]
        );

        let mut machine = open_machine();
        assert_eq!(
            machine.step(Input::Send(payload.clone())),
            vec![Effect::Send(Outgoing::Payload(payload))]
        );
    }

    #[test]
    fn token_change_while_open_pushes_update() {
        let mut machine = open_machine();
        assert_eq!(
            machine.step(Input::TokenChanged(Some("B".into()))),
            vec![Effect::Send(Outgoing::SessionUpdate("B".into()))]
        );
        assert!(machine.step(Input::TokenChanged(None)).is_empty());
    }

    #[test]
    fn token_change_while_not_open_is_ignored() {
        let mut machine = ConnectionMachine::default();
        assert!(machine.step(Input::TokenChanged(Some("B".into()))).is_empty());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_value(ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "reconnecting");
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
