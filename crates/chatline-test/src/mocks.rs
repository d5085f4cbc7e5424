//! Mock implementations for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use chatline_channel::{
    EventSender, InboundEvent, MessageSink, SessionProvider, Transport, TransportCommand,
    TransportEvent, TransportLink,
};

// ── MockTransport ────────────────────────────────────────────

struct OpenedLink {
    url: String,
    generation: u64,
    events: EventSender,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
}

#[derive(Default)]
struct TransportState {
    links: Vec<OpenedLink>,
    /// Commands drained from every link, in arrival order per link.
    log: Vec<(u64, TransportCommand)>,
}

impl TransportState {
    fn drain(&mut self) {
        for link in &mut self.links {
            while let Ok(command) = link.commands.try_recv() {
                self.log.push((link.generation, command));
            }
        }
    }
}

/// Scripted [`Transport`].
///
/// Records every open and every command the channel issues, and lets the
/// test play the remote side by emitting events on any opened link.
/// Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    /// Create a transport with no opened links.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of links opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().links.len()
    }

    /// URLs of every open, in order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.lock().links.iter().map(|l| l.url.clone()).collect()
    }

    /// Generation of the most recent open.
    #[must_use]
    pub fn latest_generation(&self) -> Option<u64> {
        self.lock().links.last().map(|l| l.generation)
    }

    /// Emit an event on the link with `generation`. Returns `false` if no
    /// such link exists or the channel is gone.
    pub fn emit_to(&self, generation: u64, event: TransportEvent) -> bool {
        let state = self.lock();
        state
            .links
            .iter()
            .find(|l| l.generation == generation)
            .is_some_and(|l| l.events.send((generation, event)).is_ok())
    }

    /// Emit an event on the most recent link.
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.latest_generation() {
            Some(generation) => self.emit_to(generation, event),
            None => false,
        }
    }

    /// Report the most recent link as opened.
    pub fn open_latest(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    /// Deliver a text frame on the most recent link.
    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    /// Close the most recent link with `code`.
    pub fn close_latest(&self, code: u16) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: String::new(),
        })
    }

    /// Fail the most recent link.
    pub fn fail_latest(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Failed(reason.into()))
    }

    /// Every command received so far, tagged with the link generation.
    #[must_use]
    pub fn commands(&self) -> Vec<(u64, TransportCommand)> {
        let mut state = self.lock();
        state.drain();
        state.log.clone()
    }

    /// Text frames sent on any link, decoded as JSON. Non-JSON text is
    /// returned as a JSON string.
    #[must_use]
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.commands()
            .into_iter()
            .filter_map(|(_, command)| match command {
                TransportCommand::Text(text) => Some(
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
                ),
                TransportCommand::Close { .. } => None,
            })
            .collect()
    }

    /// Sent frames whose `type` equals `frame_type`.
    #[must_use]
    pub fn sent_of_type(&self, frame_type: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|f| f.get("type").and_then(serde_json::Value::as_str) == Some(frame_type))
            .collect()
    }

    /// Close requests received, as `(generation, code, reason)`.
    #[must_use]
    pub fn close_requests(&self) -> Vec<(u64, u16, String)> {
        self.commands()
            .into_iter()
            .filter_map(|(generation, command)| match command {
                TransportCommand::Close { code, reason } => Some((generation, code, reason)),
                TransportCommand::Text(_) => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str, generation: u64, events: EventSender) -> TransportLink {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().links.push(OpenedLink {
            url: url.to_string(),
            generation,
            events,
            commands: rx,
        });
        TransportLink::new(generation, tx, None)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

// ── MockSession ──────────────────────────────────────────────

/// [`SessionProvider`] with a settable token and validity flag.
#[derive(Debug)]
pub struct MockSession {
    token: watch::Sender<Option<String>>,
    customer_id: Mutex<Option<String>>,
    valid: AtomicBool,
    activity: AtomicUsize,
}

impl MockSession {
    /// Create a valid session for `customer_id` holding `token`.
    #[must_use]
    pub fn new(customer_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: watch::channel(Some(token.into())).0,
            customer_id: Mutex::new(Some(customer_id.into())),
            valid: AtomicBool::new(true),
            activity: AtomicUsize::new(0),
        }
    }

    /// Replace the token. Watchers are notified only on change.
    pub fn set_token(&self, token: Option<&str>) {
        let token = token.map(str::to_owned);
        self.token.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
    }

    /// Set what [`SessionProvider::is_valid`] reports.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Number of [`SessionProvider::report_activity`] calls.
    #[must_use]
    pub fn activity_count(&self) -> usize {
        self.activity.load(Ordering::SeqCst)
    }
}

impl SessionProvider for MockSession {
    fn current_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    fn current_customer_id(&self) -> Option<String> {
        self.customer_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn report_activity(&self) {
        self.activity.fetch_add(1, Ordering::SeqCst);
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn watch_token(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

// ── RecordingSink ────────────────────────────────────────────

/// [`MessageSink`] that records every delivered event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<InboundEvent>>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered so far.
    #[must_use]
    pub fn events(&self) -> Vec<InboundEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&self, event: InboundEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}
