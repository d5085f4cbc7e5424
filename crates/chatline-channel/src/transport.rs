//! Transport seam between the channel worker and a concrete connection.
//!
//! A [`Transport`] opens one connection per call and reports what happens
//! to it on a shared event queue, tagged with the generation number the
//! worker assigned. Every link reports exactly one terminal event
//! ([`TransportEvent::Closed`] or [`TransportEvent::Failed`]).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Something that happened on a transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The opening handshake completed.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The connection closed. Terminal.
    Closed {
        /// Close code (1005 when the peer sent none, 1006 when the
        /// connection dropped without a close frame).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The connection failed without a close handshake. Terminal.
    Failed(String),
}

impl TransportEvent {
    /// Returns `true` for events after which the link reports nothing else.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed(_))
    }
}

/// Request from the worker to a transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send a text frame.
    Text(String),
    /// Start the closing handshake.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Queue on which links report events, tagged with their generation.
pub type EventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

/// Opens transport connections.
pub trait Transport: Send + Sync {
    /// Start opening a connection to `url`.
    ///
    /// Returns immediately. The outcome is reported on `events` tagged
    /// with `generation`.
    fn open(&self, url: &str, generation: u64, events: EventSender) -> TransportLink;
}

/// Handle to one opened (or opening) connection.
#[derive(Debug)]
pub struct TransportLink {
    generation: u64,
    commands: mpsc::UnboundedSender<TransportCommand>,
    task: Option<JoinHandle<()>>,
}

impl TransportLink {
    /// Wrap a command queue and, optionally, the task driving the link.
    #[must_use]
    pub fn new(
        generation: u64,
        commands: mpsc::UnboundedSender<TransportCommand>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            generation,
            commands,
            task,
        }
    }

    /// Generation the worker assigned to this link.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame. Returns `false` if the link is gone.
    pub fn send(&self, text: String) -> bool {
        self.commands.send(TransportCommand::Text(text)).is_ok()
    }

    /// Ask the link to close. Returns `false` if the link is gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.commands
            .send(TransportCommand::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Tear the link down immediately. No further events are reported.
    pub fn abort(mut self) {
        trace!(generation = self.generation, "Aborting transport link");
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
