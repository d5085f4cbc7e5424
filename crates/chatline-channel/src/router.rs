//! Inbound frame dispatch.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::frame::InboundKind;
use crate::session::SessionProvider;
use crate::sink::{InboundEvent, MessageSink};

/// What the channel must do after a frame was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing further.
    Continue,
    /// The session is no longer valid; tear the connection down.
    Disconnect,
    /// The frame could not be decoded.
    Malformed,
}

/// Decodes inbound text frames and dispatches them by `type`.
#[derive(Clone)]
pub struct FrameRouter {
    session: Arc<dyn SessionProvider>,
    sink: Arc<dyn MessageSink>,
}

impl FrameRouter {
    /// Create a router over the given session and sink.
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>, sink: Arc<dyn MessageSink>) -> Self {
        Self { session, sink }
    }

    /// Route one raw text frame.
    pub fn route(&self, raw: &str) -> Dispatch {
        let frame: serde_json::Value = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Failed to parse inbound frame");
                return Dispatch::Malformed;
            },
        };

        match InboundKind::of(&frame) {
            InboundKind::Pong => {
                trace!("Heartbeat acknowledged");
                self.session.report_activity();
                Dispatch::Continue
            },
            InboundKind::SessionUpdate => {
                if self.session.is_valid() {
                    self.session.report_activity();
                    Dispatch::Continue
                } else {
                    warn!("Session update received for an invalid session");
                    Dispatch::Disconnect
                }
            },
            InboundKind::MetricsUpdate => {
                self.sink.deliver(InboundEvent::MetricsUpdate(frame));
                Dispatch::Continue
            },
            InboundKind::Other(kind) => {
                debug!(frame_type = kind.as_deref().unwrap_or("<none>"), "Unhandled frame");
                Dispatch::Continue
            },
        }
    }
}

impl std::fmt::Debug for FrameRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRouter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::watch;

    use super::*;

    struct FakeSession {
        valid: AtomicBool,
        activity: AtomicUsize,
        token: watch::Sender<Option<String>>,
    }

    impl FakeSession {
        fn new(valid: bool) -> Arc<Self> {
            Arc::new(Self {
                valid: AtomicBool::new(valid),
                activity: AtomicUsize::new(0),
                token: watch::channel(Some("tok".to_string())).0,
            })
        }

        fn activity(&self) -> usize {
            self.activity.load(Ordering::SeqCst)
        }
    }

    impl SessionProvider for FakeSession {
        fn current_token(&self) -> Option<String> {
            self.token.borrow().clone()
        }

        fn current_customer_id(&self) -> Option<String> {
            Some("cust".into())
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

    #[derive(Default)]
    struct FakeSink {
        events: Mutex<Vec<InboundEvent>>,
    }

    impl MessageSink for FakeSink {
        fn deliver(&self, event: InboundEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn router(valid: bool) -> (FrameRouter, Arc<FakeSession>, Arc<FakeSink>) {
        let session = FakeSession::new(valid);
        let sink = Arc::new(FakeSink::default());
        let router = FrameRouter::new(session.clone(), sink.clone());
        (router, session, sink)
    }

    #[test]
    fn pong_reports_activity_once() {
        let (router, session, sink) = router(true);
        assert_eq!(router.route(r#"{"type":"pong","timestamp":"t"}"#), Dispatch::Continue);
        assert_eq!(session.activity(), 1);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn session_update_refreshes_valid_session() {
        let (router, session, _) = router(true);
        assert_eq!(
            router.route(r#"{"type":"session_update","status":"active"}"#),
            Dispatch::Continue
        );
        assert_eq!(session.activity(), 1);
    }

    #[test]
    fn session_update_for_invalid_session_disconnects() {
        let (router, session, _) = router(false);
        assert_eq!(router.route(r#"{"type":"session_update"}"#), Dispatch::Disconnect);
        assert_eq!(session.activity(), 0);
    }

    #[test]
    fn metrics_update_is_forwarded_verbatim() {
        let (router, _, sink) = router(true);
        let raw = r#"{"type":"metrics_update","data":{"waiting":4},"timestamp":"t"}"#;
        assert_eq!(router.route(raw), Dispatch::Continue);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let expected: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(events[0], InboundEvent::MetricsUpdate(expected));
    }

    #[test]
    fn unknown_and_untyped_frames_are_ignored() {
        let (router, session, sink) = router(true);
        assert_eq!(router.route(r#"{"type":"connection_status"}"#), Dispatch::Continue);
        assert_eq!(router.route(r#"{"data":1}"#), Dispatch::Continue);
        assert_eq!(router.route("42"), Dispatch::Continue);
        assert_eq!(session.activity(), 0);
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_malformed() {
        let (router, session, _) = router(true);
        assert_eq!(router.route("{not json"), Dispatch::Malformed);
        assert_eq!(router.route(""), Dispatch::Malformed);
        assert_eq!(session.activity(), 0);
    }
}
