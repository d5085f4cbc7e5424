//! Session binding between the channel and the application's session state.
//!
//! The channel never owns session data. It reads through a
//! [`SessionProvider`] on connect and whenever it builds an outbound frame,
//! reports activity on liveness replies, and watches the token for
//! rotation.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Read-through access to the current customer session.
pub trait SessionProvider: Send + Sync {
    /// Current session token, if any.
    fn current_token(&self) -> Option<String>;

    /// Customer the session belongs to, if known.
    fn current_customer_id(&self) -> Option<String>;

    /// Record that the session is still in use.
    fn report_activity(&self);

    /// Returns `true` if the session may keep using the channel.
    fn is_valid(&self) -> bool;

    /// Watch the session token. The returned receiver has already seen the
    /// current value; only later changes are reported.
    fn watch_token(&self) -> watch::Receiver<Option<String>>;
}

/// Snapshot returned when a session is initialised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session token.
    pub id: String,
    /// Owning customer.
    pub customer_id: String,
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// Last recorded activity.
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SessionRecord {
    customer_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
}

/// In-memory session store.
///
/// The token lives in a `watch` channel so token rotation reaches every
/// channel bound to the store. A session is valid while it has a token.
#[derive(Debug)]
pub struct SessionStore {
    token: watch::Sender<Option<String>>,
    record: RwLock<SessionRecord>,
}

impl SessionStore {
    /// Create an empty store with no active session.
    #[must_use]
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        Self {
            token,
            record: RwLock::new(SessionRecord::default()),
        }
    }

    /// Create a store with an already-issued token.
    #[must_use]
    pub fn with_session(customer_id: impl Into<String>, token: impl Into<String>) -> Self {
        let store = Self::new();
        store.initialize(customer_id, Some(token.into()));
        store
    }

    /// Start a session for a customer.
    ///
    /// When `session_id` is `None` a token of the form
    /// `session_{customer}_{unix_millis}` is generated.
    pub fn initialize(
        &self,
        customer_id: impl Into<String>,
        session_id: Option<String>,
    ) -> SessionInfo {
        let customer_id = customer_id.into();
        let now = Utc::now();
        let id = session_id.unwrap_or_else(|| {
            format!("session_{customer_id}_{}", now.timestamp_millis())
        });

        {
            let mut record = self.write();
            record.customer_id = Some(customer_id.clone());
            record.started_at = Some(now);
            record.last_activity = Some(now);
        }
        self.set_token(Some(id.clone()));

        info!(customer_id = %customer_id, session_id = %id, "Session initialized");
        SessionInfo {
            id,
            customer_id,
            start_time: now,
            last_activity: now,
        }
    }

    /// Replace the session token. Watchers are notified only if the value
    /// changes.
    pub fn rotate_token(&self, token: impl Into<String>) {
        let token = token.into();
        debug!(session_id = %token, "Rotating session token");
        self.set_token(Some(token));
    }

    /// Time of the last recorded activity.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.read().last_activity
    }

    /// When the current session started.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read().started_at
    }

    /// Elapsed session time as `MM:SS`, measured at `now`.
    #[must_use]
    pub fn duration_label_at(&self, now: DateTime<Utc>) -> String {
        let Some(start) = self.started_at() else {
            return "00:00".to_string();
        };
        let secs = now.signed_duration_since(start).num_seconds().max(0);
        let mins = secs.checked_div(60).unwrap_or(0);
        let rem = secs.checked_rem(60).unwrap_or(0);
        format!("{mins:02}:{rem:02}")
    }

    /// Elapsed session time as `MM:SS`.
    #[must_use]
    pub fn duration_label(&self) -> String {
        self.duration_label_at(Utc::now())
    }

    /// Drop all session state, including the token.
    pub fn clear(&self) {
        *self.write() = SessionRecord::default();
        self.set_token(None);
    }

    /// End the current session.
    pub fn end(&self) {
        if let Some(token) = self.current_token() {
            info!(session_id = %token, "Session ended");
        }
        self.clear();
    }

    fn set_token(&self, token: Option<String>) {
        self.token.send_if_modified(|current| {
            if *current == token {
                false
            } else {
                *current = token;
                true
            }
        });
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for SessionStore {
    fn current_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    fn current_customer_id(&self) -> Option<String> {
        self.read().customer_id.clone()
    }

    fn report_activity(&self) {
        self.write().last_activity = Some(Utc::now());
    }

    fn is_valid(&self) -> bool {
        if self.token.borrow().is_none() {
            warn!("No active session token");
            return false;
        }
        true
    }

    fn watch_token(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}
