//! # Session/Cancellation Controller
//!
//! Owns one cancellation token per running session.
//!
//! Cancellation is cooperative: the orchestrator receives a clone of the
//! session's token and polls it before each page fetch and each item. A
//! request never interrupts I/O already in flight.

use crate::session::SessionId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tracks the cancellation state of concurrently running sessions
///
/// Each session gets a child of a controller-wide root token, so sessions
/// never share state yet [`SessionController::cancel_all`] reaches them all.
pub struct SessionController {
    root: CancellationToken,
    sessions: Mutex<HashMap<SessionId, CancellationToken>>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new session and return its id.
    pub fn new_session(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions().insert(id, self.root.child_token());
        debug!(session_id = %id, "Session registered");
        id
    }

    /// Ask a session to stop.
    ///
    /// Idempotent. Unknown and already finished sessions are ignored.
    /// Returns whether a running session received the request.
    pub fn request_cancel(&self, id: &SessionId) -> bool {
        match self.sessions().get(id) {
            Some(token) => {
                if !token.is_cancelled() {
                    info!(session_id = %id, "Cancellation requested");
                }
                token.cancel();
                true
            }
            None => {
                debug!(session_id = %id, "Cancellation ignored for inactive session");
                false
            }
        }
    }

    /// Whether cancellation was requested for a running session.
    ///
    /// Finished sessions are forgotten and report `false`.
    pub fn is_cancelled(&self, id: &SessionId) -> bool {
        self.sessions()
            .get(id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// The session's token, to be moved into the orchestrator
    pub fn token(&self, id: &SessionId) -> Option<CancellationToken> {
        self.sessions().get(id).cloned()
    }

    /// Forget a session once it reached a terminal state.
    pub fn finish(&self, id: &SessionId) {
        if self.sessions().remove(id).is_some() {
            debug!(session_id = %id, "Session released");
        }
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.sessions().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }

    /// Cancel every running session, and every session registered later.
    pub fn cancel_all(&self) {
        info!(active = self.active_count(), "Cancelling all sessions");
        self.root.cancel();
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}
