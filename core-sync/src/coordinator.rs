//! # Sync Coordinator
//!
//! Session control surface of the sync engine.
//!
//! ## Overview
//!
//! The `SyncCoordinator` is the single entry point for callers:
//! - Start sessions in the background or run them inline
//! - Cancel sessions through the [`SessionController`]
//! - Report live status from each session's `watch` channel, falling back to
//!   the audit log once a session is gone from memory
//! - Cap the number of concurrently running sessions
//!
//! A session's slot is released when its task ends for any reason. A task
//! that dies before finalizing leaves a `Failed` snapshot behind. Sessions
//! whose audit entry could not be written are kept in memory so their
//! status stays queryable.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(client, store, channel, CoordinatorSettings::default());
//!
//! let session_id = coordinator.start_sync(SyncRequest::from_config(&config)).await?;
//! let mut progress = coordinator.subscribe(session_id);
//!
//! // Later, if needed
//! coordinator.cancel_sync(session_id).await?;
//!
//! let session = coordinator.wait_for(session_id).await?;
//! println!("{}: {:?}", session.status, session.counters);
//! ```

use crate::controller::SessionController;
use crate::manager::{SyncManager, SyncRequest};
use crate::reconcile::{CatalogField, ChangeDetector};
use crate::session::{SessionError, SessionId, SyncSession};
use crate::{Result, SyncError};
use bridge_traits::time::{Clock, SystemClock};
use core_library::CatalogStore;
use core_runtime::config::{SyncEngineConfig, DEFAULT_MAX_CONCURRENT_SESSIONS};
use core_runtime::events::{ProgressChannel, ProgressStream};
use provider_catalog::CatalogClient;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Finished sessions kept in memory when their audit entry is missing
const MAX_RETAINED_SESSIONS: usize = 64;

type ActiveSessions = Arc<Mutex<HashMap<SessionId, watch::Receiver<SyncSession>>>>;
type RetainedSessions = Arc<Mutex<HashMap<SessionId, SyncSession>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Sessions allowed to run at once
    pub max_concurrent_sessions: usize,

    /// Fields compared when classifying items
    pub change_fields: BTreeSet<CatalogField>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            change_fields: ChangeDetector::default().fields().clone(),
        }
    }
}

impl From<&SyncEngineConfig> for CoordinatorSettings {
    fn from(config: &SyncEngineConfig) -> Self {
        Self {
            max_concurrent_sessions: config.max_concurrent_sessions,
            ..Self::default()
        }
    }
}

/// Entry points for starting, observing and cancelling sync sessions
pub struct SyncCoordinator {
    settings: CoordinatorSettings,
    manager: Arc<SyncManager>,
    store: Arc<dyn CatalogStore>,
    channel: ProgressChannel,
    controller: Arc<SessionController>,
    /// Live status of running sessions
    active: ActiveSessions,
    /// Finished sessions missing from the audit log
    retained: RetainedSessions,
}

impl SyncCoordinator {
    pub fn new(
        client: Arc<CatalogClient>,
        store: Arc<dyn CatalogStore>,
        channel: ProgressChannel,
        settings: CoordinatorSettings,
    ) -> Self {
        Self::with_clock(client, store, channel, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        client: Arc<CatalogClient>,
        store: Arc<dyn CatalogStore>,
        channel: ProgressChannel,
        settings: CoordinatorSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let manager = SyncManager::new(client, Arc::clone(&store), channel.clone())
            .with_change_detector(ChangeDetector::new(settings.change_fields.iter().copied()))
            .with_clock(clock);

        Self {
            settings,
            manager: Arc::new(manager),
            store,
            channel,
            controller: Arc::new(SessionController::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            retained: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Start a session in a background task and return its id.
    ///
    /// # Errors
    ///
    /// - `SyncError::InvalidRequest` if the request is out of bounds
    /// - `SyncError::TooManySessions` if the concurrency cap is reached
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn start_sync(&self, request: SyncRequest) -> Result<SessionId> {
        let (session, status) = self.register(&request)?;
        let session_id = session.id;

        let coordinator = self.clone_for_task();
        tokio::spawn(async move {
            coordinator.execute(session, request, status).await;
        });

        info!(session_id = %session_id, "Sync session started in background");
        Ok(session_id)
    }

    /// Run a session to its terminal state in the current task.
    ///
    /// # Errors
    ///
    /// Same as [`SyncCoordinator::start_sync`]. Failures during the run are
    /// reported through the returned session's status.
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn run_sync(&self, request: SyncRequest) -> Result<SyncSession> {
        let (session, status) = self.register(&request)?;
        Ok(self.execute(session, request, status).await)
    }

    /// Request cancellation. Idempotent; finished or unknown sessions are
    /// left alone.
    pub async fn cancel_sync(&self, session_id: SessionId) -> Result<()> {
        if self.controller.request_cancel(&session_id) {
            info!(session_id = %session_id, "Sync cancellation requested");
        }
        Ok(())
    }

    /// Latest snapshot of a session, running or finished
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SessionNotFound` if the session is neither running
    /// nor in the audit log.
    pub async fn get_status(&self, session_id: SessionId) -> Result<SyncSession> {
        let live = lock(&self.active)
            .get(&session_id)
            .map(|status| status.borrow().clone());
        if let Some(session) = live {
            return Ok(session);
        }

        self.find_finished(session_id).await
    }

    /// Observe progress events of one session.
    pub fn subscribe(&self, session_id: SessionId) -> ProgressStream {
        self.channel.subscribe(session_id.to_string())
    }

    /// Wait until the session reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - `SyncError::SessionNotFound` for an unknown session
    /// - `SyncError::TaskFailed` if the session task ended without finalizing
    pub async fn wait_for(&self, session_id: SessionId) -> Result<SyncSession> {
        let receiver = lock(&self.active).get(&session_id).cloned();

        match receiver {
            Some(mut receiver) => {
                let session = receiver
                    .wait_for(|session| session.status.is_terminal())
                    .await
                    .map_err(|_| {
                        SyncError::TaskFailed(format!("session {} ended unexpectedly", session_id))
                    })?;
                Ok(session.clone())
            }
            None => self.find_finished(session_id).await,
        }
    }

    /// Finished sessions, most recent first
    pub async fn list_history(&self, limit: u32) -> Result<Vec<SyncSession>> {
        self.store
            .list_session_history(limit)
            .await?
            .into_iter()
            .map(SyncSession::try_from)
            .collect()
    }

    /// Ids of sessions currently running
    pub async fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.active).keys().copied().collect();
        ids.sort();
        ids
    }

    /// Cancel every running session.
    pub fn shutdown(&self) {
        self.controller.cancel_all();
    }

    async fn find_finished(&self, session_id: SessionId) -> Result<SyncSession> {
        let retained = lock(&self.retained).get(&session_id).cloned();
        if let Some(session) = retained {
            return Ok(session);
        }

        match self.store.find_session_audit(&session_id.to_string()).await? {
            Some(audit) => SyncSession::try_from(audit),
            None => Err(SyncError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }

    fn register(&self, request: &SyncRequest) -> Result<(SyncSession, watch::Sender<SyncSession>)> {
        request.validate(self.manager.client().max_page_size())?;

        let mut active = lock(&self.active);
        if active.len() >= self.settings.max_concurrent_sessions {
            return Err(SyncError::TooManySessions {
                limit: self.settings.max_concurrent_sessions,
            });
        }

        let session_id = self.controller.new_session();
        let session = SyncSession::start(session_id, request.operation, self.manager.now_ms());
        let (status, receiver) = watch::channel(session.clone());
        active.insert(session_id, receiver);

        Ok((session, status))
    }

    async fn execute(
        &self,
        session: SyncSession,
        request: SyncRequest,
        status: watch::Sender<SyncSession>,
    ) -> SyncSession {
        let slot = SessionSlot {
            session_id: session.id,
            status,
            manager: Arc::clone(&self.manager),
            controller: Arc::clone(&self.controller),
            active: Arc::clone(&self.active),
            retained: Arc::clone(&self.retained),
        };

        let finished = match self.controller.token(&slot.session_id) {
            Some(token) => self.manager.run(session, &request, token, &slot.status).await,
            None => slot.abort("session was released before it ran"),
        };

        if !finished.audit_persisted() {
            retain(&slot.retained, finished.clone());
        }
        finished
    }

    /// Clone for background task
    fn clone_for_task(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            manager: Arc::clone(&self.manager),
            store: Arc::clone(&self.store),
            channel: self.channel.clone(),
            controller: Arc::clone(&self.controller),
            active: Arc::clone(&self.active),
            retained: Arc::clone(&self.retained),
        }
    }
}

fn retain(retained: &Mutex<HashMap<SessionId, SyncSession>>, session: SyncSession) {
    let mut retained = lock(retained);
    if retained.len() >= MAX_RETAINED_SESSIONS && !retained.contains_key(&session.id) {
        let oldest = retained
            .values()
            .min_by_key(|s| s.finished_at.unwrap_or(s.started_at))
            .map(|s| s.id);
        if let Some(oldest) = oldest {
            retained.remove(&oldest);
        }
    }
    retained.insert(session.id, session);
}

/// A running session's registration, released on drop
///
/// Dropped on normal completion and while unwinding from a panic in the
/// session task alike.
struct SessionSlot {
    session_id: SessionId,
    status: watch::Sender<SyncSession>,
    manager: Arc<SyncManager>,
    controller: Arc<SessionController>,
    active: ActiveSessions,
    retained: RetainedSessions,
}

impl SessionSlot {
    /// Publish and keep a `Failed` snapshot for a session that never finalized.
    fn abort(&self, reason: &str) -> SyncSession {
        let snapshot = self.status.borrow().clone();
        let failed = match snapshot.clone().fail(SessionError::session(reason), self.manager.now_ms()) {
            Ok(failed) => failed,
            Err(_) => return snapshot,
        };
        error!(session_id = %self.session_id, reason, "Sync session aborted");
        self.status.send_replace(failed.clone());
        retain(&self.retained, failed.clone());
        failed
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let finalized = self.status.borrow().status.is_terminal();
        if !finalized {
            warn!(session_id = %self.session_id, "Session task ended without finalizing");
            self.abort("session task aborted");
        }
        lock(&self.active).remove(&self.session_id);
        self.controller.finish(&self.session_id);
    }
}
