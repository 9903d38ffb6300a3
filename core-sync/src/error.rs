use core_library::LibraryError;
use provider_catalog::FetchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync session {session_id} not found")]
    SessionNotFound { session_id: String },

    #[error("Too many sync sessions running (limit {limit})")]
    TooManySessions { limit: usize },

    #[error("Invalid sync request: {0}")]
    InvalidRequest(String),

    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Catalog error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] LibraryError),

    #[error("Sync task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
