//! # Core Sync
//!
//! Reconciliation of a remote media catalog into the local store.
//!
//! ## Components
//!
//! - [`SyncCoordinator`]: start, cancel and observe sessions
//! - [`SyncManager`]: the per-session orchestrator (stream, classify, write,
//!   sweep orphans, finalize)
//! - [`SessionController`]: per-session cancellation tokens
//! - [`SyncSession`]: session state machine and counters
//! - [`ChangeDetector`]: configurable new/unchanged/updated classification

pub mod controller;
pub mod coordinator;
pub mod error;
pub mod manager;
pub mod reconcile;
pub mod session;
#[cfg(test)]
mod testing;

pub use controller::SessionController;
pub use coordinator::{CoordinatorSettings, SyncCoordinator};
pub use error::{Result, SyncError};
pub use manager::{SyncManager, SyncRequest};
pub use reconcile::{CatalogField, ChangeDetector, Classification};
pub use session::{
    ItemOutcome, SessionError, SessionId, SyncOperation, SyncPhase, SyncSession, SyncStatus,
};
