//! # Sync Session State Machine
//!
//! Lifecycle of one reconciliation run with validated state transitions.
//!
//! ## State Machine
//!
//! ```text
//! Running ──┬──> Completed
//!           ├──> CompletedWithErrors
//!           ├──> Failed
//!           └──> Cancelled
//! ```
//!
//! While running, a session also moves through phases:
//! `Initializing → Streaming ⇄ Reconciling → OrphanSweep → Finalizing`.
//!
//! Terminal transitions consume the session, so a terminal status is written
//! exactly once.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut session = SyncSession::start(SessionId::new(), SyncOperation::CatalogSync, now);
//! session.enter_phase(SyncPhase::Streaming)?;
//! session.record_outcome(ItemOutcome::Added);
//! let session = session.complete(later)?;
//! assert_eq!(session.status, SyncStatus::Completed);
//! ```

use crate::{Result, SyncError};
use core_library::SessionAudit;
use core_runtime::events::ProgressCounters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error messages kept per session; the counter keeps counting past this.
pub const MAX_RECORDED_ERRORS: usize = 100;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidSessionId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Status of a sync session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    /// Every page fetched and every item written
    Completed,
    /// Reached the end, but some items or pages were skipped
    CompletedWithErrors,
    /// Aborted on a fatal error
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::CompletedWithErrors => "completed_with_errors",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "completed_with_errors" => Ok(SyncStatus::CompletedWithErrors),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a session does with the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Reconcile the remote catalog into the local store
    CatalogSync,
    /// Scan and classify only; counters report what a sync would change
    Verify,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::CatalogSync => "catalog_sync",
            SyncOperation::Verify => "verify",
        }
    }

    /// Whether the store is left untouched
    pub fn is_dry_run(&self) -> bool {
        matches!(self, SyncOperation::Verify)
    }
}

impl FromStr for SyncOperation {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "catalog_sync" => Ok(SyncOperation::CatalogSync),
            "verify" => Ok(SyncOperation::Verify),
            _ => Err(SyncError::InvalidOperation(s.to_string())),
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step of a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Initializing,
    Streaming,
    Reconciling,
    OrphanSweep,
    Finalizing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Initializing => "initializing",
            SyncPhase::Streaming => "streaming",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::OrphanSweep => "orphan_sweep",
            SyncPhase::Finalizing => "finalizing",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Errors and Outcomes
// ============================================================================

/// One recorded problem of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    /// Item the error belongs to, for record write failures
    pub remote_id: Option<String>,
    /// Page offset, for page fetch failures
    pub offset: Option<u64>,
    pub message: String,
}

impl SessionError {
    /// A single item could not be written
    pub fn record(remote_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
            offset: None,
            message: message.into(),
        }
    }

    /// Offset of the page the item came from
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// A page could not be fetched
    pub fn page(offset: u64, message: impl Into<String>) -> Self {
        Self {
            remote_id: None,
            offset: Some(offset),
            message: message.into(),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self {
            remote_id: None,
            offset: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.remote_id, self.offset) {
            (Some(remote_id), _) => write!(f, "item {}: {}", remote_id, self.message),
            (None, Some(offset)) => write!(f, "page at offset {}: {}", offset, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Classification result of one reconciled item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Added,
    Updated,
    Unchanged,
    /// Write failed; the error is recorded separately
    Failed,
}

// ============================================================================
// Sync Session Entity
// ============================================================================

/// A sync session with state machine semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: SessionId,
    pub operation: SyncOperation,
    pub status: SyncStatus,
    pub phase: SyncPhase,
    pub counters: ProgressCounters,
    /// Server-reported catalog size, once known
    pub total_items: Option<u64>,
    /// First [`MAX_RECORDED_ERRORS`] errors
    pub errors: Vec<SessionError>,
    pub metadata: BTreeMap<String, String>,
    /// Unix timestamp in milliseconds
    pub started_at: i64,
    /// Unix timestamp in milliseconds; set once on the terminal transition
    pub finished_at: Option<i64>,
}

impl SyncSession {
    /// Create a running session with zeroed counters
    pub fn start(id: SessionId, operation: SyncOperation, now_ms: i64) -> Self {
        Self {
            id,
            operation,
            status: SyncStatus::Running,
            phase: SyncPhase::Initializing,
            counters: ProgressCounters::default(),
            total_items: None,
            errors: Vec::new(),
            metadata: BTreeMap::new(),
            started_at: now_ms,
            finished_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Move to another phase
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running
    pub fn enter_phase(&mut self, phase: SyncPhase) -> Result<()> {
        self.ensure_running("enter_phase")?;
        self.phase = phase;
        Ok(())
    }

    pub fn set_total_items(&mut self, total: u64) {
        self.total_items = Some(total);
    }

    pub fn record_outcome(&mut self, outcome: ItemOutcome) {
        self.counters.processed += 1;
        match outcome {
            ItemOutcome::Added => self.counters.added += 1,
            ItemOutcome::Updated => self.counters.updated += 1,
            ItemOutcome::Unchanged => self.counters.unchanged += 1,
            ItemOutcome::Failed => {}
        }
    }

    pub fn record_deleted(&mut self) {
        self.counters.deleted += 1;
    }

    /// Count an error and keep its message while under the cap
    pub fn record_error(&mut self, error: SessionError) {
        self.counters.errors += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(error);
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl ToString) {
        self.metadata.insert(key.into(), value.to_string());
    }

    /// Progress percentage (0-100)
    pub fn percent(&self) -> u8 {
        if self.status == SyncStatus::Completed || self.status == SyncStatus::CompletedWithErrors {
            return 100;
        }
        match self.total_items {
            Some(total) if total > 0 => {
                ((self.counters.processed as f64 / total as f64) * 100.0).min(100.0) as u8
            }
            _ => 0,
        }
    }

    /// Error lines for audit entries and terminal events
    pub fn error_summary(&self) -> Vec<String> {
        let mut summary: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        let unrecorded = self.counters.errors.saturating_sub(self.errors.len() as u64);
        if unrecorded > 0 {
            summary.push(overflow_line(unrecorded));
        }
        summary
    }

    /// Note on a finished session that its audit entry was not written.
    ///
    /// The failure counts as an error, so `Completed` becomes
    /// `CompletedWithErrors`.
    pub fn record_audit_failure(&mut self, message: impl std::fmt::Display) {
        self.set_metadata(AUDIT_METADATA_KEY, AUDIT_WRITE_FAILED);
        self.record_error(SessionError::session(format!("audit log write failed: {}", message)));
        if self.status == SyncStatus::Completed {
            self.status = SyncStatus::CompletedWithErrors;
        }
    }

    /// Whether this session's audit entry reached the store
    pub fn audit_persisted(&self) -> bool {
        self.metadata.get(AUDIT_METADATA_KEY).map(String::as_str) != Some(AUDIT_WRITE_FAILED)
    }

    /// Finish after reaching the end of the catalog
    ///
    /// Becomes `CompletedWithErrors` if any error was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running
    pub fn complete(mut self, now_ms: i64) -> Result<Self> {
        let status = if self.counters.errors > 0 {
            SyncStatus::CompletedWithErrors
        } else {
            SyncStatus::Completed
        };
        self.validate_transition(status)?;
        self.status = status;
        self.phase = SyncPhase::Finalizing;
        self.finished_at = Some(now_ms);
        Ok(self)
    }

    /// Abort with the causing error
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running
    pub fn fail(mut self, error: SessionError, now_ms: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.record_error(error);
        self.status = SyncStatus::Failed;
        self.phase = SyncPhase::Finalizing;
        self.finished_at = Some(now_ms);
        Ok(self)
    }

    /// Stop early at the caller's request
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not running
    pub fn cancel(mut self, now_ms: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Cancelled)?;
        self.status = SyncStatus::Cancelled;
        self.phase = SyncPhase::Finalizing;
        self.finished_at = Some(now_ms);
        Ok(self)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Audit log representation
    pub fn to_audit(&self) -> SessionAudit {
        SessionAudit {
            session_id: self.id.to_string(),
            operation: self.operation.as_str().to_string(),
            status: self.status.as_str().to_string(),
            processed: self.counters.processed,
            added: self.counters.added,
            updated: self.counters.updated,
            unchanged: self.counters.unchanged,
            deleted: self.counters.deleted,
            errors: self.counters.errors,
            error_summary: self.error_summary(),
            metadata: self.metadata.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn ensure_running(&self, action: &str) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: action.to_string(),
                reason: "Session must be running".to_string(),
            });
        }
        Ok(())
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (
                SyncStatus::Running,
                SyncStatus::Completed
                    | SyncStatus::CompletedWithErrors
                    | SyncStatus::Failed
                    | SyncStatus::Cancelled
            )
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

const AUDIT_METADATA_KEY: &str = "audit_log";
const AUDIT_WRITE_FAILED: &str = "write_failed";

const OVERFLOW_PREFIX: &str = "... and ";
const OVERFLOW_SUFFIX: &str = " more errors";

fn overflow_line(unrecorded: u64) -> String {
    format!("{}{}{}", OVERFLOW_PREFIX, unrecorded, OVERFLOW_SUFFIX)
}

fn is_overflow_line(line: &str) -> bool {
    line.strip_prefix(OVERFLOW_PREFIX)
        .and_then(|rest| rest.strip_suffix(OVERFLOW_SUFFIX))
        .is_some_and(|count| count.parse::<u64>().is_ok())
}

/// Rebuild a finished session from its audit entry
///
/// Error details come back as plain messages. The overflow line of a capped
/// error list is not an error and is dropped; the error counter still
/// carries the full count.
impl TryFrom<SessionAudit> for SyncSession {
    type Error = SyncError;

    fn try_from(audit: SessionAudit) -> Result<Self> {
        let status: SyncStatus = audit.status.parse()?;
        let phase = if status.is_terminal() {
            SyncPhase::Finalizing
        } else {
            SyncPhase::Initializing
        };

        Ok(SyncSession {
            id: SessionId::from_string(&audit.session_id)?,
            operation: audit.operation.parse()?,
            status,
            phase,
            counters: ProgressCounters {
                processed: audit.processed,
                added: audit.added,
                updated: audit.updated,
                unchanged: audit.unchanged,
                deleted: audit.deleted,
                errors: audit.errors,
            },
            total_items: None,
            errors: audit
                .error_summary
                .into_iter()
                .filter(|line| !is_overflow_line(line))
                .map(SessionError::session)
                .collect(),
            metadata: audit.metadata,
            started_at: audit.started_at,
            finished_at: audit.finished_at,
        })
    }
}
