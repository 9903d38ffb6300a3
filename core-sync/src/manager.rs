//! # Sync Manager
//!
//! Drives one reconciliation session from the first page fetch to the
//! terminal status.
//!
//! ## Workflow
//!
//! 1. Open a fresh [`CatalogStream`](provider_catalog::CatalogStream) for the
//!    requested kinds and page size
//! 2. For every item: look up the stored record, classify it as new,
//!    unchanged or updated, and write it through the [`CatalogStore`]
//! 3. Once the stream is exhausted, delete stored records of the synced
//!    kinds that the scan never saw
//! 4. Append the session audit entry, then emit the terminal progress event.
//!    A failed append is recorded on the returned session.
//!
//! ## Failure Handling
//!
//! - A record that fails to write is recorded and skipped.
//! - A malformed catalog entry is recorded as a failed item. If it carried
//!   no readable id the orphan sweep is skipped.
//! - A page that exhausted its retries is recorded and skipped; the orphan
//!   sweep is then skipped too unless the request opts in.
//! - A fatal fetch error, or a store that is unreachable, fails the session.
//! - Cancellation is polled before every page fetch and every item. No
//!   write is started after it is observed.

use crate::reconcile::{ChangeDetector, Classification};
use crate::session::{ItemOutcome, SessionError, SessionId, SyncOperation, SyncPhase, SyncSession, SyncStatus};
use crate::{Result, SyncError};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::{CatalogItem, MediaKind};
use core_library::{CatalogStore, LibraryError, StoredRecord};
use core_runtime::config::{SyncEngineConfig, DEFAULT_PAGE_SIZE};
use core_runtime::events::{ProgressChannel, ProgressEvent, ProgressKind};
use core_runtime::logging::strip_path;
use provider_catalog::{CatalogClient, FetchError, RejectedItem};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Parameters of one sync run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub operation: SyncOperation,
    pub kinds: BTreeSet<MediaKind>,
    pub page_size: u32,
    /// Minimum delay between page requests
    pub min_page_interval: Option<Duration>,
    /// Run the orphan sweep even if some pages were skipped
    pub sweep_on_partial_scan: bool,
    /// Free-form tags copied into the session
    pub metadata: BTreeMap<String, String>,
}

impl SyncRequest {
    pub fn new(kinds: impl IntoIterator<Item = MediaKind>, page_size: u32) -> Self {
        Self {
            operation: SyncOperation::CatalogSync,
            kinds: kinds.into_iter().collect(),
            page_size,
            min_page_interval: None,
            sweep_on_partial_scan: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Request using the configured kinds and page size
    pub fn from_config(config: &SyncEngineConfig) -> Self {
        Self::new(config.kinds.iter().copied(), config.page_size)
    }

    pub fn with_operation(mut self, operation: SyncOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_min_page_interval(mut self, interval: Duration) -> Self {
        self.min_page_interval = Some(interval);
        self
    }

    pub fn with_sweep_on_partial_scan(mut self, enabled: bool) -> Self {
        self.sweep_on_partial_scan = enabled;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check the request against the client's limits
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRequest` for an empty kind set or a page
    /// size outside `1..=max_page_size`.
    pub fn validate(&self, max_page_size: u32) -> Result<()> {
        if self.kinds.is_empty() {
            return Err(SyncError::InvalidRequest(
                "at least one media kind is required".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > max_page_size {
            return Err(SyncError::InvalidRequest(format!(
                "page size must be between 1 and {} (got {})",
                max_page_size, self.page_size
            )));
        }
        Ok(())
    }

    fn kinds_label(&self) -> String {
        self.kinds
            .iter()
            .map(MediaKind::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self::new(MediaKind::ALL, DEFAULT_PAGE_SIZE)
    }
}

/// How the scan ended
#[derive(Debug)]
enum ScanEnd {
    Exhausted,
    Cancelled,
    Aborted(SessionError),
}

/// Reconciliation orchestrator
pub struct SyncManager {
    client: Arc<CatalogClient>,
    store: Arc<dyn CatalogStore>,
    channel: ProgressChannel,
    detector: ChangeDetector,
    clock: Arc<dyn Clock>,
}

impl SyncManager {
    pub fn new(client: Arc<CatalogClient>, store: Arc<dyn CatalogStore>, channel: ProgressChannel) -> Self {
        Self {
            client,
            store,
            channel,
            detector: ChangeDetector::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_change_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &Arc<CatalogClient> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn channel(&self) -> &ProgressChannel {
        &self.channel
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Run a fresh session to completion without outside control.
    pub async fn sync(&self, request: &SyncRequest, token: CancellationToken) -> SyncSession {
        let session = SyncSession::start(SessionId::new(), request.operation, self.now_ms());
        let (status, _) = watch::channel(session.clone());
        self.run(session, request, token, &status).await
    }

    /// Drive `session` to a terminal state.
    ///
    /// Every snapshot is published through `status`; the last one is
    /// terminal. Never returns a running session.
    #[instrument(skip_all, fields(session_id = %session.id, operation = %request.operation))]
    pub async fn run(
        &self,
        session: SyncSession,
        request: &SyncRequest,
        token: CancellationToken,
        status: &watch::Sender<SyncSession>,
    ) -> SyncSession {
        let session = session.with_metadata(request.metadata.clone());
        let mut run = SessionRun::new(self, session, request, status);
        run.session.set_metadata("page_size", request.page_size);
        run.session.set_metadata("kinds", request.kinds_label());

        info!(
            page_size = request.page_size,
            kinds = %request.kinds_label(),
            "Sync session started"
        );
        run.emit_progress(None);

        let end = match request.validate(self.client.max_page_size()) {
            Ok(()) => run.scan(&token).await,
            Err(e) => ScanEnd::Aborted(SessionError::session(e.to_string())),
        };

        let end = match end {
            ScanEnd::Exhausted => run.sweep_orphans(&token).await,
            other => other,
        };

        run.finalize(end).await
    }
}

/// Mutable state of one session while it runs
struct SessionRun<'a> {
    manager: &'a SyncManager,
    request: &'a SyncRequest,
    status: &'a watch::Sender<SyncSession>,
    session: SyncSession,
    sequence: u64,
    seen: HashSet<String>,
    pages_skipped: u64,
    /// Rejected entries whose stored record cannot be identified
    anonymous_rejects: u64,
}

impl<'a> SessionRun<'a> {
    fn new(
        manager: &'a SyncManager,
        session: SyncSession,
        request: &'a SyncRequest,
        status: &'a watch::Sender<SyncSession>,
    ) -> Self {
        Self {
            manager,
            request,
            status,
            session,
            sequence: 0,
            seen: HashSet::new(),
            pages_skipped: 0,
            anonymous_rejects: 0,
        }
    }

    fn dry_run(&self) -> bool {
        self.request.operation.is_dry_run()
    }

    async fn scan(&mut self, token: &CancellationToken) -> ScanEnd {
        let manager = self.manager;
        let mut stream = match manager.client.stream(self.request.kinds.iter().copied(), self.request.page_size) {
            Ok(stream) => stream,
            Err(e) => return ScanEnd::Aborted(fetch_error(&e)),
        };
        if let Some(interval) = self.request.min_page_interval {
            stream = stream.with_min_page_interval(interval);
        }

        self.set_phase(SyncPhase::Streaming);

        loop {
            if token.is_cancelled() {
                info!(offset = stream.offset(), "Cancellation observed before page fetch");
                return ScanEnd::Cancelled;
            }

            let page = match stream.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Skipping catalog page");
                    self.pages_skipped += 1;
                    self.session.record_error(fetch_error(&e));
                    self.emit_progress(None);
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Catalog fetch failed, aborting session");
                    return ScanEnd::Aborted(fetch_error(&e));
                }
            };

            debug!(
                page_index = page.page_index,
                total_pages = page.total_pages,
                items = page.items.len(),
                "Reconciling catalog page"
            );
            self.session.set_total_items(page.total_items);
            self.set_phase(SyncPhase::Reconciling);

            for rejected in page.rejected {
                self.reject_item(rejected, page.offset);
            }

            for item in page.items {
                if token.is_cancelled() {
                    info!(
                        processed = self.session.counters.processed,
                        "Cancellation observed before item"
                    );
                    return ScanEnd::Cancelled;
                }

                let label = item.label();
                if let Err(e) = self.reconcile_item(item, page.offset).await {
                    return ScanEnd::Aborted(e);
                }
                self.emit_progress(Some(label));
            }

            self.set_phase(SyncPhase::Streaming);
        }

        self.session.set_metadata("pages_fetched", stream.pages_fetched());
        self.session.set_metadata("pages_skipped", self.pages_skipped);
        ScanEnd::Exhausted
    }

    /// Classify and write one item.
    ///
    /// Returns `Err` only when the store is unreachable; other write failures
    /// are recorded on the session.
    async fn reconcile_item(&mut self, item: CatalogItem, offset: u64) -> std::result::Result<(), SessionError> {
        let manager = self.manager;
        let store = &manager.store;
        let remote_id = item.remote_id.clone();
        // Seen even if the write fails, so the sweep never deletes it.
        self.seen.insert(remote_id.clone());

        let existing = match store.find_by_remote_id(&remote_id).await {
            Ok(existing) => existing,
            Err(e) => return self.write_failed(remote_id, offset, e),
        };

        let now = manager.now_ms();
        let classification = manager.detector.classify(existing.as_ref(), &item);
        let (outcome, record) = match (classification, existing) {
            (Classification::Unchanged, _) => {
                self.session.record_outcome(ItemOutcome::Unchanged);
                return Ok(());
            }
            (Classification::Updated(fields), Some(existing)) => {
                debug!(
                    remote_id = %remote_id,
                    changed = ?fields.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                    "Catalog item changed"
                );
                (ItemOutcome::Updated, existing.with_item(item, now))
            }
            _ => (ItemOutcome::Added, StoredRecord::new(item, now)),
        };

        if self.dry_run() {
            self.session.record_outcome(outcome);
            return Ok(());
        }

        match store.upsert(&record).await {
            Ok(()) => {
                debug!(
                    remote_id = %remote_id,
                    outcome = ?outcome,
                    file = record.item.file_path.as_deref().map(strip_path).unwrap_or("-"),
                    "Catalog record written"
                );
                self.session.record_outcome(outcome);
                Ok(())
            }
            Err(e) => self.write_failed(remote_id, offset, e),
        }
    }

    /// Record an entry the catalog sent but that could not be decoded.
    fn reject_item(&mut self, rejected: RejectedItem, offset: u64) {
        let entry = match rejected.remote_id {
            Some(remote_id) => {
                self.seen.insert(remote_id.clone());
                SessionError::record(remote_id, format!("malformed catalog entry: {}", rejected.reason))
                    .at_offset(offset)
            }
            None => {
                self.anonymous_rejects += 1;
                SessionError::page(
                    offset,
                    format!(
                        "malformed catalog entry at position {}: {}",
                        rejected.position, rejected.reason
                    ),
                )
            }
        };

        warn!(error = %entry, "Catalog entry rejected");
        self.session.record_outcome(ItemOutcome::Failed);
        self.session.record_error(entry);
        self.emit_progress(None);
    }

    fn write_failed(
        &mut self,
        remote_id: String,
        offset: u64,
        error: LibraryError,
    ) -> std::result::Result<(), SessionError> {
        let entry = SessionError::record(remote_id, error.to_string()).at_offset(offset);
        if error.is_unavailable() {
            error!(error = %error, "Catalog store unavailable, aborting session");
            return Err(entry);
        }

        warn!(error = %entry, "Failed to write catalog record");
        self.session.record_outcome(ItemOutcome::Failed);
        self.session.record_error(entry);
        Ok(())
    }

    async fn sweep_orphans(&mut self, token: &CancellationToken) -> ScanEnd {
        let partial = self.pages_skipped > 0 || self.anonymous_rejects > 0;
        if partial && !self.request.sweep_on_partial_scan {
            warn!(
                pages_skipped = self.pages_skipped,
                anonymous_rejects = self.anonymous_rejects,
                "Scan incomplete, skipping orphan sweep"
            );
            self.session.set_metadata("orphan_sweep", "skipped_partial_scan");
            return ScanEnd::Exhausted;
        }
        if token.is_cancelled() {
            return ScanEnd::Cancelled;
        }

        self.set_phase(SyncPhase::OrphanSweep);
        let manager = self.manager;
        let store = &manager.store;
        let kinds: Vec<MediaKind> = self.request.kinds.iter().copied().collect();

        let stored = match store.list_remote_ids_by_kind(&kinds).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list stored records for orphan sweep");
                return ScanEnd::Aborted(SessionError::session(format!("orphan sweep failed: {}", e)));
            }
        };

        let mut orphans: Vec<String> = stored
            .into_iter()
            .filter(|remote_id| !self.seen.contains(remote_id))
            .collect();
        orphans.sort();

        info!(orphans = orphans.len(), dry_run = self.dry_run(), "Orphan sweep");

        for remote_id in orphans {
            if token.is_cancelled() {
                info!("Cancellation observed during orphan sweep");
                return ScanEnd::Cancelled;
            }

            if self.dry_run() {
                self.session.record_deleted();
                continue;
            }

            match store.delete_by_remote_id(&remote_id).await {
                Ok(true) => {
                    debug!(remote_id = %remote_id, "Orphaned record deleted");
                    self.session.record_deleted();
                }
                Ok(false) => {}
                Err(e) if e.is_unavailable() => {
                    error!(error = %e, "Catalog store unavailable during orphan sweep");
                    return ScanEnd::Aborted(SessionError::record(remote_id, e.to_string()));
                }
                Err(e) => {
                    warn!(remote_id = %remote_id, error = %e, "Failed to delete orphaned record");
                    self.session
                        .record_error(SessionError::record(remote_id, e.to_string()));
                }
            }
        }

        self.session.set_metadata("orphan_sweep", "completed");
        self.emit_progress(None);
        ScanEnd::Exhausted
    }

    async fn finalize(mut self, end: ScanEnd) -> SyncSession {
        self.set_phase(SyncPhase::Finalizing);
        let snapshot = self.session.clone();
        let now = self.manager.now_ms();

        let transition = match end {
            ScanEnd::Exhausted => self.session.complete(now),
            ScanEnd::Cancelled => self.session.cancel(now),
            ScanEnd::Aborted(cause) => self.session.fail(cause, now),
        };
        let mut session = match transition {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Session could not be finalized");
                return snapshot;
            }
        };

        if let Err(e) = self.manager.store.append_session_audit(&session.to_audit()).await {
            error!(error = %e, "Failed to append session audit");
            session.record_audit_failure(e);
        }

        self.status.send_replace(session.clone());

        let kind = match session.status {
            SyncStatus::Completed | SyncStatus::CompletedWithErrors => ProgressKind::Completed,
            SyncStatus::Failed => ProgressKind::Error,
            SyncStatus::Cancelled => ProgressKind::Cancelled,
            SyncStatus::Running => ProgressKind::Progress,
        };
        let event = ProgressEvent::new(session.id.to_string(), self.sequence, kind)
            .with_timestamp(now)
            .with_percent(session.percent())
            .with_counters(session.counters)
            .with_phase(session.phase.as_str())
            .with_errors(session.error_summary());
        self.manager.channel.emit(event);

        let c = session.counters;
        info!(
            status = %session.status,
            processed = c.processed,
            added = c.added,
            updated = c.updated,
            unchanged = c.unchanged,
            deleted = c.deleted,
            errors = c.errors,
            duration_ms = session.duration_ms().unwrap_or_default(),
            "Sync session finished"
        );

        session
    }

    fn set_phase(&mut self, phase: SyncPhase) {
        if let Err(e) = self.session.enter_phase(phase) {
            debug!(error = %e, "Phase change ignored");
        }
    }

    fn emit_progress(&mut self, current_item: Option<String>) {
        let mut event = ProgressEvent::new(
            self.session.id.to_string(),
            self.sequence,
            ProgressKind::Progress,
        )
        .with_timestamp(self.manager.now_ms())
        .with_percent(self.session.percent())
        .with_counters(self.session.counters)
        .with_phase(self.session.phase.as_str());
        if let Some(label) = current_item {
            event = event.with_current_item(label);
        }

        self.sequence += 1;
        self.manager.channel.emit(event);
        self.status.send_replace(self.session.clone());
    }
}

fn fetch_error(error: &FetchError) -> SessionError {
    match error.offset() {
        Some(offset) => SessionError::page(offset, error.to_string()),
        None => SessionError::session(error.to_string()),
    }
}
