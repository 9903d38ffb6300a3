//! Lazy, finite pagination over the remote catalog
//!
//! A [`CatalogStream`] walks the collection page by page from offset 0. It
//! stops on a short page or once the server-reported total is reached,
//! whichever happens first, and cannot be rewound.

use bridge_traits::{CatalogItem, MediaKind};
use futures::stream::{self, Stream};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connector::{CatalogClient, PageQuery, RejectedItem};
use crate::error::{FetchError, Result};

/// One page as seen by the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPage {
    /// Zero-based page number
    pub page_index: u64,
    pub offset: u64,
    pub items: Vec<CatalogItem>,
    /// Entries on this page that could not be decoded
    pub rejected: Vec<RejectedItem>,
    pub total_items: u64,
    pub total_pages: u64,
}

/// Consecutive failed pages tolerated before the first page has reported a total
pub const DEFAULT_MAX_BLIND_SKIPS: u32 = 3;

/// One item with its position in the scan
#[derive(Debug, Clone, PartialEq)]
pub struct StreamItem {
    pub item: CatalogItem,
    pub page_index: u64,
    pub total_pages: u64,
    pub total_items: u64,
    /// Offset of the page the item came from
    pub offset: u64,
}

/// Finite, non-restartable catalog scan
///
/// After a [`FetchError::Transient`] the stream has already moved past the
/// failed window, so the caller may keep pulling. While no page has reported
/// a total yet, at most [`DEFAULT_MAX_BLIND_SKIPS`] consecutive windows are
/// skipped before the stream gives up. Any other error ends the stream.
///
/// [`next_item`](Self::next_item) only yields decoded items; rejected entries
/// are reported through [`next_page`](Self::next_page).
pub struct CatalogStream {
    client: Arc<CatalogClient>,
    kinds: BTreeSet<MediaKind>,
    page_size: u32,
    offset: u64,
    page_index: u64,
    total: Option<u64>,
    exhausted: bool,
    buffer: VecDeque<StreamItem>,
    min_page_interval: Option<Duration>,
    last_fetch: Option<Instant>,
    pages_fetched: u64,
    pages_skipped: u64,
    blind_skips: u32,
    max_blind_skips: u32,
}

impl CatalogStream {
    pub(crate) fn new(client: Arc<CatalogClient>, kinds: BTreeSet<MediaKind>, page_size: u32) -> Self {
        Self {
            client,
            kinds,
            page_size,
            offset: 0,
            page_index: 0,
            total: None,
            exhausted: false,
            buffer: VecDeque::new(),
            min_page_interval: None,
            last_fetch: None,
            pages_fetched: 0,
            pages_skipped: 0,
            blind_skips: 0,
            max_blind_skips: DEFAULT_MAX_BLIND_SKIPS,
        }
    }

    /// Cap consecutive skipped windows while the collection size is unknown.
    pub fn with_max_blind_skips(mut self, max: u32) -> Self {
        self.max_blind_skips = max;
        self
    }

    /// Enforce a minimum delay between consecutive page requests.
    pub fn with_min_page_interval(mut self, interval: Duration) -> Self {
        self.min_page_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Whether another page request will be made.
    pub fn has_next_page(&self) -> bool {
        if self.exhausted {
            return false;
        }
        match self.total {
            Some(total) => self.offset < total,
            None => true,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Offset of the next page request
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Server-reported total, once the first page has arrived
    pub fn total_items(&self) -> Option<u64> {
        self.total
    }

    pub fn total_pages(&self) -> u64 {
        self.total
            .map(|total| total.div_ceil(u64::from(self.page_size)))
            .unwrap_or(0)
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Pages given up on after exhausting retries
    pub fn pages_skipped(&self) -> u64 {
        self.pages_skipped
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the scan is complete.
    pub async fn next_page(&mut self) -> Result<Option<StreamPage>> {
        if !self.has_next_page() {
            self.exhausted = true;
            return Ok(None);
        }

        self.pace().await;

        let query = PageQuery {
            offset: self.offset,
            limit: self.page_size,
            kinds: self.kinds.clone(),
        };

        let result = self.client.fetch_page(&query).await;
        self.last_fetch = Some(Instant::now());

        let page = match result {
            Ok(page) => page,
            Err(error) => {
                self.handle_failure(&error);
                return Err(error);
            }
        };

        let page_index = self.page_index;
        self.blind_skips = 0;
        self.pages_fetched += 1;
        self.page_index += 1;
        self.offset += page.returned as u64;
        self.total = Some(page.total);

        if page.returned < self.page_size as usize || self.offset >= page.total {
            debug!(
                offset = self.offset,
                total = page.total,
                returned = page.returned,
                "Catalog scan reached the end"
            );
            self.exhausted = true;
        }

        Ok(Some(StreamPage {
            page_index,
            offset: query.offset,
            items: page.items,
            rejected: page.rejected,
            total_items: page.total,
            total_pages: self.total_pages(),
        }))
    }

    /// Pull the next item, fetching pages as needed.
    ///
    /// Returns `Ok(None)` once the scan is complete.
    pub async fn next_item(&mut self) -> Result<Option<StreamItem>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }

            let Some(page) = self.next_page().await? else {
                return Ok(None);
            };

            let StreamPage {
                page_index,
                offset,
                items,
                total_items,
                total_pages,
                ..
            } = page;

            self.buffer.extend(items.into_iter().map(|item| StreamItem {
                item,
                page_index,
                total_pages,
                total_items,
                offset,
            }));
        }
    }

    /// Adapt into a [`futures::Stream`] of items.
    ///
    /// Transient page failures surface as `Err` items and the stream
    /// continues; it ends after the scan completes or a fatal error.
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamItem>> {
        stream::unfold(self, |mut scan| async move {
            match scan.next_item().await {
                Ok(Some(item)) => Some((Ok(item), scan)),
                Ok(None) => None,
                Err(error) => Some((Err(error), scan)),
            }
        })
    }

    fn handle_failure(&mut self, error: &FetchError) {
        if !error.is_transient() {
            self.exhausted = true;
            return;
        }

        if self.total.is_none() {
            self.blind_skips += 1;
            if self.blind_skips >= self.max_blind_skips {
                warn!(
                    offset = self.offset,
                    failures = self.blind_skips,
                    "Giving up on catalog scan before any page succeeded"
                );
                self.exhausted = true;
                return;
            }
        }

        warn!(
            offset = self.offset,
            page_index = self.page_index,
            total_known = self.total.is_some(),
            "Skipping catalog page after retries were exhausted"
        );
        self.pages_skipped += 1;
        self.page_index += 1;
        self.offset += u64::from(self.page_size);
        if self.total.is_some_and(|total| self.offset >= total) {
            self.exhausted = true;
        }
    }

    async fn pace(&self) {
        if let (Some(interval), Some(last)) = (self.min_page_interval, self.last_fetch) {
            let ready_at = last + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }
}

impl std::fmt::Debug for CatalogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStream")
            .field("kinds", &self.kinds)
            .field("page_size", &self.page_size)
            .field("offset", &self.offset)
            .field("total", &self.total)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::CatalogClientConfig;
    use crate::testing::{sample_items, FakeCatalogServer};
    use bridge_traits::http::RetryPolicy;
    use bridge_traits::time::ManualClock;
    use futures::StreamExt;
    use std::collections::HashSet;

    fn client_for(server: Arc<FakeCatalogServer>) -> Arc<CatalogClient> {
        let config = CatalogClientConfig {
            base_url: "http://catalog.test".to_string(),
            api_key: "key".to_string(),
            max_page_size: 500,
            retry_policy: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: Duration::ZERO,
            },
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 32,
        };
        Arc::new(CatalogClient::with_config(
            server,
            config,
            Arc::new(ManualClock::default()),
        ))
    }

    async fn collect_ids(stream: &mut CatalogStream) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(entry) = stream.next_item().await.unwrap() {
            ids.push(entry.item.remote_id);
        }
        ids
    }

    #[tokio::test]
    async fn test_yields_every_item_once_for_uneven_pages() {
        for (total, page_size) in [(0usize, 3u32), (7, 3), (6, 3), (1, 500), (250, 100)] {
            let server = Arc::new(FakeCatalogServer::new(sample_items(total)));
            let client = client_for(server.clone());
            let mut stream = client.stream(MediaKind::ALL, page_size).unwrap();

            let ids = collect_ids(&mut stream).await;
            let unique: HashSet<_> = ids.iter().collect();

            assert_eq!(ids.len(), total, "N={total} P={page_size}");
            assert_eq!(unique.len(), total);
            assert!(!stream.has_next_page());
        }
    }

    #[tokio::test]
    async fn test_page_fetch_count_and_positions() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(250)));
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 100).unwrap();

        let mut sizes = Vec::new();
        while let Some(page) = stream.next_page().await.unwrap() {
            assert_eq!(page.total_pages, 3);
            assert_eq!(page.offset, page.page_index * 100);
            sizes.push(page.items.len());
        }

        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(server.request_count(), 3);
        assert_eq!(stream.pages_fetched(), 3);
    }

    #[tokio::test]
    async fn test_reported_total_lower_than_actual_stops_at_total() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(10)));
        server.set_reported_total(Some(4));
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 4).unwrap();

        assert_eq!(collect_ids(&mut stream).await.len(), 4);
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_reported_total_higher_than_actual_stops_on_short_page() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(5)));
        server.set_reported_total(Some(100));
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 4).unwrap();

        assert_eq!(collect_ids(&mut stream).await.len(), 5);
        assert_eq!(server.request_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_skips_one_page() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(9)));
        server.fail_offset(3, 503);
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 3).unwrap();

        let mut ids = Vec::new();
        let mut failures = Vec::new();
        loop {
            match stream.next_page().await {
                Ok(Some(page)) => ids.extend(page.items.into_iter().map(|i| i.remote_id)),
                Ok(None) => break,
                Err(error) => failures.push(error),
            }
        }

        assert_eq!(ids.len(), 6);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].offset(), Some(3));
        assert_eq!(server.requests_at_offset(3), 2);
        assert_eq!(stream.pages_skipped(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_first_page_skips_forward() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(250)));
        server.fail_offset(0, 500);
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 100).unwrap();

        assert!(stream.next_page().await.unwrap_err().is_transient());
        assert!(stream.has_next_page());

        let second = stream.next_page().await.unwrap().unwrap();
        assert_eq!(second.offset, 100);
        assert_eq!(second.page_index, 1);
        let third = stream.next_page().await.unwrap().unwrap();
        assert_eq!(third.items.len(), 50);
        assert!(stream.next_page().await.unwrap().is_none());

        assert_eq!(server.requested_offsets(), vec![0, 0, 100, 200]);
        assert_eq!(stream.pages_skipped(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_gives_up_after_blind_skips() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(50)));
        for offset in [0, 10, 20, 30, 40] {
            server.fail_offset(offset, 503);
        }
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 10).unwrap().with_max_blind_skips(3);

        let mut failures = 0;
        loop {
            match stream.next_page().await {
                Ok(Some(_)) => panic!("no page should succeed"),
                Ok(None) => break,
                Err(error) => {
                    assert!(error.is_transient());
                    failures += 1;
                }
            }
        }

        assert_eq!(failures, 3);
        assert_eq!(server.requests_at_offset(30), 0);
        assert_eq!(stream.pages_skipped(), 2);
        assert!(!stream.has_next_page());
    }

    #[tokio::test]
    async fn test_rejected_entries_reach_page_consumer() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(4)));
        server.replace_wire_item("item-0001", serde_json::json!({ "Id": "item-0001" }));
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 10).unwrap();

        let page = stream.next_page().await.unwrap().unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.rejected.len(), 1);
        assert_eq!(page.rejected[0].position, 1);
        assert!(stream.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_error_ends_stream() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(9)));
        server.fail_offset(3, 401);
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 3).unwrap();

        assert!(stream.next_page().await.unwrap().is_some());
        assert!(stream.next_page().await.unwrap_err().is_fatal());
        assert!(stream.next_page().await.unwrap().is_none());
        assert_eq!(server.requests_at_offset(3), 1);
    }

    #[tokio::test]
    async fn test_stream_is_not_restartable() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(3)));
        let client = client_for(server.clone());
        let mut stream = client.stream(MediaKind::ALL, 10).unwrap();

        assert_eq!(collect_ids(&mut stream).await.len(), 3);
        assert!(stream.next_item().await.unwrap().is_none());
        assert_eq!(server.request_count(), 1);

        let mut fresh = client.stream(MediaKind::ALL, 10).unwrap();
        assert_eq!(collect_ids(&mut fresh).await.len(), 3);
    }

    #[tokio::test]
    async fn test_kind_filter_restricts_items() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(10)));
        let client = client_for(server.clone());
        let mut stream = client.stream([MediaKind::Series], 4).unwrap();

        let mut count = 0;
        while let Some(entry) = stream.next_item().await.unwrap() {
            assert_eq!(entry.item.kind, MediaKind::Series);
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_into_stream_adapter() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(5)));
        let client = client_for(server);
        let items: Vec<_> = client
            .stream(MediaKind::ALL, 2)
            .unwrap()
            .into_stream()
            .collect()
            .await;

        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|entry| entry.is_ok()));
        assert_eq!(items[4].as_ref().unwrap().page_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_page_interval_paces_requests() {
        let server = Arc::new(FakeCatalogServer::new(sample_items(6)));
        let client = client_for(server);
        let mut stream = client
            .stream(MediaKind::ALL, 2)
            .unwrap()
            .with_min_page_interval(Duration::from_secs(1));

        let started = Instant::now();
        while stream.next_page().await.unwrap().is_some() {}

        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
