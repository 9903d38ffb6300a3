//! Remote library API connector
//!
//! Fetches catalog pages from the `/Items` endpoint with caching, per-call
//! timeouts and retry with exponential backoff.

use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::{CatalogItem, MediaKind};
use core_runtime::config::SyncEngineConfig;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::error::{FetchError, Result};
use crate::stream::CatalogStream;
use crate::types::{decode_item, DecodedItem, ItemsResponse};

/// Items endpoint, relative to the base URL
const ITEMS_ENDPOINT: &str = "/Items";

/// Header carrying the API key
const AUTH_HEADER: &str = "X-Emby-Token";

/// Extra fields requested for each item
const ITEM_FIELDS: &str =
    "Genres,Overview,ProviderIds,Path,ProductionYear,CommunityRating,RunTimeTicks,ImageTags";

/// Longest response body echoed into an error message
const MAX_ERROR_BODY: usize = 256;

/// Parameters of one page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub offset: u64,
    pub limit: u32,
    pub kinds: BTreeSet<MediaKind>,
}

impl PageQuery {
    /// Comma-joined API type names in a stable order.
    pub fn kind_filter(&self) -> String {
        self.kinds
            .iter()
            .map(|kind| kind.api_name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub offset: u64,
    /// Items of a supported kind, in server order
    pub items: Vec<CatalogItem>,
    /// Entries that could not be decoded
    pub rejected: Vec<RejectedItem>,
    /// Number of entries the server sent, unsupported and rejected ones included
    pub returned: usize,
    /// Server-reported collection size
    pub total: u64,
}

/// A page entry that could not be turned into a catalog item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    /// Absolute position in the collection
    pub position: u64,
    /// `Id` of the entry, when it carried a readable one
    pub remote_id: Option<String>,
    pub reason: String,
}

/// Connection settings for [`CatalogClient`]
#[derive(Debug, Clone)]
pub struct CatalogClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_page_size: u32,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl From<&SyncEngineConfig> for CatalogClientConfig {
    fn from(config: &SyncEngineConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            max_page_size: config.max_page_size,
            retry_policy: config.retry_policy(),
            request_timeout: config.request_timeout,
            cache_ttl: config.cache_ttl,
            cache_capacity: config.cache_capacity,
        }
    }
}

/// Remote catalog client
///
/// Knows nothing about local storage. One instance is meant to be shared by
/// every sync session so they also share its response cache.
///
/// # Example
///
/// ```ignore
/// use provider_catalog::CatalogClient;
/// use bridge_traits::MediaKind;
///
/// let client = Arc::new(CatalogClient::new(http_client, &engine_config));
/// let mut stream = client.stream([MediaKind::Movie], 100)?;
/// while let Some(entry) = stream.next_item().await? {
///     println!("{} ({}/{})", entry.item.title, entry.page_index + 1, entry.total_pages);
/// }
/// ```
pub struct CatalogClient {
    http_client: Arc<dyn HttpClient>,
    config: CatalogClientConfig,
    cache: ResponseCache<CatalogPage>,
}

impl CatalogClient {
    pub fn new(http_client: Arc<dyn HttpClient>, config: &SyncEngineConfig) -> Self {
        Self::with_config(http_client, config.into(), Arc::new(SystemClock))
    }

    /// Build a client with explicit settings and clock
    pub fn with_config(
        http_client: Arc<dyn HttpClient>,
        config: CatalogClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = ResponseCache::new(config.cache_capacity, config.cache_ttl, clock);
        Self {
            http_client,
            config,
            cache,
        }
    }

    pub fn max_page_size(&self) -> u32 {
        self.config.max_page_size
    }

    fn items_url(&self) -> String {
        format!("{}{}", self.config.base_url, ITEMS_ENDPOINT)
    }

    /// Start a fresh, finite scan of the catalog.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidRequest`] when `page_size` is zero or above the
    /// configured maximum, or when `kinds` is empty.
    pub fn stream(
        self: &Arc<Self>,
        kinds: impl IntoIterator<Item = MediaKind>,
        page_size: u32,
    ) -> Result<CatalogStream> {
        let kinds: BTreeSet<MediaKind> = kinds.into_iter().collect();

        if kinds.is_empty() {
            return Err(FetchError::InvalidRequest(
                "at least one media kind is required".to_string(),
            ));
        }

        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(FetchError::InvalidRequest(format!(
                "page size must be between 1 and {} (got {})",
                self.config.max_page_size, page_size
            )));
        }

        Ok(CatalogStream::new(Arc::clone(self), kinds, page_size))
    }

    /// Fetch a single page, served from cache when fresh.
    #[instrument(skip(self, query), fields(offset = query.offset, limit = query.limit))]
    pub async fn fetch_page(&self, query: &PageQuery) -> Result<CatalogPage> {
        let key = CacheKey {
            endpoint: self.items_url(),
            offset: query.offset,
            limit: query.limit,
            filter: query.kind_filter(),
        };

        if let Some(page) = self.cache.get(&key).await {
            debug!(items = page.items.len(), "Catalog page served from cache");
            return Ok(page);
        }

        let page = self.fetch_with_retry(query).await?;
        self.cache.insert(key, page.clone()).await;
        Ok(page)
    }

    /// Drop every cached page.
    pub async fn invalidate_cache(&self) {
        self.cache.clear().await;
    }

    async fn fetch_with_retry(&self, query: &PageQuery) -> Result<CatalogPage> {
        let policy = &self.config.retry_policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.execute_once(query).await {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status, "Catalog request succeeded");
                    return self.parse_page(query, &response);
                }
                Ok(response) if response.is_retryable() => format!("HTTP {}", response.status),
                Ok(response) => {
                    warn!(status = response.status, "Catalog request rejected");
                    return Err(FetchError::Fatal {
                        status: Some(response.status),
                        message: error_body(&response),
                    });
                }
                Err(e) if e.is_network_failure() => e.to_string(),
                Err(e) => {
                    warn!(error = %e, "Catalog request could not be sent");
                    return Err(FetchError::Fatal {
                        status: None,
                        message: e.to_string(),
                    });
                }
            };

            if attempt >= max_attempts {
                warn!(
                    attempt,
                    offset = query.offset,
                    error = %failure,
                    "Catalog request failed, retries exhausted"
                );
                return Err(FetchError::Transient {
                    offset: query.offset,
                    attempts: attempt,
                    message: failure,
                });
            }

            let delay = policy.backoff_delay(attempt) + jitter(policy.jitter);
            warn!(
                attempt,
                max_attempts,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                "Catalog request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn execute_once(&self, query: &PageQuery) -> bridge_traits::error::Result<HttpResponse> {
        let timeout = self.config.request_timeout;
        let request = HttpRequest::get(self.items_url())
            .query("StartIndex", query.offset)
            .query("Limit", query.limit)
            .query("IncludeItemTypes", query.kind_filter())
            .query("Recursive", "true")
            .query("Fields", ITEM_FIELDS)
            .header(AUTH_HEADER, self.config.api_key.as_str())
            .header("Accept", "application/json")
            .timeout(timeout);

        // Guard the call even if the HTTP backend ignores the request timeout.
        tokio::time::timeout(timeout, self.http_client.execute(request))
            .await
            .map_err(|_| BridgeError::Timeout(timeout))?
    }

    fn parse_page(&self, query: &PageQuery, response: &HttpResponse) -> Result<CatalogPage> {
        let body: ItemsResponse =
            serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode {
                offset: query.offset,
                message: e.to_string(),
            })?;

        let returned = body.items.len();
        let mut items: Vec<CatalogItem> = Vec::with_capacity(returned);
        let mut rejected = Vec::new();
        for (index, raw) in body.items.into_iter().enumerate() {
            match decode_item(raw) {
                DecodedItem::Item(item) => items.push(item),
                DecodedItem::Unsupported { item_type } => {
                    debug!(item_type = %item_type, "Skipping unsupported catalog item type");
                }
                DecodedItem::Malformed { remote_id, reason } => {
                    let position = query.offset + index as u64;
                    warn!(
                        position,
                        remote_id = remote_id.as_deref().unwrap_or("-"),
                        reason = %reason,
                        "Rejecting malformed catalog item"
                    );
                    rejected.push(RejectedItem {
                        position,
                        remote_id,
                        reason,
                    });
                }
            }
        }

        debug!(
            returned,
            kept = items.len(),
            rejected = rejected.len(),
            total = body.total_record_count,
            "Parsed catalog page"
        );

        Ok(CatalogPage {
            offset: query.offset,
            items,
            rejected,
            returned,
            total: body.total_record_count,
        })
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

fn error_body(response: &HttpResponse) -> String {
    let excerpt = response.body_excerpt(MAX_ERROR_BODY);
    match excerpt.trim() {
        "" => format!("HTTP {}", response.status),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::time::ManualClock;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> bridge_traits::error::Result<HttpResponse>;
        }
    }

    fn test_config() -> CatalogClientConfig {
        CatalogClientConfig {
            base_url: "https://media.example.com".to_string(),
            api_key: "test_key".to_string(),
            max_page_size: 500,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                jitter: Duration::ZERO,
            },
            request_timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 16,
        }
    }

    fn client(http: MockHttpClient) -> CatalogClient {
        CatalogClient::with_config(Arc::new(http), test_config(), Arc::new(ManualClock::default()))
    }

    fn query(offset: u64) -> PageQuery {
        PageQuery {
            offset,
            limit: 2,
            kinds: MediaKind::ALL.into_iter().collect(),
        }
    }

    fn page_body() -> &'static str {
        r#"{
            "Items": [
                { "Id": "m1", "Name": "Heat", "Type": "Movie", "ProductionYear": 1995 },
                { "Id": "e1", "Name": "Pilot", "Type": "Episode" }
            ],
            "TotalRecordCount": 2
        }"#
    }

    #[tokio::test]
    async fn test_fetch_page_success() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|request| {
                request.url == "https://media.example.com/Items"
                    && request.query_param("StartIndex") == Some("0")
                    && request.query_param("Limit") == Some("2")
                    && request.query_param("IncludeItemTypes") == Some("Movie,Series")
                    && request.headers.get("X-Emby-Token") == Some(&"test_key".to_string())
                    && request.timeout == Some(Duration::from_secs(5))
            })
            .returning(|_| Ok(HttpResponse::new(200, page_body())));

        let page = client(mock_http).fetch_page(&query(0)).await.unwrap();

        assert_eq!(page.returned, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].remote_id, "m1");
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, page_body())));

        let client = client(mock_http);
        let first = client.fetch_page(&query(0)).await.unwrap();
        let second = client.fetch_page(&query(0)).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(200, page_body())));

        let clock = Arc::new(ManualClock::default());
        let client = CatalogClient::with_config(Arc::new(mock_http), test_config(), clock.clone());

        client.fetch_page(&query(0)).await.unwrap();
        clock.advance(Duration::from_secs(61));
        client.fetch_page(&query(0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_cache_forces_refetch() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(2)
            .returning(|_| Ok(HttpResponse::new(200, page_body())));

        let client = client(mock_http);
        client.fetch_page(&query(0)).await.unwrap();
        client.invalidate_cache().await;
        client.fetch_page(&query(0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_retries_up_to_ceiling() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(3)
            .returning(|_| Ok(HttpResponse::new(500, "boom")));

        let result = client(mock_http).fetch_page(&query(40)).await;

        assert_eq!(
            result.unwrap_err(),
            FetchError::Transient {
                offset: 40,
                attempts: 3,
                message: "HTTP 500".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(2).returning(move |_| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(HttpResponse::new(429, ""))
            } else {
                Ok(HttpResponse::new(200, page_body()))
            }
        });

        let page = client(mock_http).fetch_page(&query(0)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_error_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(2).returning(move |_| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BridgeError::Network("connection reset".to_string()))
            } else {
                Ok(HttpResponse::new(200, page_body()))
            }
        });

        assert!(client(mock_http).fetch_page(&query(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal_without_retry() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(401, "Invalid token")));

        let error = client(mock_http).fetch_page(&query(0)).await.unwrap_err();

        assert!(error.is_fatal());
        assert_eq!(
            error,
            FetchError::Fatal {
                status: Some(401),
                message: "Invalid token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unsendable_request_is_fatal_without_retry() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("relative URL without a base".into())));

        let error = client(mock_http).fetch_page(&query(0)).await.unwrap_err();

        assert!(matches!(error, FetchError::Fatal { status: None, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "{\"Items\": 3}")));

        let error = client(mock_http).fetch_page(&query(10)).await.unwrap_err();
        assert!(matches!(error, FetchError::Decode { offset: 10, .. }));
    }

    #[tokio::test]
    async fn test_malformed_item_is_rejected_without_failing_page() {
        let body = r#"{
            "Items": [
                { "Id": "m1", "Name": "Heat", "Type": "Movie" },
                { "Id": "m2", "Name": null, "Type": "Movie" },
                { "Name": "Nameless", "Type": 7 },
                { "Id": "m3", "Name": "Ran", "Type": "Movie" }
            ],
            "TotalRecordCount": 40
        }"#;
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(move |_| Ok(HttpResponse::new(200, body)));

        let page = client(mock_http).fetch_page(&query(20)).await.unwrap();

        assert_eq!(page.returned, 4);
        let ids: Vec<&str> = page.items.iter().map(|i| i.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(page.rejected.len(), 2);
        assert_eq!(page.rejected[0].position, 21);
        assert_eq!(page.rejected[0].remote_id.as_deref(), Some("m2"));
        assert_eq!(page.rejected[1].position, 22);
        assert_eq!(page.rejected[1].remote_id, None);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(4).returning(move |_| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(HttpResponse::new(503, ""))
            } else {
                Ok(HttpResponse::new(200, page_body()))
            }
        });

        let client = client(mock_http);
        assert!(client.fetch_page(&query(0)).await.is_err());
        assert!(client.fetch_page(&query(0)).await.is_ok());
    }

    struct SlowHttpClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for SlowHttpClient {
        async fn execute(&self, _request: HttpRequest) -> bridge_traits::error::Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(HttpResponse::new(200, page_body()))
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_network_failure() {
        let http = Arc::new(SlowHttpClient {
            calls: AtomicUsize::new(0),
        });
        let config = CatalogClientConfig {
            request_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let client =
            CatalogClient::with_config(http.clone(), config, Arc::new(ManualClock::default()));

        let error = client.fetch_page(&query(0)).await.unwrap_err();

        assert!(error.is_transient());
        assert_eq!(http.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stream_rejects_invalid_parameters() {
        let client = Arc::new(client(MockHttpClient::new()));

        assert!(matches!(
            client.stream([MediaKind::Movie], 0),
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.stream([MediaKind::Movie], 501),
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.stream(Vec::new(), 10),
            Err(FetchError::InvalidRequest(_))
        ));
        assert!(client.stream([MediaKind::Series], 500).is_ok());
    }

    #[test]
    fn test_kind_filter_is_stable() {
        let query = PageQuery {
            offset: 0,
            limit: 1,
            kinds: [MediaKind::Series, MediaKind::Movie].into_iter().collect(),
        };
        assert_eq!(query.kind_filter(), "Movie,Series");
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..50 {
            assert!(jitter(Duration::from_millis(10)) <= Duration::from_millis(10));
        }
    }
}
