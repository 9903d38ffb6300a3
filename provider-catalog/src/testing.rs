//! Scripted in-process catalog server for tests
//!
//! [`FakeCatalogServer`] implements [`HttpClient`] and answers `/Items`
//! requests from an in-memory item list, with per-offset failure injection.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::{CatalogItem, MediaKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::types::{BaseItemDto, ItemsResponse};

/// Hook invoked with the requested offset before each response
pub type RequestHook = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone)]
enum Failure {
    Status(u16),
    Network,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    failure: Failure,
    /// `None` fails forever
    remaining: Option<u32>,
}

#[derive(Default)]
struct ServerState {
    items: Vec<CatalogItem>,
    reported_total: Option<u64>,
    failures: HashMap<u64, ScriptedFailure>,
    requests: Vec<u64>,
    latency: Option<Duration>,
    hook: Option<RequestHook>,
    /// Raw JSON served in place of an item, keyed by remote id
    wire_overrides: HashMap<String, serde_json::Value>,
}

/// In-memory `/Items` endpoint
#[derive(Default)]
pub struct FakeCatalogServer {
    state: Mutex<ServerState>,
}

impl FakeCatalogServer {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self {
            state: Mutex::new(ServerState {
                items,
                ..ServerState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the catalog contents.
    pub fn set_items(&self, items: Vec<CatalogItem>) {
        self.state().items = items;
    }

    /// Report this total instead of the real one.
    pub fn set_reported_total(&self, total: Option<u64>) {
        self.state().reported_total = total;
    }

    /// Answer every request at `offset` with `status`.
    pub fn fail_offset(&self, offset: u64, status: u16) {
        self.script(offset, Failure::Status(status), None);
    }

    /// Answer the next `times` requests at `offset` with `status`.
    pub fn fail_offset_times(&self, offset: u64, status: u16, times: u32) {
        self.script(offset, Failure::Status(status), Some(times));
    }

    /// Fail every request at `offset` at the transport layer.
    pub fn drop_connection_at(&self, offset: u64) {
        self.script(offset, Failure::Network, None);
    }

    /// Serve `raw` verbatim in place of the item with `remote_id`.
    pub fn replace_wire_item(&self, remote_id: impl Into<String>, raw: serde_json::Value) {
        self.state().wire_overrides.insert(remote_id.into(), raw);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Delay every response.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    pub fn on_request(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        self.state().hook = Some(Arc::new(hook));
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn requests_at_offset(&self, offset: u64) -> usize {
        self.state().requests.iter().filter(|o| **o == offset).count()
    }

    /// Offsets in request order
    pub fn requested_offsets(&self) -> Vec<u64> {
        self.state().requests.clone()
    }

    fn script(&self, offset: u64, failure: Failure, remaining: Option<u32>) {
        self.state()
            .failures
            .insert(offset, ScriptedFailure { failure, remaining });
    }

    fn take_failure(state: &mut ServerState, offset: u64) -> Option<Failure> {
        let scripted = state.failures.get_mut(&offset)?;
        match scripted.remaining {
            None => Some(scripted.failure.clone()),
            Some(0) => None,
            Some(ref mut remaining) => {
                *remaining -= 1;
                Some(scripted.failure.clone())
            }
        }
    }
}

#[async_trait]
impl HttpClient for FakeCatalogServer {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let offset = request
            .query_param("StartIndex")
            .and_then(|v| v.parse::<u64>().ok());
        let limit = request
            .query_param("Limit")
            .and_then(|v| v.parse::<usize>().ok());

        let (Some(offset), Some(limit)) = (offset, limit) else {
            return Ok(HttpResponse::new(400, "StartIndex and Limit are required"));
        };

        let kinds: Vec<MediaKind> = request
            .query_param("IncludeItemTypes")
            .map(|filter| filter.split(',').filter_map(MediaKind::from_api_name).collect())
            .unwrap_or_else(|| MediaKind::ALL.to_vec());

        let (hook, latency, failure, body) = {
            let mut state = self.state();
            state.requests.push(offset);
            let failure = Self::take_failure(&mut state, offset);

            let matching: Vec<&CatalogItem> = state
                .items
                .iter()
                .filter(|item| kinds.contains(&item.kind))
                .collect();
            let total = state.reported_total.unwrap_or(matching.len() as u64);
            let mut items = Vec::new();
            for item in matching.into_iter().skip(offset as usize).take(limit) {
                let raw = match state.wire_overrides.get(&item.remote_id) {
                    Some(raw) => raw.clone(),
                    None => serde_json::to_value(BaseItemDto::from(item))
                        .map_err(|e| BridgeError::OperationFailed(e.to_string()))?,
                };
                items.push(raw);
            }

            let body: ItemsResponse = ItemsResponse {
                items,
                total_record_count: total,
                start_index: offset,
            };
            (state.hook.clone(), state.latency, failure, body)
        };

        if let Some(hook) = hook {
            hook(offset);
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(Failure::Status(status)) => Ok(HttpResponse::new(status, "scripted failure")),
            Some(Failure::Network) => Err(BridgeError::Network("connection reset".to_string())),
            None => {
                let json = serde_json::to_vec(&body)
                    .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
                Ok(HttpResponse::new(200, json))
            }
        }
    }
}

/// Catalog item with deterministic fields. Even indices are movies.
pub fn sample_item(index: usize) -> CatalogItem {
    let kind = if index % 2 == 0 {
        MediaKind::Movie
    } else {
        MediaKind::Series
    };
    let mut item = CatalogItem::new(format!("item-{index:04}"), format!("Title {index}"), kind);
    item.year = Some(1980 + (index % 40) as i32);
    item.genres = vec!["Drama".to_string()];
    item.synopsis = Some(format!("Synopsis for item {index}"));
    item.runtime_minutes = Some(90 + (index % 60) as u32);
    item.rating = Some(7.5);
    item.external_ids
        .insert("Tmdb".to_string(), (1000 + index).to_string());
    item
}

pub fn sample_items(count: usize) -> Vec<CatalogItem> {
    (0..count).map(sample_item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_request(offset: u64, limit: u32) -> HttpRequest {
        HttpRequest::get("http://catalog.test/Items")
            .query("StartIndex", offset)
            .query("Limit", limit)
    }

    #[tokio::test]
    async fn test_serves_requested_window() {
        let server = FakeCatalogServer::new(sample_items(5));
        let response = server.execute(page_request(2, 2)).await.unwrap();
        let body: ItemsResponse<BaseItemDto> = response.json().unwrap();

        assert_eq!(body.total_record_count, 5);
        assert_eq!(body.items.len(), 2);
        assert_eq!(body.items[0].id, "item-0002");
    }

    #[tokio::test]
    async fn test_wire_override_is_served_verbatim() {
        let server = FakeCatalogServer::new(sample_items(3));
        server.replace_wire_item("item-0001", serde_json::json!({ "Id": "item-0001", "Name": 5 }));

        let response = server.execute(page_request(0, 3)).await.unwrap();
        let body: ItemsResponse = response.json().unwrap();

        assert_eq!(body.items[1], serde_json::json!({ "Id": "item-0001", "Name": 5 }));
        assert_eq!(body.items[2]["Name"], "Title 2");
    }

    #[tokio::test]
    async fn test_limited_failures_recover() {
        let server = FakeCatalogServer::new(sample_items(5));
        server.fail_offset_times(0, 502, 1);

        assert_eq!(server.execute(page_request(0, 5)).await.unwrap().status, 502);
        assert_eq!(server.execute(page_request(0, 5)).await.unwrap().status, 200);
        assert_eq!(server.requests_at_offset(0), 2);
    }

    #[tokio::test]
    async fn test_missing_paging_params_is_bad_request() {
        let server = FakeCatalogServer::default();
        let response = server
            .execute(HttpRequest::get("http://catalog.test/Items"))
            .await
            .unwrap();
        assert_eq!(response.status, 400);
    }
}
