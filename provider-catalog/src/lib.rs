//! # Remote Catalog Provider
//!
//! Paginated, cached and retrying client for a media-server library API.
//!
//! ## Overview
//!
//! - [`CatalogClient`] issues page requests through the host
//!   [`HttpClient`](bridge_traits::HttpClient), caching responses in a
//!   TTL-bounded [`ResponseCache`] and retrying transient failures with
//!   exponential backoff.
//! - [`CatalogStream`] turns the paged endpoint into a finite,
//!   non-restartable sequence of items.
//! - [`FetchError`] separates failures that end a scan from failures that
//!   only cost one page.
//!
//! The client has no knowledge of local storage.

pub mod cache;
pub mod connector;
pub mod error;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use cache::{CacheKey, ResponseCache};
pub use connector::{CatalogClient, CatalogClientConfig, CatalogPage, PageQuery, RejectedItem};
pub use error::{FetchError, Result};
pub use stream::{CatalogStream, StreamItem, StreamPage, DEFAULT_MAX_BLIND_SKIPS};
pub use types::{decode_item, BaseItemDto, DecodedItem, ItemsResponse};
