//! # Host Bridge Traits
//!
//! Platform abstractions and shared value types for the catalog sync engine.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and host-specific
//! implementations, along with the provider-neutral catalog types every
//! other crate speaks.
//!
//! ## Contents
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP seam; one attempt per call
//! - [`RetryPolicy`](http::RetryPolicy) - Backoff parameters used by callers
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`CatalogItem`](catalog::CatalogItem) / [`MediaKind`](catalog::MediaKind) - Catalog values
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map transport failures to `Network` or `Timeout` so callers can
//! tell them apart from a bad response.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so they can be shared across tasks.

pub mod catalog;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use catalog::{CatalogItem, MediaKind};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
