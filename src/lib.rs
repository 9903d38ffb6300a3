//! Workspace facade crate.
//!
//! Re-exports the catalog synchronization crates so host applications can
//! depend on `catalog-sync` alone. The `desktop` feature (on by default)
//! pulls in the reqwest-backed HTTP client from `bridge-desktop`.

pub use bridge_traits;
pub use core_library;
pub use core_runtime;
pub use core_sync;
pub use provider_catalog;

#[cfg(feature = "desktop")]
pub use bridge_desktop;
