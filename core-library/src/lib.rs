//! # Core Library
//!
//! Local catalog store for the sync engine.
//!
//! ## Overview
//!
//! - [`CatalogStore`] is the gateway the sync engine writes through: lookup,
//!   upsert and delete by remote id, plus the session audit log.
//! - [`SqliteCatalogStore`] implements it over an sqlx SQLite pool created by
//!   [`db::create_pool`], which applies the embedded migrations.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{SessionAudit, StoredRecord};
pub use repositories::{CatalogStore, SqliteCatalogStore};
