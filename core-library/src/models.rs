//! Stored entities of the local catalog

use bridge_traits::CatalogItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A catalog item as persisted locally
///
/// `id` is the local surrogate key. It is assigned once when the remote id is
/// first stored and never regenerated; the same holds for `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub item: CatalogItem,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    /// Unix timestamp in milliseconds
    pub updated_at: i64,
}

impl StoredRecord {
    /// New record with a fresh surrogate key
    pub fn new(item: CatalogItem, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Replace the mutable fields, keeping the key and creation time.
    pub fn with_item(self, item: CatalogItem, now_ms: i64) -> Self {
        Self {
            item,
            updated_at: now_ms,
            ..self
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.item.remote_id
    }
}

/// Summary of one finished sync session
///
/// Status and operation are stored as their string forms so the gateway stays
/// independent of the sync engine's types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAudit {
    pub session_id: String,
    pub operation: String,
    pub status: String,
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub errors: u64,
    pub error_summary: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    /// Unix timestamp in milliseconds
    pub started_at: i64,
    /// Unix timestamp in milliseconds
    pub finished_at: Option<i64>,
}

impl SessionAudit {
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at.map(|end| end - self.started_at)
    }
}
