//! Catalog store gateway
//!
//! The narrow persistence contract the sync engine depends on: lookup, upsert
//! and delete of catalog records keyed by remote id, plus the session audit
//! log.

use crate::error::{LibraryError, Result};
use crate::models::{SessionAudit, StoredRecord};
use async_trait::async_trait;
use bridge_traits::{CatalogItem, MediaKind};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, instrument};

/// Catalog store interface
///
/// Implementations must make `upsert` atomic per record: a concurrent reader
/// sees either the previous row or the new one, never a mix.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Find a record by its remote identifier
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<StoredRecord>>;

    /// Insert a record, or overwrite the mutable fields of the record with the
    /// same remote id
    ///
    /// An existing record keeps its surrogate key and `created_at` whatever
    /// `record` carries for them.
    ///
    /// # Errors
    /// Returns error if:
    /// - Record validation fails
    /// - Database error occurs
    async fn upsert(&self, record: &StoredRecord) -> Result<()>;

    /// Remote ids of every stored record
    async fn list_all_remote_ids(&self) -> Result<HashSet<String>>;

    /// Remote ids of stored records of the given kinds
    async fn list_remote_ids_by_kind(&self, kinds: &[MediaKind]) -> Result<HashSet<String>>;

    /// Delete a record by remote id
    ///
    /// # Returns
    /// - `Ok(true)` if a record was deleted
    /// - `Ok(false)` if none matched
    async fn delete_by_remote_id(&self, remote_id: &str) -> Result<bool>;

    /// Number of stored records
    async fn count(&self) -> Result<u64>;

    /// Append the summary of a finished session
    ///
    /// # Errors
    /// Returns error if an audit entry with the same session id exists.
    async fn append_session_audit(&self, audit: &SessionAudit) -> Result<()>;

    async fn find_session_audit(&self, session_id: &str) -> Result<Option<SessionAudit>>;

    /// Most recent sessions first
    async fn list_session_history(&self, limit: u32) -> Result<Vec<SessionAudit>>;
}

/// SQLite implementation of [`CatalogStore`]
#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn validate(record: &StoredRecord) -> Result<()> {
        if record.id.trim().is_empty() {
            return Err(invalid("id", "surrogate key cannot be empty"));
        }
        if record.item.remote_id.trim().is_empty() {
            return Err(invalid("remote_id", "remote id cannot be empty"));
        }
        if record.item.title.trim().is_empty() {
            return Err(invalid("title", "title cannot be empty"));
        }
        if record.item.rating.is_some_and(|rating| !rating.is_finite()) {
            return Err(invalid("rating", "rating must be a finite number"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> LibraryError {
    LibraryError::InvalidInput {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Database row representation of a catalog record
#[derive(Debug, FromRow)]
struct CatalogRecordRow {
    id: String,
    remote_id: String,
    kind: String,
    title: String,
    year: Option<i64>,
    genres: String,
    synopsis: Option<String>,
    artwork: String,
    external_ids: String,
    runtime_minutes: Option<i64>,
    rating: Option<f64>,
    file_path: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<CatalogRecordRow> for StoredRecord {
    type Error = LibraryError;

    fn try_from(row: CatalogRecordRow) -> Result<Self> {
        let kind: MediaKind = row
            .kind
            .parse()
            .map_err(|message: String| LibraryError::InvalidInput {
                field: "kind".to_string(),
                message,
            })?;

        let item = CatalogItem {
            remote_id: row.remote_id,
            external_ids: serde_json::from_str(&row.external_ids)?,
            title: row.title,
            year: row.year.and_then(|year| i32::try_from(year).ok()),
            kind,
            genres: serde_json::from_str(&row.genres)?,
            synopsis: row.synopsis,
            artwork: serde_json::from_str(&row.artwork)?,
            runtime_minutes: row.runtime_minutes.and_then(|m| u32::try_from(m).ok()),
            rating: row.rating.map(|rating| rating as f32),
            file_path: row.file_path,
        };

        Ok(StoredRecord {
            id: row.id,
            item,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row representation of a session audit entry
#[derive(Debug, FromRow)]
struct SessionAuditRow {
    session_id: String,
    operation: String,
    status: String,
    items_processed: i64,
    items_added: i64,
    items_updated: i64,
    items_unchanged: i64,
    items_deleted: i64,
    items_failed: i64,
    error_summary: String,
    metadata: String,
    started_at: i64,
    finished_at: Option<i64>,
}

impl TryFrom<SessionAuditRow> for SessionAudit {
    type Error = LibraryError;

    fn try_from(row: SessionAuditRow) -> Result<Self> {
        let metadata: BTreeMap<String, String> = serde_json::from_str(&row.metadata)?;

        Ok(SessionAudit {
            session_id: row.session_id,
            operation: row.operation,
            status: row.status,
            processed: row.items_processed as u64,
            added: row.items_added as u64,
            updated: row.items_updated as u64,
            unchanged: row.items_unchanged as u64,
            deleted: row.items_deleted as u64,
            errors: row.items_failed as u64,
            error_summary: serde_json::from_str(&row.error_summary)?,
            metadata,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

const RECORD_COLUMNS: &str = r#"
    id, remote_id, kind, title, year, genres, synopsis, artwork,
    external_ids, runtime_minutes, rating, file_path, created_at, updated_at
"#;

const SESSION_COLUMNS: &str = r#"
    session_id, operation, status,
    items_processed, items_added, items_updated, items_unchanged,
    items_deleted, items_failed, error_summary, metadata,
    started_at, finished_at
"#;

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<StoredRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM catalog_records WHERE remote_id = ?");
        let row = sqlx::query_as::<_, CatalogRecordRow>(&sql)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(remote_id = %record.item.remote_id))]
    async fn upsert(&self, record: &StoredRecord) -> Result<()> {
        Self::validate(record)?;
        let item = &record.item;

        sqlx::query(
            r#"
            INSERT INTO catalog_records (
                id, remote_id, kind, title, year, genres, synopsis, artwork,
                external_ids, runtime_minutes, rating, file_path, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(remote_id) DO UPDATE SET
                kind = excluded.kind,
                title = excluded.title,
                year = excluded.year,
                genres = excluded.genres,
                synopsis = excluded.synopsis,
                artwork = excluded.artwork,
                external_ids = excluded.external_ids,
                runtime_minutes = excluded.runtime_minutes,
                rating = excluded.rating,
                file_path = excluded.file_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&item.remote_id)
        .bind(item.kind.as_str())
        .bind(&item.title)
        .bind(item.year.map(i64::from))
        .bind(serde_json::to_string(&item.genres)?)
        .bind(&item.synopsis)
        .bind(serde_json::to_string(&item.artwork)?)
        .bind(serde_json::to_string(&item.external_ids)?)
        .bind(item.runtime_minutes.map(i64::from))
        .bind(item.rating.map(f64::from))
        .bind(&item.file_path)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Catalog record upserted");
        Ok(())
    }

    async fn list_all_remote_ids(&self) -> Result<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT remote_id FROM catalog_records")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().collect())
    }

    async fn list_remote_ids_by_kind(&self, kinds: &[MediaKind]) -> Result<HashSet<String>> {
        if kinds.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!("SELECT remote_id FROM catalog_records WHERE kind IN ({placeholders})");

        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for kind in kinds {
            query = query.bind(kind.as_str());
        }

        let ids = query.fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }

    #[instrument(skip(self))]
    async fn delete_by_remote_id(&self, remote_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM catalog_records WHERE remote_id = ?")
            .bind(remote_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM catalog_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    #[instrument(skip(self, audit), fields(session_id = %audit.session_id, status = %audit.status))]
    async fn append_session_audit(&self, audit: &SessionAudit) -> Result<()> {
        if audit.session_id.trim().is_empty() {
            return Err(invalid("session_id", "session id cannot be empty"));
        }

        sqlx::query(
            r#"
            INSERT INTO sync_sessions (
                session_id, operation, status,
                items_processed, items_added, items_updated, items_unchanged,
                items_deleted, items_failed, error_summary, metadata,
                started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.session_id)
        .bind(&audit.operation)
        .bind(&audit.status)
        .bind(audit.processed as i64)
        .bind(audit.added as i64)
        .bind(audit.updated as i64)
        .bind(audit.unchanged as i64)
        .bind(audit.deleted as i64)
        .bind(audit.errors as i64)
        .bind(serde_json::to_string(&audit.error_summary)?)
        .bind(serde_json::to_string(&audit.metadata)?)
        .bind(audit.started_at)
        .bind(audit.finished_at)
        .execute(&self.pool)
        .await?;

        debug!("Session audit appended");
        Ok(())
    }

    async fn find_session_audit(&self, session_id: &str) -> Result<Option<SessionAudit>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sync_sessions WHERE session_id = ?");
        let row = sqlx::query_as::<_, SessionAuditRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SessionAudit::try_from).transpose()
    }

    async fn list_session_history(&self, limit: u32) -> Result<Vec<SessionAudit>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sync_sessions ORDER BY started_at DESC, rowid DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, SessionAuditRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(SessionAudit::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn store() -> SqliteCatalogStore {
        SqliteCatalogStore::new(create_test_pool().await.unwrap())
    }

    fn movie(remote_id: &str, title: &str) -> CatalogItem {
        let mut item = CatalogItem::new(remote_id, title, MediaKind::Movie);
        item.year = Some(1999);
        item.genres = vec!["Sci-Fi".to_string(), "Action".to_string()];
        item.synopsis = Some("A hacker learns the truth.".to_string());
        item.artwork.insert("Primary".to_string(), "abc123".to_string());
        item.external_ids.insert("Imdb".to_string(), "tt0133093".to_string());
        item.runtime_minutes = Some(136);
        item.rating = Some(8.7);
        item.file_path = Some("/media/movies/matrix.mkv".to_string());
        item
    }

    fn audit(session_id: &str, started_at: i64) -> SessionAudit {
        SessionAudit {
            session_id: session_id.to_string(),
            operation: "catalog_sync".to_string(),
            status: "completed".to_string(),
            processed: 10,
            added: 4,
            updated: 3,
            unchanged: 3,
            deleted: 1,
            errors: 0,
            error_summary: vec![],
            metadata: BTreeMap::from([("page_size".to_string(), "100".to_string())]),
            started_at,
            finished_at: Some(started_at + 500),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find_round_trips_fields() {
        let store = store().await;
        let record = StoredRecord::new(movie("m1", "The Matrix"), 1_000);

        store.upsert(&record).await.unwrap();

        let found = store.find_by_remote_id("m1").await.unwrap().unwrap();
        assert_eq!(found, record);
        assert!(store.find_by_remote_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_existing_preserves_key_and_created_at() {
        let store = store().await;
        let original = StoredRecord::new(movie("m1", "The Matrix"), 1_000);
        store.upsert(&original).await.unwrap();

        // A fresh record for the same remote id carries a different key.
        let replacement = StoredRecord::new(movie("m1", "The Matrix Reloaded"), 9_000);
        store.upsert(&replacement).await.unwrap();

        let found = store.find_by_remote_id("m1").await.unwrap().unwrap();
        assert_eq!(found.id, original.id);
        assert_eq!(found.created_at, 1_000);
        assert_eq!(found.updated_at, 9_000);
        assert_eq!(found.item.title, "The Matrix Reloaded");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_record() {
        let store = store().await;
        let record = StoredRecord::new(movie("m1", "   "), 0);

        let result = store.upsert(&record).await;

        assert!(matches!(
            result,
            Err(LibraryError::InvalidInput { ref field, .. }) if field == "title"
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_remote_ids() {
        let store = store().await;
        store.upsert(&StoredRecord::new(movie("m1", "A"), 0)).await.unwrap();
        store.upsert(&StoredRecord::new(movie("m2", "B"), 0)).await.unwrap();
        store
            .upsert(&StoredRecord::new(
                CatalogItem::new("s1", "Show", MediaKind::Series),
                0,
            ))
            .await
            .unwrap();

        let all = store.list_all_remote_ids().await.unwrap();
        assert_eq!(all.len(), 3);

        let movies = store
            .list_remote_ids_by_kind(&[MediaKind::Movie])
            .await
            .unwrap();
        assert_eq!(movies, HashSet::from(["m1".to_string(), "m2".to_string()]));

        assert!(store.list_remote_ids_by_kind(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_remote_id() {
        let store = store().await;
        store.upsert(&StoredRecord::new(movie("m1", "A"), 0)).await.unwrap();

        assert!(store.delete_by_remote_id("m1").await.unwrap());
        assert!(!store.delete_by_remote_id("m1").await.unwrap());
        assert!(store.list_all_remote_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_audit_round_trip() {
        let store = store().await;
        let mut entry = audit("s-1", 1_000);
        entry.status = "completed_with_errors".to_string();
        entry.errors = 1;
        entry.error_summary = vec!["m9: title cannot be empty".to_string()];

        store.append_session_audit(&entry).await.unwrap();

        let found = store.find_session_audit("s-1").await.unwrap().unwrap();
        assert_eq!(found, entry);
        assert_eq!(found.duration_ms(), Some(500));
        assert!(store.find_session_audit("s-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_audit_written_once() {
        let store = store().await;
        store.append_session_audit(&audit("s-1", 1_000)).await.unwrap();

        let duplicate = store.append_session_audit(&audit("s-1", 2_000)).await;
        assert!(matches!(duplicate, Err(LibraryError::Database(_))));
    }

    #[tokio::test]
    async fn test_session_history_most_recent_first() {
        let store = store().await;
        for (id, started_at) in [("old", 1_000), ("newest", 3_000), ("middle", 2_000)] {
            store.append_session_audit(&audit(id, started_at)).await.unwrap();
        }

        let history = store.list_session_history(2).await.unwrap();
        let ids: Vec<_> = history.iter().map(|a| a.session_id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "middle"]);
    }
}
