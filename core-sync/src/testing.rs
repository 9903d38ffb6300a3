//! Test doubles shared by the unit tests

use bridge_traits::MediaKind;
use core_library::{CatalogStore, SessionAudit, StoredRecord};
use mockall::mock;
use std::collections::HashSet;

mock! {
    pub Store {}

    #[async_trait::async_trait]
    impl CatalogStore for Store {
        async fn find_by_remote_id(&self, remote_id: &str) -> core_library::Result<Option<StoredRecord>>;
        async fn upsert(&self, record: &StoredRecord) -> core_library::Result<()>;
        async fn list_all_remote_ids(&self) -> core_library::Result<HashSet<String>>;
        async fn list_remote_ids_by_kind(&self, kinds: &[MediaKind]) -> core_library::Result<HashSet<String>>;
        async fn delete_by_remote_id(&self, remote_id: &str) -> core_library::Result<bool>;
        async fn count(&self) -> core_library::Result<u64>;
        async fn append_session_audit(&self, audit: &SessionAudit) -> core_library::Result<()>;
        async fn find_session_audit(&self, session_id: &str) -> core_library::Result<Option<SessionAudit>>;
        async fn list_session_history(&self, limit: u32) -> core_library::Result<Vec<SessionAudit>>;
    }
}
