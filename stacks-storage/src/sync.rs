//! Sync reads: what changed in a set of libraries since a version.

use std::collections::BTreeMap;
use std::sync::Arc;

use stacks_core::{
    DeletedSince, LibraryId, PrimaryDataRow, RecordKey, RecordType, ShardId, StacksResult,
    UserId, Version,
};
use tracing::debug;

use crate::store::ObjectStore;

/// Changes to one library since a version.
#[derive(Debug, Clone)]
pub struct LibraryUpdates {
    pub library_id: LibraryId,
    /// Library version at read time.
    pub version: Version,
    pub rows: Vec<Arc<PrimaryDataRow>>,
    pub deleted: Vec<RecordKey>,
}

impl LibraryUpdates {
    pub fn len(&self) -> usize {
        self.rows.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.deleted.is_empty()
    }
}

impl ObjectStore {
    /// The user's own library followed by the groups they belong to.
    pub async fn user_libraries(&self, user_id: UserId) -> StacksResult<Vec<LibraryId>> {
        let mut libraries = Vec::new();
        if let Some(own) = self.storage().user_library(user_id).await? {
            libraries.push(own);
        }
        for group in self.storage().user_groups(user_id).await? {
            if !libraries.contains(&group) {
                libraries.push(group);
            }
        }
        Ok(libraries)
    }

    /// Rows with `version > since` and keys deleted after `since`, per
    /// library. Libraries not written since `since` are left out.
    pub async fn updated_since(
        &self,
        libraries: &[LibraryId],
        record_type: RecordType,
        since: Version,
    ) -> StacksResult<Vec<LibraryUpdates>> {
        let candidates = self.versions().updated_since(libraries, since).await?;

        let mut by_shard: BTreeMap<ShardId, Vec<LibraryId>> = BTreeMap::new();
        for library_id in candidates {
            let shard_id = self.shards().shard_for(library_id).await?;
            by_shard.entry(shard_id).or_default().push(library_id);
        }

        let mut updates = Vec::new();
        for (shard_id, libraries) in by_shard {
            debug!(shard_id = %shard_id, libraries = libraries.len(), "reading updates");
            for library_id in libraries {
                let version = self.versions().current(library_id).await?;
                let mut rows: Vec<Arc<PrimaryDataRow>> = self
                    .rows()
                    .rows(library_id, record_type)
                    .await?
                    .into_iter()
                    .filter(|row| row.version() > since)
                    .collect();
                rows.sort_by_key(|row| (row.version(), row.id()));
                let deleted = self
                    .delete_log()
                    .keys_deleted_since(library_id, record_type, DeletedSince::Version(since))
                    .await?;
                updates.push(LibraryUpdates {
                    library_id,
                    version,
                    rows,
                    deleted,
                });
            }
        }
        Ok(updates)
    }

    /// Number of updated rows plus tombstones across `libraries`.
    pub async fn count_updated(
        &self,
        libraries: &[LibraryId],
        record_type: RecordType,
        since: Version,
    ) -> StacksResult<usize> {
        Ok(self
            .updated_since(libraries, record_type, since)
            .await?
            .iter()
            .map(LibraryUpdates::len)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use chrono::Utc;
    use stacks_core::{LibraryRecord, LibraryType, RecordId};

    fn lib(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    fn search(id: u64, key: &str, version: u64) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Search,
            lib(1),
            RecordId::new(id).expect("id"),
            RecordKey::parse(RecordType::Search, key).expect("key"),
            Version(version),
        );
        row.set("name", key).expect("set");
        row
    }

    #[tokio::test]
    async fn test_updated_since_filters_rows_and_libraries() {
        let storage = InMemoryStorage::new();
        let mut one = LibraryRecord::new(lib(1), LibraryType::User, ShardId(1), Utc::now());
        one.version = Version(5);
        storage.add_library(one).expect("add library");
        storage
            .add_library(LibraryRecord::new(lib(2), LibraryType::Group, ShardId(2), Utc::now()))
            .expect("add library");
        storage.insert_row(search(1, "PAST2345", 2)).expect("seed");
        storage.insert_row(search(2, "NEWS2345", 5)).expect("seed");
        let store = ObjectStore::builder(Arc::new(storage))
            .build()
            .expect("build should succeed");

        let updates = store
            .updated_since(&[lib(1), lib(2)], RecordType::Search, Version(3))
            .await
            .expect("updated_since");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].library_id, lib(1));
        assert_eq!(updates[0].version, Version(5));
        assert_eq!(updates[0].rows.len(), 1);
        assert_eq!(updates[0].rows[0].key().as_str(), "NEWS2345");
        assert_eq!(
            store
                .count_updated(&[lib(1), lib(2)], RecordType::Search, Version(0))
                .await
                .expect("count"),
            2
        );
    }

    #[tokio::test]
    async fn test_user_libraries() {
        let storage = InMemoryStorage::new();
        let user = UserId::new(3).expect("id");
        storage.add_user(user, lib(1)).expect("add user");
        storage
            .add_membership(lib(9), user, stacks_core::Membership::reader())
            .expect("add membership");
        let store = ObjectStore::builder(Arc::new(storage))
            .build()
            .expect("build should succeed");
        assert_eq!(
            store.user_libraries(user).await.expect("libraries"),
            vec![lib(1), lib(9)]
        );
    }
}
