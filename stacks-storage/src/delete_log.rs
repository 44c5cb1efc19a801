//! Delete log: per-library, per-type tombstones.
//!
//! Tombstones are upserted by (library, log type, key) and only ever move
//! forward. Tags are logged twice: once by key under `tag` and once by name
//! under the legacy `tagName` type, in the same transaction.

use std::sync::Arc;

use stacks_core::{
    DeleteLogType, DeletedSince, LibraryId, PrimaryDataRow, RecordKey, RecordType, StacksError,
    StacksResult, Timestamp, Tombstone, Version,
};
use tracing::debug;

use crate::backend::{StorageBackend, StorageTransaction};
use crate::shard::ShardLocator;

pub struct DeleteLog {
    storage: Arc<dyn StorageBackend>,
    shards: Arc<dyn ShardLocator>,
}

impl DeleteLog {
    pub fn new(storage: Arc<dyn StorageBackend>, shards: Arc<dyn ShardLocator>) -> Self {
        Self { storage, shards }
    }

    /// Upsert a tombstone in its own transaction.
    pub async fn append(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
        version: Version,
        timestamp: Timestamp,
    ) -> StacksResult<()> {
        record_type.validate_key(key.as_str())?;
        let shard_id = self.shards.shard_for(library_id).await?;
        let mut tx = self.storage.begin(shard_id).await?;
        let appended = Self::append_in(
            tx.as_mut(),
            library_id,
            DeleteLogType::Record(record_type),
            key.as_str(),
            version,
            timestamp,
        )
        .await;
        match appended {
            Ok(()) => tx.commit().await,
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Upsert a tombstone inside an open transaction.
    pub async fn append_in(
        tx: &mut dyn StorageTransaction,
        library_id: LibraryId,
        log_type: DeleteLogType,
        key: &str,
        version: Version,
        timestamp: Timestamp,
    ) -> StacksResult<()> {
        let tombstone = match tx.tombstone(library_id, log_type, key).await? {
            Some(mut existing) => {
                if !existing.refresh(version, timestamp) {
                    return Ok(());
                }
                existing
            }
            None => Tombstone {
                library_id,
                log_type,
                key: key.to_string(),
                version,
                timestamp,
            },
        };
        debug!(
            library_id = %library_id,
            log_type = log_type.as_db_str(),
            key = %key,
            version = %version,
            "appending tombstone"
        );
        tx.put_tombstone(&tombstone).await
    }

    /// Log the deletion of `row`, including any legacy duplicate entry.
    pub async fn record_deletion(
        tx: &mut dyn StorageTransaction,
        row: &PrimaryDataRow,
        version: Version,
        timestamp: Timestamp,
    ) -> StacksResult<()> {
        for log_type in DeleteLogType::for_record(row.record_type()) {
            let key = match log_type {
                DeleteLogType::Record(_) => row.key().as_str(),
                DeleteLogType::TagName => match row.get_str("name") {
                    Some(name) => name,
                    None => continue,
                },
            };
            Self::append_in(tx, row.library_id(), log_type, key, version, timestamp).await?;
        }
        Ok(())
    }

    /// Tombstones of a log type newer than `since`.
    pub async fn entries_since(
        &self,
        library_id: LibraryId,
        log_type: DeleteLogType,
        since: DeletedSince,
    ) -> StacksResult<Vec<Tombstone>> {
        let shard_id = self.shards.shard_for(library_id).await?;
        self.storage
            .tombstones(shard_id, library_id, log_type, since)
            .await
    }

    /// Keys of a record type deleted since `since`.
    pub async fn keys_deleted_since(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        since: DeletedSince,
    ) -> StacksResult<Vec<RecordKey>> {
        self.entries_since(library_id, DeleteLogType::Record(record_type), since)
            .await?
            .into_iter()
            .map(|t| RecordKey::parse(record_type, &t.key).map_err(StacksError::from))
            .collect()
    }

    /// Tag names deleted since `since`, from the legacy `tagName` log.
    pub async fn tag_names_deleted_since(
        &self,
        library_id: LibraryId,
        since: DeletedSince,
    ) -> StacksResult<Vec<String>> {
        Ok(self
            .entries_since(library_id, DeleteLogType::TagName, since)
            .await?
            .into_iter()
            .map(|t| t.key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use crate::shard::DirectoryShardLocator;
    use chrono::{Duration, Utc};
    use stacks_core::{LibraryRecord, LibraryType, RecordId, ShardId};

    fn lib() -> LibraryId {
        LibraryId::new(1).expect("positive id")
    }

    fn setup() -> (InMemoryStorage, DeleteLog) {
        let storage = InMemoryStorage::new();
        storage
            .add_library(LibraryRecord::new(lib(), LibraryType::Group, ShardId(2), Utc::now()))
            .expect("add library should succeed");
        let backend: Arc<dyn StorageBackend> = Arc::new(storage.clone());
        let log = DeleteLog::new(backend.clone(), Arc::new(DirectoryShardLocator::new(backend)));
        (storage, log)
    }

    fn key(raw: &str) -> RecordKey {
        RecordKey::parse(RecordType::Item, raw).expect("valid key")
    }

    #[tokio::test]
    async fn test_append_is_idempotent_and_keeps_max_version() {
        let (storage, log) = setup();
        let now = Utc::now();
        for version in [5, 3, 5, 4] {
            log.append(lib(), RecordType::Item, &key("ITEM2345"), Version(version), now)
                .await
                .expect("append should succeed");
        }
        let tombstones = storage.committed_tombstones(lib()).expect("read");
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].version, Version(5));
    }

    #[tokio::test]
    async fn test_keys_deleted_since_version_is_exclusive() {
        let (_, log) = setup();
        let now = Utc::now();
        log.append(lib(), RecordType::Item, &key("ITEM2345"), Version(3), now)
            .await
            .expect("append");
        log.append(lib(), RecordType::Item, &key("ITEM6789"), Version(4), now)
            .await
            .expect("append");

        let keys = log
            .keys_deleted_since(lib(), RecordType::Item, DeletedSince::Version(Version(3)))
            .await
            .expect("query should succeed");
        assert_eq!(keys, vec![key("ITEM6789")]);
    }

    #[tokio::test]
    async fn test_legacy_timestamp_mode_is_inclusive() {
        let (_, log) = setup();
        let then = Utc::now() - Duration::hours(1);
        log.append(lib(), RecordType::Item, &key("ITEM2345"), Version(1), then)
            .await
            .expect("append");
        let keys = log
            .keys_deleted_since(lib(), RecordType::Item, DeletedSince::Timestamp(then))
            .await
            .expect("query should succeed");
        assert_eq!(keys.len(), 1);
        let later = log
            .keys_deleted_since(
                lib(),
                RecordType::Item,
                DeletedSince::Timestamp(then + Duration::seconds(1)),
            )
            .await
            .expect("query should succeed");
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_tag_deletion_writes_tag_name_duplicate() {
        let (storage, log) = setup();
        let mut tag = PrimaryDataRow::new(
            RecordType::Tag,
            lib(),
            RecordId::new(8).expect("positive id"),
            RecordKey::parse(RecordType::Tag, "TAGS2345").expect("valid key"),
            Version(1),
        );
        tag.set("name", "to-read").expect("set name");

        let mut tx = storage.begin(ShardId(2)).await.expect("begin should succeed");
        let now = Utc::now();
        DeleteLog::record_deletion(tx.as_mut(), &tag, Version(7), now)
            .await
            .expect("record_deletion should succeed");
        tx.commit().await.expect("commit should succeed");

        let names = log
            .tag_names_deleted_since(lib(), DeletedSince::Version(Version(6)))
            .await
            .expect("query should succeed");
        assert_eq!(names, vec!["to-read".to_string()]);
        let tombstones = storage.committed_tombstones(lib()).expect("read");
        assert_eq!(tombstones.len(), 2);
        assert!(tombstones
            .iter()
            .all(|t| t.version == Version(7) && t.timestamp == now));
    }
}
