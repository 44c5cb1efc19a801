//! Key-identity cache: bidirectional key/id maps per library and record type.

use std::collections::HashMap;
use std::sync::Arc;

use stacks_core::{LibraryId, RecordId, RecordKey, RecordType, StacksError, StacksResult};
use tracing::{debug, warn};

use super::loader::CacheLoader;
use super::partition::Partitions;

#[derive(Debug, Default)]
struct IdentityMap {
    by_key: HashMap<RecordKey, RecordId>,
    by_id: HashMap<RecordId, RecordKey>,
}

impl IdentityMap {
    fn from_pairs(pairs: Vec<(RecordId, RecordKey)>) -> Self {
        let mut map = Self::default();
        for (id, key) in pairs {
            map.insert(key, id);
        }
        map
    }

    fn insert(&mut self, key: RecordKey, id: RecordId) {
        if let Some(old_key) = self.by_id.insert(id, key.clone()) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }
        if let Some(old_id) = self.by_key.insert(key, id) {
            if old_id != id {
                self.by_id.remove(&old_id);
            }
        }
    }

    fn remove(&mut self, key: &RecordKey) {
        if let Some(id) = self.by_key.remove(key) {
            self.by_id.remove(&id);
        }
    }
}

/// Per library and record type map between record keys and record ids.
///
/// The first lookup for a library and type loads every pair in one bulk read;
/// later lookups are answered from memory until the partition is invalidated.
pub struct KeyIdentityCache {
    loader: Arc<CacheLoader>,
    partitions: Partitions<IdentityMap>,
}

impl KeyIdentityCache {
    pub fn new(loader: Arc<CacheLoader>) -> Self {
        Self {
            loader,
            partitions: Partitions::default(),
        }
    }

    /// The id currently bound to `key`, if any.
    pub async fn resolve(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<RecordId>> {
        record_type.validate_key(key.as_str())?;
        self.partitions
            .read_through(
                (library_id, record_type),
                || async {
                    self.loader
                        .load_ids(library_id, record_type)
                        .await
                        .map(IdentityMap::from_pairs)
                },
                |map| map.by_key.get(key).copied(),
            )
            .await
    }

    /// Parse and resolve a raw key.
    pub async fn resolve_str(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        raw: &str,
    ) -> StacksResult<Option<RecordId>> {
        let key = RecordKey::parse(record_type, raw)?;
        self.resolve(library_id, record_type, &key).await
    }

    /// The key bound to `id`, if any.
    pub async fn key_for_id(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        id: RecordId,
    ) -> StacksResult<Option<RecordKey>> {
        self.partitions
            .read_through(
                (library_id, record_type),
                || async {
                    self.loader
                        .load_ids(library_id, record_type)
                        .await
                        .map(IdentityMap::from_pairs)
                },
                |map| map.by_id.get(&id).cloned(),
            )
            .await
    }

    /// Bind `key` to `id` once the identity is durable.
    ///
    /// Registering the pair that is already cached is a no-op. A different id
    /// already bound to the key is a `Conflict`.
    pub async fn register(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
        id: RecordId,
    ) -> StacksResult<()> {
        if let Some(existing) = self.resolve(library_id, record_type, key).await? {
            if existing != id {
                return Err(conflict(library_id, record_type, key, existing, id));
            }
            return Ok(());
        }
        let outcome = self.partitions.update((library_id, record_type), |map| {
            match map.by_key.get(key).copied() {
                Some(existing) if existing != id => Err(existing),
                _ => {
                    map.insert(key.clone(), id);
                    Ok(())
                }
            }
        })?;
        match outcome {
            Some(Err(existing)) => Err(conflict(library_id, record_type, key, existing, id)),
            _ => {
                debug!(library_id = %library_id, record_type = %record_type, key = %key, id = %id, "registered key");
                Ok(())
            }
        }
    }

    /// Whether the pairs for a library and type are in memory.
    pub(crate) fn is_loaded(&self, library_id: LibraryId, record_type: RecordType) -> StacksResult<bool> {
        self.partitions.is_loaded(&(library_id, record_type))
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        self.partitions.poison();
    }

    /// Drop the partition; the next lookup reloads it.
    pub fn invalidate(&self, library_id: LibraryId, record_type: RecordType) -> StacksResult<()> {
        self.partitions.remove((library_id, record_type))
    }

    pub fn clear_all(&self) -> StacksResult<()> {
        self.partitions.clear()
    }

    /// Apply a committed registration. Storage is authoritative here, so a
    /// stale binding is replaced rather than rejected.
    pub(crate) fn apply_registered(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
        id: RecordId,
    ) -> StacksResult<()> {
        self.partitions.update((library_id, record_type), |map| {
            if let Some(existing) = map.by_key.get(key).copied().filter(|e| *e != id) {
                warn!(
                    library_id = %library_id,
                    record_type = %record_type,
                    key = %key,
                    existing = %existing,
                    id = %id,
                    "replacing stale key binding"
                );
            }
            map.insert(key.clone(), id);
        })?;
        Ok(())
    }

    /// Apply a committed deletion.
    pub(crate) fn apply_removed(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<()> {
        self.partitions
            .update((library_id, record_type), |map| map.remove(key))?;
        Ok(())
    }
}

fn conflict(
    library_id: LibraryId,
    record_type: RecordType,
    key: &RecordKey,
    existing: RecordId,
    attempted: RecordId,
) -> StacksError {
    warn!(
        library_id = %library_id,
        record_type = %record_type,
        key = %key,
        existing = %existing,
        attempted = %attempted,
        "key already bound to a different id"
    );
    StacksError::Conflict {
        record_type,
        library_id,
        key: key.to_string(),
        existing,
        attempted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StorageBackend;
    use crate::memory::InMemoryStorage;
    use crate::shard::DirectoryShardLocator;
    use chrono::Utc;
    use stacks_core::{LibraryRecord, LibraryType, PrimaryDataRow, ShardId, ValidationError, Version};

    fn lib(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    fn id(raw: u64) -> RecordId {
        RecordId::new(raw).expect("positive id")
    }

    fn key(raw: &str) -> RecordKey {
        RecordKey::parse(RecordType::Item, raw).expect("valid key")
    }

    fn setup() -> (InMemoryStorage, KeyIdentityCache) {
        let storage = InMemoryStorage::new();
        storage
            .add_library(LibraryRecord::new(lib(1), LibraryType::User, ShardId(1), Utc::now()))
            .expect("add library should succeed");
        for (raw_id, raw_key) in [(10, "ABCD2345"), (11, "EFGH6789")] {
            storage
                .insert_row(PrimaryDataRow::new(
                    RecordType::Item,
                    lib(1),
                    id(raw_id),
                    key(raw_key),
                    Version(1),
                ))
                .expect("insert should succeed");
        }
        let backend: Arc<dyn StorageBackend> = Arc::new(storage.clone());
        let loader = CacheLoader::new(
            backend.clone(),
            None,
            Arc::new(DirectoryShardLocator::new(backend)),
            3,
        );
        (storage, KeyIdentityCache::new(Arc::new(loader)))
    }

    #[tokio::test]
    async fn test_resolve_loads_partition_once() {
        let (storage, cache) = setup();
        assert_eq!(
            cache
                .resolve(lib(1), RecordType::Item, &key("ABCD2345"))
                .await
                .expect("resolve should succeed"),
            Some(id(10))
        );
        assert_eq!(
            cache
                .resolve(lib(1), RecordType::Item, &key("ZZZZ2222"))
                .await
                .expect("resolve should succeed"),
            None
        );
        assert_eq!(storage.bulk_load_count(lib(1), RecordType::Item), 1);
    }

    #[tokio::test]
    async fn test_malformed_key_never_reaches_storage() {
        let (storage, cache) = setup();
        let result = cache.resolve_str(lib(1), RecordType::Item, "abc").await;
        assert!(matches!(
            result,
            Err(StacksError::InvalidInput(ValidationError::InvalidKey { .. }))
        ));
        assert_eq!(storage.bulk_load_count(lib(1), RecordType::Item), 0);
    }

    #[tokio::test]
    async fn test_register_same_id_is_noop_and_conflict_detected() {
        let (_, cache) = setup();
        cache
            .register(lib(1), RecordType::Item, &key("ABCD2345"), id(10))
            .await
            .expect("same id should be accepted");

        let result = cache
            .register(lib(1), RecordType::Item, &key("ABCD2345"), id(99))
            .await;
        assert!(matches!(
            result,
            Err(StacksError::Conflict { existing, attempted, .. })
                if existing == id(10) && attempted == id(99)
        ));
    }

    #[tokio::test]
    async fn test_register_new_key_visible_both_ways() {
        let (_, cache) = setup();
        cache
            .register(lib(1), RecordType::Item, &key("NEWK2345"), id(12))
            .await
            .expect("register should succeed");
        assert_eq!(
            cache
                .resolve(lib(1), RecordType::Item, &key("NEWK2345"))
                .await
                .expect("resolve"),
            Some(id(12))
        );
        assert_eq!(
            cache
                .key_for_id(lib(1), RecordType::Item, id(12))
                .await
                .expect("key_for_id"),
            Some(key("NEWK2345"))
        );
    }

    #[tokio::test]
    async fn test_invalidate_reloads() {
        let (storage, cache) = setup();
        cache
            .resolve(lib(1), RecordType::Item, &key("ABCD2345"))
            .await
            .expect("resolve");
        cache
            .invalidate(lib(1), RecordType::Item)
            .expect("invalidate should succeed");
        cache
            .resolve(lib(1), RecordType::Item, &key("ABCD2345"))
            .await
            .expect("resolve");
        assert_eq!(storage.bulk_load_count(lib(1), RecordType::Item), 2);
    }

    #[tokio::test]
    async fn test_apply_removed_unbinds_key() {
        let (_, cache) = setup();
        cache
            .resolve(lib(1), RecordType::Item, &key("ABCD2345"))
            .await
            .expect("resolve");
        cache
            .apply_removed(lib(1), RecordType::Item, &key("ABCD2345"))
            .expect("apply_removed");
        assert_eq!(
            cache
                .resolve(lib(1), RecordType::Item, &key("ABCD2345"))
                .await
                .expect("resolve"),
            None
        );
        assert_eq!(
            cache
                .key_for_id(lib(1), RecordType::Item, id(10))
                .await
                .expect("key_for_id"),
            None
        );
    }
}
