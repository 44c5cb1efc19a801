//! Primary-data cache: rows by key and by id over one shared row store.

use std::collections::HashMap;
use std::sync::Arc;

use stacks_core::{LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksResult};
use tracing::debug;

use super::identity::KeyIdentityCache;
use super::loader::CacheLoader;
use super::partition::Partitions;

/// Rows of one type in one library. `by_id` points into `by_key`, so a row
/// is reachable through both indices or neither.
#[derive(Debug, Default)]
struct LibraryRows {
    by_key: HashMap<RecordKey, Arc<PrimaryDataRow>>,
    by_id: HashMap<RecordId, RecordKey>,
}

impl LibraryRows {
    fn from_rows(rows: Vec<PrimaryDataRow>) -> Self {
        let mut partition = Self::default();
        for row in rows {
            partition.insert(Arc::new(row));
        }
        partition
    }

    fn insert(&mut self, row: Arc<PrimaryDataRow>) {
        let key = row.key().clone();
        if let Some(old_key) = self.by_id.insert(row.id(), key.clone()) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }
        if let Some(old) = self.by_key.insert(key, row.clone()) {
            if old.id() != row.id() {
                self.by_id.remove(&old.id());
            }
        }
    }

    fn remove(&mut self, key: &RecordKey) -> bool {
        match self.by_key.remove(key) {
            Some(row) => {
                self.by_id.remove(&row.id());
                true
            }
            None => false,
        }
    }

    fn by_id(&self, id: RecordId) -> Option<Arc<PrimaryDataRow>> {
        self.by_id
            .get(&id)
            .and_then(|key| self.by_key.get(key))
            .cloned()
    }
}

/// Cached primary-data rows, loaded per library and record type on first use.
///
/// Direct puts keep the key-identity cache in step, so the two caches never
/// disagree about which id a key names.
pub struct PrimaryDataCache {
    loader: Arc<CacheLoader>,
    ids: Arc<KeyIdentityCache>,
    partitions: Partitions<LibraryRows>,
}

impl PrimaryDataCache {
    pub fn new(loader: Arc<CacheLoader>, ids: Arc<KeyIdentityCache>) -> Self {
        Self {
            loader,
            ids,
            partitions: Partitions::default(),
        }
    }

    async fn read<R>(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        read: impl Fn(&LibraryRows) -> R + Send + Sync,
    ) -> StacksResult<R>
    where
        R: Send,
    {
        self.partitions
            .read_through(
                (library_id, record_type),
                || async {
                    self.loader
                        .load_rows(library_id, record_type)
                        .await
                        .map(LibraryRows::from_rows)
                },
                read,
            )
            .await
    }

    pub async fn get_by_id(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        id: RecordId,
    ) -> StacksResult<Option<Arc<PrimaryDataRow>>> {
        self.read(library_id, record_type, |rows| rows.by_id(id))
            .await
    }

    pub async fn get_by_key(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<Arc<PrimaryDataRow>>> {
        record_type.validate_key(key.as_str())?;
        self.read(library_id, record_type, |rows| rows.by_key.get(key).cloned())
            .await
    }

    /// Every cached row of a type in a library, in no particular order.
    pub async fn rows(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<Arc<PrimaryDataRow>>> {
        self.read(library_id, record_type, |rows| {
            rows.by_key.values().cloned().collect()
        })
        .await
    }

    /// Insert or replace a row under both indices and bind its key.
    ///
    /// A key already bound to a different id is a `Conflict`; neither cache
    /// changes.
    pub async fn put(&self, row: PrimaryDataRow) -> StacksResult<()> {
        row.validate()?;
        let slot = (row.library_id(), row.record_type());
        if !self.partitions.is_loaded(&slot)? {
            self.read(slot.0, slot.1, |_| ()).await?;
        }
        self.ids
            .register(row.library_id(), row.record_type(), row.key(), row.id())
            .await?;
        self.apply_put(row)
    }

    /// Remove a row from both indices. Returns whether it was cached.
    pub fn evict(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<bool> {
        let removed = self
            .partitions
            .update((library_id, record_type), |rows| rows.remove(key))?
            .unwrap_or(false);
        if removed {
            debug!(library_id = %library_id, record_type = %record_type, key = %key, "evicted row");
        }
        Ok(removed)
    }

    /// Drop the partition; the next read reloads it.
    pub fn invalidate(&self, library_id: LibraryId, record_type: RecordType) -> StacksResult<()> {
        self.partitions.remove((library_id, record_type))
    }

    pub fn clear_all(&self) -> StacksResult<()> {
        self.partitions.clear()
    }

    /// Apply a committed write. Unloaded partitions only record that they moved.
    pub(crate) fn apply_put(&self, row: PrimaryDataRow) -> StacksResult<()> {
        self.partitions
            .update((row.library_id(), row.record_type()), |rows| {
                rows.insert(Arc::new(row))
            })?;
        Ok(())
    }
}
