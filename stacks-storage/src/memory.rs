//! In-memory storage backend.
//!
//! Committed state sits behind a `std::sync::RwLock`. Transactions are
//! serialized by a `tokio::sync::Mutex`, work on a private copy of the state
//! and swap it in on commit, so an abandoned transaction leaves no trace.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use stacks_core::{
    DeleteLogType, DeletedSince, LibraryId, LibraryRecord, Membership, PrimaryDataRow,
    RecordId, RecordKey, RecordType, ShardId, StacksResult, StorageError,
    Timestamp, Tombstone, UserId, ValidationError, Version,
};
use tokio::sync::OwnedMutexGuard;

use crate::backend::{StorageBackend, StorageTransaction};

type RowTable = BTreeMap<RecordId, PrimaryDataRow>;
type TombstoneKey = (LibraryId, DeleteLogType, String);

#[derive(Debug, Clone, Default)]
struct StorageState {
    libraries: BTreeMap<LibraryId, LibraryRecord>,
    user_libraries: HashMap<UserId, LibraryId>,
    memberships: HashMap<(LibraryId, UserId), Membership>,
    rows: HashMap<(LibraryId, RecordType), RowTable>,
    tombstones: BTreeMap<TombstoneKey, Tombstone>,
}

impl StorageState {
    fn check_shard(&self, shard_id: ShardId, library_id: LibraryId) -> StacksResult<()> {
        let library = self
            .libraries
            .get(&library_id)
            .ok_or(ValidationError::UnknownLibrary { library_id })?;
        if library.shard_id != shard_id {
            return Err(StorageError::ShardMismatch {
                library_id,
                expected: library.shard_id,
                got: shard_id,
            }
            .into());
        }
        Ok(())
    }

    fn table(&self, library_id: LibraryId, record_type: RecordType) -> Option<&RowTable> {
        self.rows.get(&(library_id, record_type))
    }

    fn row_by_key(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> Option<&PrimaryDataRow> {
        self.table(library_id, record_type)
            .and_then(|table| table.values().find(|row| row.key() == key))
    }
}

#[derive(Debug, Default)]
struct Inner {
    committed: RwLock<StorageState>,
    writer: Arc<tokio::sync::Mutex<()>>,
    next_ids: Mutex<HashMap<RecordType, u64>>,
    bulk_loads: Mutex<HashMap<(LibraryId, RecordType), usize>>,
    fail_next_commit: AtomicBool,
}

/// In-memory storage for tests and single-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Inner>,
}

impl InMemoryStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> StacksResult<std::sync::RwLockReadGuard<'_, StorageState>> {
        self.inner
            .committed
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_state(&self) -> StacksResult<std::sync::RwLockWriteGuard<'_, StorageState>> {
        self.inner
            .committed
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn record_bulk_load(&self, library_id: LibraryId, record_type: RecordType) {
        if let Ok(mut loads) = self.inner.bulk_loads.lock() {
            *loads.entry((library_id, record_type)).or_default() += 1;
        }
    }

    // ========================================================================
    // SEEDING
    // ========================================================================

    /// Register a library. Replaces any existing record for the same id.
    pub fn add_library(&self, library: LibraryRecord) -> StacksResult<()> {
        self.write_state()?
            .libraries
            .insert(library.library_id, library);
        Ok(())
    }

    /// Record which personal library a user owns.
    pub fn add_user(&self, user_id: UserId, library_id: LibraryId) -> StacksResult<()> {
        self.write_state()?.user_libraries.insert(user_id, library_id);
        Ok(())
    }

    pub fn add_membership(
        &self,
        library_id: LibraryId,
        user_id: UserId,
        membership: Membership,
    ) -> StacksResult<()> {
        self.write_state()?
            .memberships
            .insert((library_id, user_id), membership);
        Ok(())
    }

    /// Insert a committed row directly, bypassing transactions and versioning.
    pub fn insert_row(&self, row: PrimaryDataRow) -> StacksResult<()> {
        row.validate()?;
        {
            let mut ids = self
                .inner
                .next_ids
                .lock()
                .map_err(|_| StorageError::LockPoisoned)?;
            let counter = ids.entry(row.record_type()).or_default();
            *counter = (*counter).max(row.id().get());
        }
        let mut state = self.write_state()?;
        state
            .rows
            .entry((row.library_id(), row.record_type()))
            .or_default()
            .insert(row.id(), row);
        Ok(())
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Committed rows of a type in a library, ordered by id.
    pub fn committed_rows(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<PrimaryDataRow>> {
        Ok(self
            .read_state()?
            .table(library_id, record_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Committed version of a library.
    pub fn committed_version(&self, library_id: LibraryId) -> StacksResult<Option<Version>> {
        Ok(self
            .read_state()?
            .libraries
            .get(&library_id)
            .map(|library| library.version))
    }

    pub fn committed_tombstones(&self, library_id: LibraryId) -> StacksResult<Vec<Tombstone>> {
        Ok(self
            .read_state()?
            .tombstones
            .values()
            .filter(|t| t.library_id == library_id)
            .cloned()
            .collect())
    }

    /// How many bulk loads have hit storage for a library and type.
    pub fn bulk_load_count(&self, library_id: LibraryId, record_type: RecordType) -> usize {
        self.inner
            .bulk_loads
            .lock()
            .map(|loads| loads.get(&(library_id, record_type)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make the next commit fail as if the database rejected it.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn begin(&self, shard_id: ShardId) -> StacksResult<Box<dyn StorageTransaction>> {
        let guard = self.inner.writer.clone().lock_owned().await;
        let working = self.read_state()?.clone();
        Ok(Box::new(InMemoryTransaction {
            storage: self.clone(),
            shard_id,
            working,
            timestamp: Utc::now(),
            finished: false,
            _guard: guard,
        }))
    }

    async fn next_id(&self, record_type: RecordType) -> StacksResult<RecordId> {
        let mut ids = self
            .inner
            .next_ids
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        let counter = ids.entry(record_type).or_default();
        *counter += 1;
        Ok(RecordId::new(*counter)?)
    }

    async fn library(&self, library_id: LibraryId) -> StacksResult<Option<LibraryRecord>> {
        Ok(self.read_state()?.libraries.get(&library_id).cloned())
    }

    async fn user_library(&self, user_id: UserId) -> StacksResult<Option<LibraryId>> {
        Ok(self.read_state()?.user_libraries.get(&user_id).copied())
    }

    async fn user_groups(&self, user_id: UserId) -> StacksResult<Vec<LibraryId>> {
        let state = self.read_state()?;
        let mut groups: Vec<LibraryId> = state
            .memberships
            .keys()
            .filter(|(_, member)| *member == user_id)
            .map(|(library_id, _)| *library_id)
            .collect();
        groups.sort();
        Ok(groups)
    }

    async fn membership(
        &self,
        library_id: LibraryId,
        user_id: UserId,
    ) -> StacksResult<Option<Membership>> {
        Ok(self
            .read_state()?
            .memberships
            .get(&(library_id, user_id))
            .copied())
    }

    async fn load_keys(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<(RecordId, RecordKey)>> {
        let state = self.read_state()?;
        state.check_shard(shard_id, library_id)?;
        self.record_bulk_load(library_id, record_type);
        Ok(state
            .table(library_id, record_type)
            .map(|table| {
                table
                    .values()
                    .map(|row| (row.id(), row.key().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_rows(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<PrimaryDataRow>> {
        let state = self.read_state()?;
        state.check_shard(shard_id, library_id)?;
        self.record_bulk_load(library_id, record_type);
        Ok(state
            .table(library_id, record_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn tombstones(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        log_type: DeleteLogType,
        since: DeletedSince,
    ) -> StacksResult<Vec<Tombstone>> {
        let state = self.read_state()?;
        state.check_shard(shard_id, library_id)?;
        Ok(state
            .tombstones
            .values()
            .filter(|t| t.library_id == library_id && t.log_type == log_type)
            .filter(|t| since.includes(t))
            .cloned()
            .collect())
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Transaction over a private copy of the committed state.
pub struct InMemoryTransaction {
    storage: InMemoryStorage,
    shard_id: ShardId,
    working: StorageState,
    timestamp: Timestamp,
    finished: bool,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn check_open(&self) -> StacksResult<()> {
        if self.finished {
            return Err(StorageError::TransactionFinished.into());
        }
        Ok(())
    }

    fn check_library(&self, library_id: LibraryId) -> StacksResult<()> {
        self.check_open()?;
        self.working.check_shard(self.shard_id, library_id)
    }
}

#[async_trait]
impl StorageTransaction for InMemoryTransaction {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    async fn library_version(&mut self, library_id: LibraryId) -> StacksResult<Version> {
        self.check_library(library_id)?;
        Ok(self
            .working
            .libraries
            .get(&library_id)
            .map(|library| library.version)
            .unwrap_or_default())
    }

    async fn set_library_version(
        &mut self,
        library_id: LibraryId,
        version: Version,
        updated_at: Timestamp,
    ) -> StacksResult<()> {
        self.check_library(library_id)?;
        if let Some(library) = self.working.libraries.get_mut(&library_id) {
            library.version = version;
            library.last_updated = updated_at;
        }
        Ok(())
    }

    async fn row_by_key(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<PrimaryDataRow>> {
        self.check_library(library_id)?;
        Ok(self.working.row_by_key(library_id, record_type, key).cloned())
    }

    async fn row_by_id(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        id: RecordId,
    ) -> StacksResult<Option<PrimaryDataRow>> {
        self.check_library(library_id)?;
        Ok(self
            .working
            .table(library_id, record_type)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    async fn find_rows(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> StacksResult<Vec<PrimaryDataRow>> {
        self.check_library(library_id)?;
        Ok(self
            .working
            .table(library_id, record_type)
            .map(|table| {
                table
                    .values()
                    .filter(|row| row.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_row(&mut self, row: &PrimaryDataRow) -> StacksResult<()> {
        self.check_library(row.library_id())?;
        row.validate()?;
        let table = self
            .working
            .rows
            .entry((row.library_id(), row.record_type()))
            .or_default();
        if table
            .values()
            .any(|existing| existing.key() == row.key() && existing.id() != row.id())
        {
            return Err(StorageError::UniqueViolation {
                record_type: row.record_type(),
                library_id: row.library_id(),
                key: row.key().to_string(),
            }
            .into());
        }
        table.insert(row.id(), row.clone());
        Ok(())
    }

    async fn delete_row(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<bool> {
        self.check_library(library_id)?;
        let Some(table) = self.working.rows.get_mut(&(library_id, record_type)) else {
            return Ok(false);
        };
        let id = table
            .values()
            .find(|row| row.key() == key)
            .map(|row| row.id());
        Ok(id.and_then(|id| table.remove(&id)).is_some())
    }

    async fn tombstone(
        &mut self,
        library_id: LibraryId,
        log_type: DeleteLogType,
        key: &str,
    ) -> StacksResult<Option<Tombstone>> {
        self.check_library(library_id)?;
        Ok(self
            .working
            .tombstones
            .get(&(library_id, log_type, key.to_string()))
            .cloned())
    }

    async fn put_tombstone(&mut self, tombstone: &Tombstone) -> StacksResult<()> {
        self.check_library(tombstone.library_id)?;
        self.working.tombstones.insert(
            (
                tombstone.library_id,
                tombstone.log_type,
                tombstone.key.clone(),
            ),
            tombstone.clone(),
        );
        Ok(())
    }

    async fn commit(&mut self) -> StacksResult<()> {
        self.check_open()?;
        self.finished = true;
        if self
            .storage
            .inner
            .fail_next_commit
            .swap(false, Ordering::SeqCst)
        {
            return Err(StorageError::TransactionFailed {
                reason: "commit rejected".to_string(),
            }
            .into());
        }
        let working = std::mem::take(&mut self.working);
        *self.storage.write_state()? = working;
        Ok(())
    }

    async fn rollback(&mut self) -> StacksResult<()> {
        self.check_open()?;
        self.finished = true;
        self.working = StorageState::default();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
