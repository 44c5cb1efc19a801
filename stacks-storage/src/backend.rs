//! Storage collaborator traits.
//!
//! The relational store itself lives elsewhere; this layer only needs point
//! and range reads routed by shard, an atomic transaction scope, and a
//! monotonic id generator.

use async_trait::async_trait;
use serde_json::Value;
use stacks_core::{
    DeleteLogType, DeletedSince, LibraryId, LibraryRecord, Membership, PrimaryDataRow,
    RecordId, RecordKey, RecordType, ShardId, StacksResult, Timestamp, Tombstone, UserId,
    Version,
};

/// Non-transactional reads and transaction entry point.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // TRANSACTIONS
    // ========================================================================

    /// Open a transaction on a shard.
    async fn begin(&self, shard_id: ShardId) -> StacksResult<Box<dyn StorageTransaction>>;

    /// Allocate a new record id. Ids are never reused, even after rollback.
    async fn next_id(&self, record_type: RecordType) -> StacksResult<RecordId>;

    // ========================================================================
    // LIBRARY DIRECTORY
    // ========================================================================

    async fn library(&self, library_id: LibraryId) -> StacksResult<Option<LibraryRecord>>;

    /// The personal library owned by a user.
    async fn user_library(&self, user_id: UserId) -> StacksResult<Option<LibraryId>>;

    /// Group libraries a user belongs to.
    async fn user_groups(&self, user_id: UserId) -> StacksResult<Vec<LibraryId>>;

    async fn membership(
        &self,
        library_id: LibraryId,
        user_id: UserId,
    ) -> StacksResult<Option<Membership>>;

    // ========================================================================
    // BULK READS
    // ========================================================================

    /// Every (id, key) pair of a record type in a library.
    async fn load_keys(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<(RecordId, RecordKey)>>;

    /// Every primary-data row of a record type in a library, in no particular order.
    async fn load_rows(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<PrimaryDataRow>>;

    async fn tombstones(
        &self,
        shard_id: ShardId,
        library_id: LibraryId,
        log_type: DeleteLogType,
        since: DeletedSince,
    ) -> StacksResult<Vec<Tombstone>>;
}

/// One atomic storage scope.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Timestamp shared by every write in this transaction.
    fn timestamp(&self) -> Timestamp;

    async fn library_version(&mut self, library_id: LibraryId) -> StacksResult<Version>;

    async fn set_library_version(
        &mut self,
        library_id: LibraryId,
        version: Version,
        updated_at: Timestamp,
    ) -> StacksResult<()>;

    async fn row_by_key(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<PrimaryDataRow>>;

    async fn row_by_id(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        id: RecordId,
    ) -> StacksResult<Option<PrimaryDataRow>>;

    /// Rows whose `field` equals `value`.
    async fn find_rows(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> StacksResult<Vec<PrimaryDataRow>>;

    /// Insert or replace a row. Keys must stay unique per library and type.
    async fn upsert_row(&mut self, row: &PrimaryDataRow) -> StacksResult<()>;

    /// Delete a row by key. Returns whether a row was removed.
    async fn delete_row(
        &mut self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<bool>;

    async fn tombstone(
        &mut self,
        library_id: LibraryId,
        log_type: DeleteLogType,
        key: &str,
    ) -> StacksResult<Option<Tombstone>>;

    async fn put_tombstone(&mut self, tombstone: &Tombstone) -> StacksResult<()>;

    async fn commit(&mut self) -> StacksResult<()>;

    async fn rollback(&mut self) -> StacksResult<()>;
}
