//! Unit of work: one storage transaction plus its staged cache writes.
//!
//! Every mutation of a library happens inside a [`UnitOfWork`]. Storage
//! writes go straight to the transaction; cache writes are staged and only
//! published after the transaction commits. Dropping a unit without
//! committing rolls both back.

use serde_json::Value;
use stacks_core::{
    LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksError, StacksResult,
    Timestamp, Version,
};
use tracing::{debug, warn};

use crate::access::{EditTarget, RequestContext};
use crate::backend::StorageTransaction;
use crate::cache::{CacheStage, StagedOp};
use crate::store::ObjectStore;

pub struct UnitOfWork<'s> {
    store: &'s ObjectStore,
    ctx: &'s RequestContext,
    library_id: LibraryId,
    tx: Box<dyn StorageTransaction>,
    stage: CacheStage,
    bumped: Option<Version>,
    finished: bool,
}

impl<'s> UnitOfWork<'s> {
    /// Open a unit on the shard holding `library_id`.
    pub async fn begin(
        store: &'s ObjectStore,
        ctx: &'s RequestContext,
        library_id: LibraryId,
    ) -> StacksResult<UnitOfWork<'s>> {
        let shard_id = store.shards().shard_for(library_id).await?;
        let tx = store.storage().begin(shard_id).await?;
        ctx.enter_unit();
        Ok(Self {
            store,
            ctx,
            library_id,
            tx,
            stage: CacheStage::new(),
            bumped: None,
            finished: false,
        })
    }

    pub fn library_id(&self) -> LibraryId {
        self.library_id
    }

    pub fn store(&self) -> &'s ObjectStore {
        self.store
    }

    pub fn context(&self) -> &'s RequestContext {
        self.ctx
    }

    /// Timestamp shared by every write in this unit.
    pub fn timestamp(&self) -> Timestamp {
        self.tx.timestamp()
    }

    pub fn staged(&self) -> &CacheStage {
        &self.stage
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Resolve a key, seeing this unit's own staged writes first.
    pub async fn resolve(
        &mut self,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<RecordId>> {
        record_type.validate_key(key.as_str())?;
        if let Some(staged) = self.stage.lookup(self.library_id, record_type, key) {
            return Ok(staged);
        }
        self.store
            .ids()
            .resolve(self.library_id, record_type, key)
            .await
    }

    /// Load a row by key, seeing this unit's own staged writes first.
    pub async fn load(
        &mut self,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<Option<PrimaryDataRow>> {
        record_type.validate_key(key.as_str())?;
        if let Some(staged) = self.stage.row_by_key(self.library_id, record_type, key) {
            return Ok(staged.cloned());
        }
        Ok(self
            .store
            .rows()
            .get_by_key(self.library_id, record_type, key)
            .await?
            .map(|row| (*row).clone()))
    }

    pub async fn load_by_id(
        &mut self,
        record_type: RecordType,
        id: RecordId,
    ) -> StacksResult<Option<PrimaryDataRow>> {
        if let Some(staged) = self.stage.row_by_id(self.library_id, record_type, id) {
            return Ok(staged.cloned());
        }
        Ok(self
            .store
            .rows()
            .get_by_id(self.library_id, record_type, id)
            .await?
            .map(|row| (*row).clone()))
    }

    /// Rows whose `field` equals `value`, as this transaction sees them.
    pub async fn find_rows(
        &mut self,
        record_type: RecordType,
        field: &str,
        value: &Value,
    ) -> StacksResult<Vec<PrimaryDataRow>> {
        self.tx
            .find_rows(self.library_id, record_type, field, value)
            .await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// `AccessDenied` unless the request's actor may make this edit.
    pub async fn edit_check(&mut self, target: &EditTarget) -> StacksResult<()> {
        self.store.guard().edit_check(self.ctx.actor(), target).await
    }

    /// The library version every write in this unit is stamped with.
    ///
    /// The first call bumps the library version inside the transaction; later
    /// calls return the same value.
    pub async fn updated_version(&mut self) -> StacksResult<Version> {
        if let Some(version) = self.bumped {
            return Ok(version);
        }
        let version = self
            .store
            .versions()
            .bump(self.tx.as_mut(), self.library_id)
            .await?;
        self.bumped = Some(version);
        Ok(version)
    }

    /// Allocate a record id. Ids are not returned on rollback.
    pub async fn allocate_id(&mut self, record_type: RecordType) -> StacksResult<RecordId> {
        self.store.storage().next_id(record_type).await
    }

    /// A fresh random key not yet bound in this library.
    pub async fn generate_key(&mut self, record_type: RecordType) -> StacksResult<RecordKey> {
        let attempts = self.store.config().key_generation_attempts;
        for _ in 0..attempts {
            let key = RecordKey::generate();
            if self.resolve(record_type, &key).await?.is_none() {
                return Ok(key);
            }
            debug!(record_type = %record_type, key = %key, "generated key already in use");
        }
        Err(StacksError::invalid_state(format!(
            "no free {} key after {} attempts",
            record_type, attempts
        )))
    }

    /// Bind a key to an id once this unit commits.
    ///
    /// A different id already bound to the key, committed or staged, is a
    /// `Conflict`.
    pub async fn register(
        &mut self,
        record_type: RecordType,
        key: &RecordKey,
        id: RecordId,
    ) -> StacksResult<()> {
        if let Some(existing) = self.resolve(record_type, key).await? {
            if existing != id {
                return Err(StacksError::Conflict {
                    record_type,
                    library_id: self.library_id,
                    key: key.to_string(),
                    existing,
                    attempted: id,
                });
            }
            return Ok(());
        }
        self.stage.push(StagedOp::Register {
            library_id: self.library_id,
            record_type,
            key: key.clone(),
            id,
        });
        Ok(())
    }

    /// Insert or replace a row in storage and stage it for the caches.
    pub async fn write_row(&mut self, row: PrimaryDataRow) -> StacksResult<()> {
        if row.library_id() != self.library_id {
            return Err(StacksError::invalid_state(format!(
                "unit of work for library {} cannot write to library {}",
                self.library_id,
                row.library_id()
            )));
        }
        self.register(row.record_type(), row.key(), row.id()).await?;
        self.tx.upsert_row(&row).await?;
        self.stage.push(StagedOp::Put(row));
        Ok(())
    }

    /// Delete a row from storage and stage its eviction. Returns whether
    /// storage held the row.
    pub async fn remove_row(&mut self, row: &PrimaryDataRow) -> StacksResult<bool> {
        let deleted = self
            .tx
            .delete_row(row.library_id(), row.record_type(), row.key())
            .await?;
        self.stage.push(StagedOp::Evict {
            library_id: row.library_id(),
            record_type: row.record_type(),
            key: row.key().clone(),
            id: row.id(),
        });
        Ok(deleted)
    }

    pub(crate) fn tx(&mut self) -> &mut dyn StorageTransaction {
        self.tx.as_mut()
    }

    // ========================================================================
    // COMPLETION
    // ========================================================================

    /// Commit storage, then publish the staged cache writes.
    ///
    /// Once storage has committed the unit counts as done. If the caches
    /// cannot take the staged writes, the partitions they touch are dropped
    /// so the next read reloads from storage.
    pub async fn commit(mut self) -> StacksResult<()> {
        self.finished = true;
        self.tx.commit().await?;
        let stage = std::mem::take(&mut self.stage);
        let touched = stage.touched();
        debug!(
            library_id = %self.library_id,
            version = ?self.bumped.map(|v| v.get()),
            staged = stage.ops().len(),
            "committed unit of work"
        );
        if let Err(e) = stage.apply(self.store.ids(), self.store.rows()) {
            warn!(
                library_id = %self.library_id,
                error = %e,
                "cache update after commit failed, invalidating"
            );
            for (library_id, record_type) in touched {
                let ids = self.store.ids().invalidate(library_id, record_type);
                let rows = self.store.rows().invalidate(library_id, record_type);
                if let Err(e) = ids.and(rows) {
                    warn!(
                        library_id = %library_id,
                        record_type = %record_type,
                        error = %e,
                        "cache invalidation failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Discard storage writes and staged cache writes.
    pub async fn rollback(mut self) -> StacksResult<()> {
        self.finished = true;
        self.stage = CacheStage::new();
        self.tx.rollback().await
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        self.ctx.exit_unit();
        if !self.finished {
            warn!(library_id = %self.library_id, "unit of work dropped without commit, rolled back");
        }
    }
}
