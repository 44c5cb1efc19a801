//! Delete pipeline.
//!
//! A delete runs in one unit of work: access check, cascade to dependents,
//! relation cleanup, row removal and tombstones. Cache evictions are staged
//! and published only when the unit commits.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use stacks_core::{LibraryId, PrimaryDataRow, RecordKey, RecordType, StacksResult};
use tracing::{debug, info, warn};

use crate::access::{EditTarget, RequestContext};
use crate::delete_log::DeleteLog;
use crate::store::ObjectStore;
use crate::unit_of_work::UnitOfWork;

type DeleteFuture<'a> = Pin<Box<dyn Future<Output = StacksResult<usize>> + Send + 'a>>;

impl ObjectStore {
    /// Delete a record and everything that depends on it.
    ///
    /// Returns `false` when no record has `key`.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<bool> {
        ctx.ensure_idle("delete")?;
        record_type.validate_key(key.as_str())?;

        let mut uow = UnitOfWork::begin(self, ctx, library_id).await?;
        match delete_in(&mut uow, record_type, key).await {
            Ok(Some(removed)) => {
                uow.commit().await?;
                info!(
                    library_id = %library_id,
                    record_type = %record_type,
                    key = %key,
                    removed,
                    "deleted"
                );
                Ok(true)
            }
            Ok(None) => {
                uow.rollback().await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Delete several records of one type, each in its own unit of work.
    ///
    /// Child items are deleted before top-level items. Returns the keys that
    /// existed and were deleted by their own call; a key removed earlier by a
    /// cascade is skipped.
    pub async fn delete_many(
        &self,
        ctx: &RequestContext,
        library_id: LibraryId,
        record_type: RecordType,
        keys: &[RecordKey],
    ) -> StacksResult<Vec<RecordKey>> {
        ctx.ensure_idle("delete")?;

        let mut ordered: Vec<(bool, &RecordKey)> = Vec::with_capacity(keys.len());
        for key in keys {
            let is_child = match record_type {
                RecordType::Item => self
                    .rows()
                    .get_by_key(library_id, record_type, key)
                    .await?
                    .is_some_and(|row| row.parent_id().is_some()),
                _ => false,
            };
            ordered.push((is_child, key));
        }
        // Stable sort keeps submission order within each group.
        ordered.sort_by_key(|(is_child, _)| !*is_child);

        let mut deleted = Vec::new();
        for (_, key) in ordered {
            if self.delete(ctx, library_id, record_type, key).await? {
                deleted.push(key.clone());
            } else {
                debug!(key = %key, "already gone");
            }
        }
        Ok(deleted)
    }
}

/// `None` when the record does not exist, else the number of rows removed.
async fn delete_in(
    uow: &mut UnitOfWork<'_>,
    record_type: RecordType,
    key: &RecordKey,
) -> StacksResult<Option<usize>> {
    if uow.resolve(record_type, key).await?.is_none() {
        debug!(record_type = %record_type, key = %key, "nothing to delete");
        return Ok(None);
    }
    let Some(row) = uow.load(record_type, key).await? else {
        debug!(record_type = %record_type, key = %key, "key bound but row missing");
        return Ok(None);
    };
    uow.edit_check(&EditTarget::for_row(&row)).await?;
    delete_record(uow, row).await.map(Some)
}

fn delete_record<'a, 's: 'a>(uow: &'a mut UnitOfWork<'s>, row: PrimaryDataRow) -> DeleteFuture<'a> {
    Box::pin(async move {
        let mut removed = 0;

        for child in dependents(uow, &row).await? {
            removed += delete_record(uow, child).await?;
        }
        if row.record_type() == RecordType::Item {
            removed += erase_relations(uow, &row).await?;
        }

        if uow.remove_row(&row).await? {
            let version = uow.updated_version().await?;
            let timestamp = uow.timestamp();
            DeleteLog::record_deletion(uow.tx(), &row, version, timestamp).await?;
            removed += 1;
        } else {
            debug!(key = %row.key(), "row already removed from storage");
        }
        Ok(removed)
    })
}

/// Rows deleted along with `row`: child items of a top-level item, child
/// collections of a collection.
async fn dependents(
    uow: &mut UnitOfWork<'_>,
    row: &PrimaryDataRow,
) -> StacksResult<Vec<PrimaryDataRow>> {
    let record_type = row.record_type();
    let cascades = match record_type {
        RecordType::Item => row.parent_id().is_none(),
        RecordType::Collection => true,
        _ => false,
    };
    if !cascades {
        return Ok(Vec::new());
    }

    let candidates = uow
        .find_rows(record_type, "parentID", &Value::from(row.id().get()))
        .await?;
    let mut children = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let current = uow.load_by_id(record_type, candidate.id()).await?;
        match current {
            Some(child) if child.parent_id() == Some(row.id()) => children.push(child),
            _ => debug!(
                key = %candidate.key(),
                parent = %row.key(),
                "skipping candidate no longer under parent"
            ),
        }
    }
    Ok(children)
}

/// Delete relations naming `row` as subject or object. Merge-tracking
/// relations are kept.
async fn erase_relations(uow: &mut UnitOfWork<'_>, row: &PrimaryDataRow) -> StacksResult<usize> {
    let store = uow.store();
    let uri = store
        .record_uri(row.library_id(), row.record_type(), row.key())
        .await?;
    let uri = Value::from(uri);

    let mut relations = BTreeMap::new();
    for field in ["subject", "object"] {
        for relation in uow.find_rows(RecordType::Relation, field, &uri).await? {
            relations.insert(relation.key().clone(), relation);
        }
    }

    let mut removed = 0;
    for relation in relations.into_values() {
        let predicate = relation.get_str("predicate").unwrap_or_default();
        if store.config().is_merge_tracking(predicate) {
            debug!(key = %relation.key(), predicate, "keeping merge-tracking relation");
            continue;
        }
        removed += delete_record(uow, relation).await?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use chrono::Utc;
    use stacks_core::{LibraryRecord, LibraryType, RecordId, ShardId, Version};
    use std::sync::Arc;

    fn lib() -> LibraryId {
        LibraryId::new(1).expect("positive id")
    }

    fn item(id: u64, key: &str, parent: Option<u64>) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Item,
            lib(),
            RecordId::new(id).expect("id"),
            RecordKey::parse(RecordType::Item, key).expect("key"),
            Version(1),
        );
        let item_type = if parent.is_some() { "note" } else { "book" };
        row.set("itemType", item_type).expect("set");
        if let Some(parent) = parent {
            row.set("parentID", parent).expect("set");
        }
        row
    }

    fn setup() -> (InMemoryStorage, ObjectStore) {
        let storage = InMemoryStorage::new();
        let mut library = LibraryRecord::new(lib(), LibraryType::User, ShardId(1), Utc::now());
        library.version = Version(1);
        storage.add_library(library).expect("add library");
        let store = ObjectStore::builder(Arc::new(storage.clone()))
            .build()
            .expect("build should succeed");
        (storage, store)
    }

    #[tokio::test]
    async fn test_missing_key_is_not_an_error() {
        let (_, store) = setup();
        let ctx = RequestContext::system();
        let key = RecordKey::parse(RecordType::Item, "MISS2345").expect("key");
        assert!(!store
            .delete(&ctx, lib(), RecordType::Item, &key)
            .await
            .expect("delete should succeed"));
        assert!(!ctx.has_open_transaction());
        assert!(store
            .ids()
            .is_loaded(lib(), RecordType::Item)
            .expect("is_loaded"));
    }

    #[tokio::test]
    async fn test_cascade_shares_one_version() {
        let (storage, store) = setup();
        storage.insert_row(item(1, "PARE2345", None)).expect("seed");
        storage.insert_row(item(2, "CHLD2345", Some(1))).expect("seed");
        let ctx = RequestContext::system();
        let key = RecordKey::parse(RecordType::Item, "PARE2345").expect("key");

        assert!(store
            .delete(&ctx, lib(), RecordType::Item, &key)
            .await
            .expect("delete should succeed"));

        let tombstones = storage.committed_tombstones(lib()).expect("tombstones");
        assert_eq!(tombstones.len(), 2);
        assert!(tombstones.iter().all(|t| t.version == Version(2)));
        assert!(storage
            .committed_rows(lib(), RecordType::Item)
            .expect("rows")
            .is_empty());
    }
}
