//! Cache writes staged inside a unit of work.
//!
//! Nothing here touches the shared caches until [`CacheStage::apply`] runs,
//! which only happens after the storage transaction has committed.

use std::collections::BTreeSet;

use stacks_core::{LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksResult};

use super::identity::KeyIdentityCache;
use super::primary_data::PrimaryDataCache;

#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    Register {
        library_id: LibraryId,
        record_type: RecordType,
        key: RecordKey,
        id: RecordId,
    },
    Put(PrimaryDataRow),
    Evict {
        library_id: LibraryId,
        record_type: RecordType,
        key: RecordKey,
        id: RecordId,
    },
}

impl StagedOp {
    fn targets(&self, library_id: LibraryId, record_type: RecordType, key: &RecordKey) -> bool {
        match self {
            StagedOp::Register {
                library_id: l,
                record_type: t,
                key: k,
                ..
            }
            | StagedOp::Evict {
                library_id: l,
                record_type: t,
                key: k,
                ..
            } => *l == library_id && *t == record_type && k == key,
            StagedOp::Put(row) => {
                row.library_id() == library_id && row.record_type() == record_type && row.key() == key
            }
        }
    }
}

/// Ordered cache writes of one unit of work.
#[derive(Debug, Default)]
pub struct CacheStage {
    ops: Vec<StagedOp>,
}

impl CacheStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StagedOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Every library and record type a staged write touches.
    pub fn touched(&self) -> BTreeSet<(LibraryId, RecordType)> {
        self.ops
            .iter()
            .map(|op| match op {
                StagedOp::Register {
                    library_id,
                    record_type,
                    ..
                }
                | StagedOp::Evict {
                    library_id,
                    record_type,
                    ..
                } => (*library_id, *record_type),
                StagedOp::Put(row) => (row.library_id(), row.record_type()),
            })
            .collect()
    }

    /// The staged binding for a key: `Some(Some(id))` if registered or put,
    /// `Some(None)` if evicted, `None` if the stage says nothing about it.
    pub fn lookup(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> Option<Option<RecordId>> {
        self.ops
            .iter()
            .rev()
            .find(|op| op.targets(library_id, record_type, key))
            .map(|op| match op {
                StagedOp::Register { id, .. } => Some(*id),
                StagedOp::Put(row) => Some(row.id()),
                StagedOp::Evict { .. } => None,
            })
    }

    /// The staged row for a key: `Some(Some(row))` if put, `Some(None)` if
    /// evicted, `None` if no staged put or evict touches it.
    pub fn row_by_key(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> Option<Option<&PrimaryDataRow>> {
        self.ops
            .iter()
            .rev()
            .filter(|op| !matches!(op, StagedOp::Register { .. }))
            .find(|op| op.targets(library_id, record_type, key))
            .map(|op| match op {
                StagedOp::Put(row) => Some(row),
                _ => None,
            })
    }

    /// Same as [`row_by_key`](Self::row_by_key), addressed by id.
    pub fn row_by_id(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        id: RecordId,
    ) -> Option<Option<&PrimaryDataRow>> {
        self.ops.iter().rev().find_map(|op| match op {
            StagedOp::Put(row)
                if row.library_id() == library_id
                    && row.record_type() == record_type
                    && row.id() == id =>
            {
                Some(Some(row))
            }
            StagedOp::Evict {
                library_id: l,
                record_type: t,
                id: evicted,
                ..
            } if *l == library_id && *t == record_type && *evicted == id => Some(None),
            _ => None,
        })
    }

    /// Publish every staged write, in order.
    pub fn apply(self, ids: &KeyIdentityCache, rows: &PrimaryDataCache) -> StacksResult<()> {
        for op in self.ops {
            match op {
                StagedOp::Register {
                    library_id,
                    record_type,
                    key,
                    id,
                } => ids.apply_registered(library_id, record_type, &key, id)?,
                StagedOp::Put(row) => {
                    ids.apply_registered(row.library_id(), row.record_type(), row.key(), row.id())?;
                    rows.apply_put(row)?;
                }
                StagedOp::Evict {
                    library_id,
                    record_type,
                    key,
                    ..
                } => {
                    ids.apply_removed(library_id, record_type, &key)?;
                    rows.evict(library_id, record_type, &key)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks_core::Version;

    fn lib() -> LibraryId {
        LibraryId::new(1).expect("positive id")
    }

    fn key(raw: &str) -> RecordKey {
        RecordKey::parse(RecordType::Collection, raw).expect("valid key")
    }

    #[test]
    fn test_lookup_sees_latest_op() {
        let mut stage = CacheStage::new();
        assert_eq!(stage.lookup(lib(), RecordType::Collection, &key("AAAA2222")), None);

        let id = RecordId::new(4).expect("positive id");
        stage.push(StagedOp::Put(PrimaryDataRow::new(
            RecordType::Collection,
            lib(),
            id,
            key("AAAA2222"),
            Version(1),
        )));
        assert_eq!(
            stage.lookup(lib(), RecordType::Collection, &key("AAAA2222")),
            Some(Some(id))
        );

        stage.push(StagedOp::Evict {
            library_id: lib(),
            record_type: RecordType::Collection,
            key: key("AAAA2222"),
            id,
        });
        assert_eq!(
            stage.lookup(lib(), RecordType::Collection, &key("AAAA2222")),
            Some(None)
        );
        assert_eq!(
            stage.row_by_id(lib(), RecordType::Collection, id),
            Some(None)
        );
        // Other types are unaffected.
        assert_eq!(stage.lookup(lib(), RecordType::Search, &key("AAAA2222")), None);
    }
}
