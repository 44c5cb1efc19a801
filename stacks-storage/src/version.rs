//! Per-library version counter.

use std::sync::Arc;

use stacks_core::{LibraryId, LibraryRecord, StacksResult, Timestamp, ValidationError, Version};
use tracing::debug;

use crate::backend::{StorageBackend, StorageTransaction};

/// Reads and bumps library versions.
///
/// Reads go to committed storage. Bumps happen inside a storage transaction so
/// the new version commits or rolls back together with the write it stamps.
#[derive(Clone)]
pub struct VersionOracle {
    storage: Arc<dyn StorageBackend>,
}

impl VersionOracle {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn library(&self, library_id: LibraryId) -> StacksResult<LibraryRecord> {
        self.storage
            .library(library_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownLibrary { library_id }.into())
    }

    /// Current committed version of a library.
    pub async fn current(&self, library_id: LibraryId) -> StacksResult<Version> {
        Ok(self.library(library_id).await?.version)
    }

    pub async fn last_updated(&self, library_id: LibraryId) -> StacksResult<Timestamp> {
        Ok(self.library(library_id).await?.last_updated)
    }

    /// Increment the library version inside `tx` and return the new value.
    pub async fn bump(
        &self,
        tx: &mut dyn StorageTransaction,
        library_id: LibraryId,
    ) -> StacksResult<Version> {
        let next = tx.library_version(library_id).await?.next();
        let at = tx.timestamp();
        tx.set_library_version(library_id, next, at).await?;
        debug!(library_id = %library_id, version = %next, "bumped library version");
        Ok(next)
    }

    /// The subset of `libraries` whose version is past `since`, in input order.
    /// Unknown libraries are skipped.
    pub async fn updated_since(
        &self,
        libraries: &[LibraryId],
        since: Version,
    ) -> StacksResult<Vec<LibraryId>> {
        let mut updated = Vec::new();
        for &library_id in libraries {
            match self.storage.library(library_id).await? {
                Some(library) if library.version > since => updated.push(library_id),
                _ => {}
            }
        }
        Ok(updated)
    }
}
