//! Library to shard routing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stacks_core::{LibraryId, ShardId, StacksResult, ValidationError};

use crate::backend::StorageBackend;

/// Maps a library to the physical partition holding its data.
#[async_trait]
pub trait ShardLocator: Send + Sync {
    async fn shard_for(&self, library_id: LibraryId) -> StacksResult<ShardId>;
}

/// Reads the shard from the library directory in storage.
pub struct DirectoryShardLocator {
    storage: Arc<dyn StorageBackend>,
}

impl DirectoryShardLocator {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ShardLocator for DirectoryShardLocator {
    async fn shard_for(&self, library_id: LibraryId) -> StacksResult<ShardId> {
        self.storage
            .library(library_id)
            .await?
            .map(|library| library.shard_id)
            .ok_or_else(|| ValidationError::UnknownLibrary { library_id }.into())
    }
}

/// Fixed routing table with a default shard.
#[derive(Debug, Clone)]
pub struct StaticShardLocator {
    default_shard: ShardId,
    overrides: HashMap<LibraryId, ShardId>,
}

impl StaticShardLocator {
    pub fn new(default_shard: ShardId) -> Self {
        Self {
            default_shard,
            overrides: HashMap::new(),
        }
    }

    pub fn with_library(mut self, library_id: LibraryId, shard_id: ShardId) -> Self {
        self.overrides.insert(library_id, shard_id);
        self
    }
}

#[async_trait]
impl ShardLocator for StaticShardLocator {
    async fn shard_for(&self, library_id: LibraryId) -> StacksResult<ShardId> {
        Ok(self
            .overrides
            .get(&library_id)
            .copied()
            .unwrap_or(self.default_shard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStorage;
    use chrono::Utc;
    use stacks_core::{LibraryRecord, LibraryType, StacksError};

    fn lib(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    #[tokio::test]
    async fn test_directory_locator_reads_library_shard() {
        let storage = InMemoryStorage::new();
        storage
            .add_library(LibraryRecord::new(lib(3), LibraryType::Group, ShardId(4), Utc::now()))
            .expect("add library should succeed");
        let locator = DirectoryShardLocator::new(Arc::new(storage));
        assert_eq!(
            locator.shard_for(lib(3)).await.expect("shard_for should succeed"),
            ShardId(4)
        );
        assert!(matches!(
            locator.shard_for(lib(9)).await,
            Err(StacksError::InvalidInput(ValidationError::UnknownLibrary { .. }))
        ));
    }

    #[tokio::test]
    async fn test_static_locator_overrides() {
        let locator = StaticShardLocator::new(ShardId(1)).with_library(lib(2), ShardId(5));
        assert_eq!(locator.shard_for(lib(1)).await.expect("shard"), ShardId(1));
        assert_eq!(locator.shard_for(lib(2)).await.expect("shard"), ShardId(5));
    }
}
