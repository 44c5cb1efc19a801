//! In-process shared cache.

use std::collections::HashMap;

use async_trait::async_trait;
use stacks_core::{LibraryId, StacksResult};

use super::shared_key::SharedCacheKey;
use super::traits::{CacheStats, SharedCache};

/// In-memory shared cache for tests and single-node deployments.
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug, Default)]
pub struct InMemorySharedCache {
    state: tokio::sync::RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry exists, without touching hit statistics.
    pub async fn contains(&self, key: &SharedCacheKey) -> bool {
        self.state.read().await.entries.contains_key(&key.encode())
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &SharedCacheKey) -> StacksResult<Option<Vec<u8>>> {
        let mut state = self.state.write().await;
        let value = state.entries.get(&key.encode()).cloned();
        if value.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(value)
    }

    async fn set(&self, key: &SharedCacheKey, value: Vec<u8>) -> StacksResult<()> {
        self.state.write().await.entries.insert(key.encode(), value);
        Ok(())
    }

    async fn delete(&self, key: &SharedCacheKey) -> StacksResult<bool> {
        Ok(self
            .state
            .write()
            .await
            .entries
            .remove(&key.encode())
            .is_some())
    }

    async fn invalidate_library(&self, library_id: LibraryId) -> StacksResult<u64> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|encoded, _| {
            SharedCacheKey::decode(encoded).map(|k| k.library_id()) != Some(library_id)
        });
        Ok((before - state.entries.len()) as u64)
    }

    async fn stats(&self) -> StacksResult<CacheStats> {
        let state = self.state.read().await;
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            entry_count: state.entries.len() as u64,
            memory_bytes: state.entries.values().map(|v| v.len() as u64).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks_core::{RecordType, Version};

    fn lib(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    #[tokio::test]
    async fn test_get_set_and_stats() {
        let cache = InMemorySharedCache::new();
        let key = SharedCacheKey::data(RecordType::Collection, lib(1), Version(2), 3);

        assert!(cache.get(&key).await.expect("get should succeed").is_none());
        cache
            .set(&key, b"[]".to_vec())
            .await
            .expect("set should succeed");
        assert_eq!(
            cache.get(&key).await.expect("get should succeed"),
            Some(b"[]".to_vec())
        );

        let stats = cache.stats().await.expect("stats should succeed");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_invalidate_library_is_scoped() {
        let cache = InMemorySharedCache::new();
        for library in [1, 2] {
            for record_type in [RecordType::Collection, RecordType::Item] {
                let key = SharedCacheKey::ids_by_key(record_type, lib(library), Version(1), 3);
                cache
                    .set(&key, b"[]".to_vec())
                    .await
                    .expect("set should succeed");
            }
        }
        let removed = cache
            .invalidate_library(lib(1))
            .await
            .expect("invalidate should succeed");
        assert_eq!(removed, 2);
        let survivor = SharedCacheKey::ids_by_key(RecordType::Item, lib(2), Version(1), 3);
        assert!(cache.contains(&survivor).await);
    }
}
