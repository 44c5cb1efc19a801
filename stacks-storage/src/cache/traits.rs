//! Shared cache collaborator trait.
//!
//! The shared cache sits between the process-local caches and storage. Values
//! are opaque bytes; callers own the encoding.

use async_trait::async_trait;
use stacks_core::{LibraryId, StacksResult};

use super::shared_key::SharedCacheKey;

/// Cache shared across processes.
///
/// Implementations should be thread-safe and support concurrent access.
/// Entries are never updated in place: a version bump produces new keys.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a value, or `None` on a miss.
    async fn get(&self, key: &SharedCacheKey) -> StacksResult<Option<Vec<u8>>>;

    /// Store a value under a key, replacing any previous value.
    async fn set(&self, key: &SharedCacheKey, value: Vec<u8>) -> StacksResult<()>;

    /// Remove a single entry. Returns whether it existed.
    async fn delete(&self, key: &SharedCacheKey) -> StacksResult<bool>;

    /// Remove every entry belonging to a library.
    async fn invalidate_library(&self, library_id: LibraryId) -> StacksResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> StacksResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate size of stored values in bytes.
    pub memory_bytes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
