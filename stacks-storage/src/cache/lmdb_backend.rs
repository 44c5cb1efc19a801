//! LMDB-backed shared cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that several worker processes on one host can share.
//!
//! # Layout
//!
//! Keys are the encoded [`SharedCacheKey`] strings. Values are
//! `[cached_at millis: 8 bytes][payload]`.
//!
//! # Thread Safety
//!
//! `get` runs in a read transaction and every mutation in a write
//! transaction. Hit/miss counters live behind `RwLock`s and are updated
//! best-effort.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stacks_core::{LibraryId, StacksError, StacksResult, StorageError};

use super::shared_key::SharedCacheKey;
use super::traits::{CacheStats, SharedCache};

#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    #[error("cannot open shared cache environment: {0}")]
    EnvOpen(String),

    #[error("cannot open shared cache database: {0}")]
    DbOpen(String),

    #[error("shared cache transaction failed: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("corrupt shared cache entry for {0}")]
    Corrupt(String),

    #[error("shared cache directory: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StacksError {
    fn from(e: LmdbCacheError) -> Self {
        StacksError::Storage(StorageError::SharedCache {
            reason: e.to_string(),
        })
    }
}

const HEADER_LEN: usize = 8;

#[derive(Debug, Default)]
struct LibraryStatsInner {
    hits: u64,
    misses: u64,
    entries: u64,
    size_bytes: u64,
}

/// LMDB-backed shared cache.
///
/// # Example
///
/// ```ignore
/// use stacks_storage::cache::{LmdbSharedCache, SharedCache, SharedCacheKey};
///
/// let cache = LmdbSharedCache::new("/var/cache/stacks", 256)?;
/// let key = SharedCacheKey::ids_by_key(RecordType::Collection, library_id, version, 3);
/// cache.set(&key, bytes).await?;
/// let cached = cache.get(&key).await?;
/// ```
pub struct LmdbSharedCache {
    env: Env,
    db: Database<Bytes, Bytes>,
    library_stats: Arc<RwLock<HashMap<LibraryId, LibraryStatsInner>>>,
    global_stats: Arc<RwLock<CacheStats>>,
}

impl LmdbSharedCache {
    /// Open the cache under `path`, creating the directory if needed. The
    /// memory map is capped at `max_size_mb`.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the files are not modified outside LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            library_stats: Arc::new(RwLock::new(HashMap::new())),
            global_stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    fn record_hit(&self, library_id: LibraryId) {
        if let Ok(mut stats) = self.library_stats.write() {
            stats.entry(library_id).or_default().hits += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self, library_id: LibraryId) {
        if let Ok(mut stats) = self.library_stats.write() {
            stats.entry(library_id).or_default().misses += 1;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.misses += 1;
        }
    }

    fn update_entry_stats(&self, library_id: LibraryId, size_bytes: usize, is_new: bool) {
        if let Ok(mut stats) = self.library_stats.write() {
            let library_stats = stats.entry(library_id).or_default();
            if is_new {
                library_stats.entries += 1;
            }
            library_stats.size_bytes += size_bytes as u64;
        }
        if let Ok(mut stats) = self.global_stats.write() {
            if is_new {
                stats.entry_count += 1;
            }
            stats.memory_bytes += size_bytes as u64;
        }
    }

    /// Statistics for a single library.
    pub fn library_stats(&self, library_id: LibraryId) -> CacheStats {
        if let Ok(stats) = self.library_stats.read() {
            if let Some(library_stats) = stats.get(&library_id) {
                return CacheStats {
                    hits: library_stats.hits,
                    misses: library_stats.misses,
                    entry_count: library_stats.entries,
                    memory_bytes: library_stats.size_bytes,
                };
            }
        }
        CacheStats::default()
    }

    /// When an entry was written, if it exists.
    pub fn cached_at(&self, key: &SharedCacheKey) -> Result<Option<DateTime<Utc>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let encoded = key.encode();
        match self.db.get(&rtxn, encoded.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(decode_header(&encoded, bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LmdbCacheError::Transaction(e.to_string())),
        }
    }

    fn collect_library_keys(&self, library_id: LibraryId) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        for result in iter {
            let Ok((key, _)) = result else { continue };
            let belongs = std::str::from_utf8(key)
                .ok()
                .and_then(SharedCacheKey::decode)
                .map(|k| k.library_id() == library_id)
                .unwrap_or(false);
            if belongs {
                keys.push(key.to_vec());
            }
        }

        Ok(keys)
    }
}

fn decode_header(encoded: &str, bytes: &[u8]) -> Result<DateTime<Utc>, LmdbCacheError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| LmdbCacheError::Corrupt(encoded.to_string()))?;
    DateTime::from_timestamp_millis(i64::from_le_bytes(header))
        .ok_or_else(|| LmdbCacheError::Corrupt(encoded.to_string()))
}

#[async_trait]
impl SharedCache for LmdbSharedCache {
    async fn get(&self, key: &SharedCacheKey) -> StacksResult<Option<Vec<u8>>> {
        let encoded = key.encode();
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, encoded.as_bytes()) {
            Ok(Some(bytes)) => {
                self.record_hit(key.library_id());
                decode_header(&encoded, bytes)?;
                Ok(Some(bytes[HEADER_LEN..].to_vec()))
            }
            Ok(None) => {
                self.record_miss(key.library_id());
                Ok(None)
            }
            Err(e) => {
                self.record_miss(key.library_id());
                Err(LmdbCacheError::Transaction(e.to_string()).into())
            }
        }
    }

    async fn set(&self, key: &SharedCacheKey, value: Vec<u8>) -> StacksResult<()> {
        let encoded = key.encode();

        let mut full_bytes = Vec::with_capacity(HEADER_LEN + value.len());
        full_bytes.extend_from_slice(&Utc::now().timestamp_millis().to_le_bytes());
        full_bytes.extend_from_slice(&value);

        let is_new = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            self.db
                .get(&rtxn, encoded.as_bytes())
                .ok()
                .flatten()
                .is_none()
        };

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, encoded.as_bytes(), &full_bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.update_entry_stats(key.library_id(), full_bytes.len(), is_new);

        Ok(())
    }

    async fn delete(&self, key: &SharedCacheKey) -> StacksResult<bool> {
        let encoded = key.encode();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, encoded.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if deleted {
            if let Ok(mut stats) = self.library_stats.write() {
                if let Some(library_stats) = stats.get_mut(&key.library_id()) {
                    library_stats.entries = library_stats.entries.saturating_sub(1);
                }
            }
            if let Ok(mut stats) = self.global_stats.write() {
                stats.entry_count = stats.entry_count.saturating_sub(1);
            }
        }

        Ok(deleted)
    }

    async fn invalidate_library(&self, library_id: LibraryId) -> StacksResult<u64> {
        let keys_to_delete = self.collect_library_keys(library_id)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &keys_to_delete {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.library_stats.write() {
            stats.remove(&library_id);
        }
        if let Ok(mut stats) = self.global_stats.write() {
            stats.entry_count = stats.entry_count.saturating_sub(deleted);
        }

        Ok(deleted)
    }

    async fn stats(&self) -> StacksResult<CacheStats> {
        let stats = self
            .global_stats
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(stats.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================
