//! Bulk population of the process-local caches.
//!
//! A load first reads the library's current version and tries the shared
//! cache under the version-stamped key. On a miss it reads storage through the
//! library's shard and writes the result back to the shared cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use stacks_core::{
    LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksResult, StorageError,
};
use tracing::{debug, warn};

use super::shared_key::SharedCacheKey;
use super::traits::SharedCache;
use crate::backend::StorageBackend;
use crate::shard::ShardLocator;
use crate::version::VersionOracle;

pub struct CacheLoader {
    storage: Arc<dyn StorageBackend>,
    shared: Option<Arc<dyn SharedCache>>,
    shards: Arc<dyn ShardLocator>,
    versions: VersionOracle,
    format_version: u32,
}

impl CacheLoader {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        shared: Option<Arc<dyn SharedCache>>,
        shards: Arc<dyn ShardLocator>,
        format_version: u32,
    ) -> Self {
        let versions = VersionOracle::new(storage.clone());
        Self {
            storage,
            shared,
            shards,
            versions,
            format_version,
        }
    }

    pub fn shared(&self) -> Option<&Arc<dyn SharedCache>> {
        self.shared.as_ref()
    }

    /// Every (id, key) pair of a type in a library.
    pub async fn load_ids(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<(RecordId, RecordKey)>> {
        let version = self.versions.current(library_id).await?;
        let cache_key =
            SharedCacheKey::ids_by_key(record_type, library_id, version, self.format_version);

        if let Some(bytes) = self.fetch_shared(&cache_key).await {
            match decode_ids(record_type, &bytes) {
                Ok(pairs) => {
                    debug!(key = %cache_key, "Retrieved {}", cache_key);
                    return Ok(pairs);
                }
                Err(e) => warn!(key = %cache_key, error = %e, "discarding unreadable shared cache entry"),
            }
        }

        let shard_id = self.shards.shard_for(library_id).await?;
        let pairs = self
            .storage
            .load_keys(shard_id, library_id, record_type)
            .await?;

        debug!(key = %cache_key, count = pairs.len(), "Caching {}", cache_key);
        match serde_json::to_vec(&pairs) {
            Ok(bytes) => self.store_shared(&cache_key, bytes).await,
            Err(e) => warn!(key = %cache_key, error = %e, "failed to encode shared cache entry"),
        }
        Ok(pairs)
    }

    /// Every primary-data row of a type in a library.
    ///
    /// A shared entry whose rows do not match the declared schema is a
    /// `SchemaMismatch`, not a miss.
    pub async fn load_rows(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
    ) -> StacksResult<Vec<PrimaryDataRow>> {
        let version = self.versions.current(library_id).await?;
        let cache_key = SharedCacheKey::data(record_type, library_id, version, self.format_version);

        if let Some(bytes) = self.fetch_shared(&cache_key).await {
            match serde_json::from_slice::<Vec<BTreeMap<String, Value>>>(&bytes) {
                Ok(maps) => {
                    let rows = maps
                        .into_iter()
                        .map(|fields| PrimaryDataRow::from_fields(record_type, fields))
                        .collect::<StacksResult<Vec<_>>>()?;
                    debug!(key = %cache_key, "Retrieved {}", cache_key);
                    return Ok(rows);
                }
                Err(e) => warn!(key = %cache_key, error = %e, "discarding unreadable shared cache entry"),
            }
        }

        let shard_id = self.shards.shard_for(library_id).await?;
        let rows = self
            .storage
            .load_rows(shard_id, library_id, record_type)
            .await?;
        for row in &rows {
            row.validate()?;
        }

        debug!(key = %cache_key, count = rows.len(), "Caching {}", cache_key);
        match serde_json::to_vec(&rows) {
            Ok(bytes) => self.store_shared(&cache_key, bytes).await,
            Err(e) => warn!(key = %cache_key, error = %e, "failed to encode shared cache entry"),
        }
        Ok(rows)
    }

    /// Shared-cache read. Failures degrade to a miss.
    async fn fetch_shared(&self, key: &SharedCacheKey) -> Option<Vec<u8>> {
        let shared = self.shared.as_ref()?;
        match shared.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "shared cache read failed");
                None
            }
        }
    }

    async fn store_shared(&self, key: &SharedCacheKey, bytes: Vec<u8>) {
        if let Some(shared) = &self.shared {
            if let Err(e) = shared.set(key, bytes).await {
                warn!(key = %key, error = %e, "shared cache write failed");
            }
        }
    }
}

fn decode_ids(
    record_type: RecordType,
    bytes: &[u8],
) -> StacksResult<Vec<(RecordId, RecordKey)>> {
    let pairs: Vec<(RecordId, RecordKey)> =
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization {
            reason: e.to_string(),
        })?;
    for (_, key) in &pairs {
        record_type.validate_key(key.as_str())?;
    }
    Ok(pairs)
}
