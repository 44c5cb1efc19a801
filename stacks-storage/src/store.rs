//! The object store: one injectable handle over every cache and collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use stacks_core::{
    LibraryId, RecordKey, RecordType, SharedCacheConfig, StacksConfig, StacksResult,
};
use tracing::info;

use crate::access::{AccessGuard, RequestContext};
use crate::backend::StorageBackend;
use crate::batch::BatchObject;
use crate::cache::{
    CacheLoader, InMemorySharedCache, KeyIdentityCache, LmdbSharedCache, PrimaryDataCache,
    SharedCache,
};
use crate::delete_log::DeleteLog;
use crate::objects;
use crate::shard::{DirectoryShardLocator, ShardLocator};
use crate::unit_of_work::UnitOfWork;
use crate::version::VersionOracle;

/// Caches, delete log, access guard and batch handlers over one storage
/// backend. Constructed once at startup and shared by handle.
pub struct ObjectStore {
    config: StacksConfig,
    storage: Arc<dyn StorageBackend>,
    shared: Option<Arc<dyn SharedCache>>,
    shards: Arc<dyn ShardLocator>,
    versions: VersionOracle,
    ids: Arc<KeyIdentityCache>,
    rows: PrimaryDataCache,
    delete_log: DeleteLog,
    guard: AccessGuard,
    handlers: HashMap<RecordType, Arc<dyn BatchObject>>,
}

impl ObjectStore {
    pub fn builder(storage: Arc<dyn StorageBackend>) -> ObjectStoreBuilder {
        ObjectStoreBuilder::new(storage)
    }

    pub fn config(&self) -> &StacksConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn shared_cache(&self) -> Option<&Arc<dyn SharedCache>> {
        self.shared.as_ref()
    }

    pub fn shards(&self) -> &Arc<dyn ShardLocator> {
        &self.shards
    }

    pub fn versions(&self) -> &VersionOracle {
        &self.versions
    }

    pub fn ids(&self) -> &KeyIdentityCache {
        &self.ids
    }

    pub fn rows(&self) -> &PrimaryDataCache {
        &self.rows
    }

    pub fn delete_log(&self) -> &DeleteLog {
        &self.delete_log
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub(crate) fn handler(&self, record_type: RecordType) -> Option<&Arc<dyn BatchObject>> {
        self.handlers.get(&record_type)
    }

    /// Open a unit of work on a library.
    pub async fn begin<'s>(
        &'s self,
        ctx: &'s RequestContext,
        library_id: LibraryId,
    ) -> StacksResult<UnitOfWork<'s>> {
        UnitOfWork::begin(self, ctx, library_id).await
    }

    /// Reset both process-local caches.
    pub fn clear_caches(&self) -> StacksResult<()> {
        self.ids.clear_all()?;
        self.rows.clear_all()?;
        info!("cleared object caches");
        Ok(())
    }

    /// Canonical URI of a record: `{base}/{users|groups}/{library}/{plural}/{key}`.
    pub async fn record_uri(
        &self,
        library_id: LibraryId,
        record_type: RecordType,
        key: &RecordKey,
    ) -> StacksResult<String> {
        let library = self.versions.library(library_id).await?;
        Ok(format!(
            "{}/{}/{}/{}/{}",
            self.config.uri_base,
            library.library_type()?.uri_segment(),
            library_id,
            record_type.plural(),
            key
        ))
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct ObjectStoreBuilder {
    storage: Arc<dyn StorageBackend>,
    config: StacksConfig,
    shared: Option<Option<Arc<dyn SharedCache>>>,
    shards: Option<Arc<dyn ShardLocator>>,
    handlers: Vec<Arc<dyn BatchObject>>,
}

impl ObjectStoreBuilder {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            config: StacksConfig::default(),
            shared: None,
            shards: None,
            handlers: Vec::new(),
        }
    }

    pub fn config(mut self, config: StacksConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this shared cache instead of the one named in the config.
    /// `None` disables the shared cache.
    pub fn shared_cache(mut self, shared: Option<Arc<dyn SharedCache>>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Route libraries with this locator instead of the library directory.
    pub fn shard_locator(mut self, shards: Arc<dyn ShardLocator>) -> Self {
        self.shards = Some(shards);
        self
    }

    /// Register an extra batch handler, replacing a built-in one for the
    /// same record type.
    pub fn handler(mut self, handler: Arc<dyn BatchObject>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> StacksResult<ObjectStore> {
        self.config.validate()?;

        let shared = match self.shared {
            Some(explicit) => explicit,
            None => shared_cache_from_config(&self.config.shared_cache)?,
        };
        let shards = self
            .shards
            .unwrap_or_else(|| Arc::new(DirectoryShardLocator::new(self.storage.clone())));

        let loader = Arc::new(CacheLoader::new(
            self.storage.clone(),
            shared.clone(),
            shards.clone(),
            self.config.cache_format_version,
        ));

        let mut handlers: HashMap<RecordType, Arc<dyn BatchObject>> = objects::default_handlers()
            .into_iter()
            .map(|h| (h.record_type(), h))
            .collect();
        for handler in self.handlers {
            handlers.insert(handler.record_type(), handler);
        }

        let ids = Arc::new(KeyIdentityCache::new(loader.clone()));

        info!(
            cache_format_version = self.config.cache_format_version,
            shared_cache = shared.is_some(),
            "object store ready"
        );

        Ok(ObjectStore {
            versions: VersionOracle::new(self.storage.clone()),
            ids: ids.clone(),
            rows: PrimaryDataCache::new(loader, ids),
            delete_log: DeleteLog::new(self.storage.clone(), shards.clone()),
            guard: AccessGuard::new(self.storage.clone()),
            config: self.config,
            storage: self.storage,
            shared,
            shards,
            handlers,
        })
    }
}

fn shared_cache_from_config(
    config: &SharedCacheConfig,
) -> StacksResult<Option<Arc<dyn SharedCache>>> {
    let shared: Arc<dyn SharedCache> = match config {
        SharedCacheConfig::Disabled => return Ok(None),
        SharedCacheConfig::InMemory => Arc::new(InMemorySharedCache::new()),
        SharedCacheConfig::Lmdb { path, max_size_mb } => {
            Arc::new(LmdbSharedCache::new(path, *max_size_mb)?)
        }
    };
    Ok(Some(shared))
}
