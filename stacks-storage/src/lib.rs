//! Stacks Storage - Caches, Delete Log and Batch Writes
//!
//! Object-identity and primary-data caching for multi-tenant bibliographic
//! libraries. The [`ObjectStore`] ties the caches to a [`StorageBackend`]:
//! every mutation runs in a [`UnitOfWork`] whose cache writes are published
//! only after its storage transaction commits.

pub mod access;
pub mod backend;
pub mod batch;
pub mod cache;
pub mod delete;
pub mod delete_log;
pub mod memory;
pub mod objects;
pub mod shard;
pub mod store;
pub mod sync;
pub mod unit_of_work;
pub mod version;

pub use access::{AccessGuard, EditTarget, RequestContext, IMPORTED_LINK_MODES};
pub use backend::{StorageBackend, StorageTransaction};
pub use batch::{BatchObject, ObjectOutcome, SubmittedBatch};
pub use cache::{
    CacheLoader, CacheStage, CacheStats, InMemorySharedCache, KeyIdentityCache, LmdbCacheError,
    LmdbSharedCache, PrimaryDataCache, SharedCache, SharedCacheKey, SharedEntryKind, StagedOp,
};
pub use delete_log::DeleteLog;
pub use memory::InMemoryStorage;
pub use objects::{
    Collection, CollectionField, Collections, Item, ItemField, ItemKind, Items, LinkMode, Search,
    SearchField, Searches,
};
pub use shard::{DirectoryShardLocator, ShardLocator, StaticShardLocator};
pub use store::{ObjectStore, ObjectStoreBuilder};
pub use sync::LibraryUpdates;
pub use unit_of_work::UnitOfWork;
pub use version::VersionOracle;
