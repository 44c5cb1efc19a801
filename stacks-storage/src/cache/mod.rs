//! Caching layer.
//!
//! Two process-local caches sit in front of storage:
//!
//! ```text
//! KeyIdentityCache / PrimaryDataCache   (per library and record type)
//!          │ miss
//!          ▼
//!     CacheLoader ──► SharedCache (version-stamped keys)
//!          │ miss
//!          ▼
//!     StorageBackend (routed by ShardLocator)
//! ```
//!
//! Writes reach the caches only through a [`CacheStage`], applied after the
//! owning storage transaction commits.

mod identity;
mod lmdb_backend;
mod loader;
mod memory;
mod partition;
mod primary_data;
mod shared_key;
mod stage;
mod traits;

pub use identity::KeyIdentityCache;
pub use lmdb_backend::{LmdbCacheError, LmdbSharedCache};
pub use loader::CacheLoader;
pub use memory::InMemorySharedCache;
pub use primary_data::PrimaryDataCache;
pub use shared_key::{SharedCacheKey, SharedEntryKind};
pub use stage::{CacheStage, StagedOp};
pub use traits::{CacheStats, SharedCache};
