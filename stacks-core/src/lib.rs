//! Stacks Core - Record Types
//!
//! Pure data structures shared by the cache and batch layers: identities,
//! the record-type registry, primary-data rows, tombstones, batch reports,
//! errors and configuration. No I/O lives here.

pub mod batch;
pub mod config;
pub mod error;
pub mod identity;
pub mod library;
pub mod record_type;
pub mod row;
pub mod tombstone;

pub use batch::{BatchReport, BatchResponse, BatchResult, ErrorDescriptor, FailedEntry};
pub use config::{
    MaxWriteLimits, SharedCacheConfig, StacksConfig, DEFAULT_CACHE_FORMAT_VERSION,
    MERGE_TRACKING_PREDICATE,
};
pub use error::{ConfigError, ErrorCode, StacksError, StacksResult, StorageError, ValidationError};
pub use identity::{
    LibraryId, RecordId, RecordKey, ShardId, Timestamp, UserId, Version, KEY_ALPHABET, KEY_LENGTH,
};
pub use library::{Actor, LibraryRecord, LibraryType, Membership};
pub use record_type::{KeyFormat, RecordType, RecordTypeInfo};
pub use row::{format_datetime, PrimaryDataRow, DATETIME_FORMAT};
pub use tombstone::{DeleteLogType, DeletedSince, Tombstone};
