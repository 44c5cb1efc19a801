//! Delete-log entries consumed by syncing clients.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{LibraryId, Timestamp, Version};
use crate::record_type::RecordType;

/// Type column of a delete-log row.
///
/// Most rows are keyed by a record type; tags additionally get a row under
/// the legacy `tagName` type, keyed by the tag's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeleteLogType {
    Record(RecordType),
    TagName,
}

impl DeleteLogType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DeleteLogType::Record(record_type) => record_type.name(),
            DeleteLogType::TagName => "tagName",
        }
    }

    /// Delete-log types a deletion of `record_type` writes to.
    pub fn for_record(record_type: RecordType) -> Vec<DeleteLogType> {
        let mut types = vec![DeleteLogType::Record(record_type)];
        if record_type.info().legacy_delete_log.is_some() {
            types.push(DeleteLogType::TagName);
        }
        types
    }
}

impl fmt::Display for DeleteLogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A deletion marker. Retained indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub library_id: LibraryId,
    pub log_type: DeleteLogType,
    /// Record key, or tag name for `TagName` entries.
    pub key: String,
    pub version: Version,
    pub timestamp: Timestamp,
}

impl Tombstone {
    /// Merge a newer write into this tombstone. Never moves backwards.
    pub fn refresh(&mut self, version: Version, timestamp: Timestamp) -> bool {
        if version > self.version {
            self.version = version;
            self.timestamp = timestamp;
            true
        } else {
            false
        }
    }
}

/// Lower bound for a delete-log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedSince {
    /// Entries with a version strictly greater than this one.
    Version(Version),
    /// Legacy mode: entries stamped at or after this time.
    Timestamp(Timestamp),
}

impl DeletedSince {
    pub fn includes(&self, tombstone: &Tombstone) -> bool {
        match self {
            DeletedSince::Version(v) => tombstone.version > *v,
            DeletedSince::Timestamp(t) => tombstone.timestamp >= *t,
        }
    }
}
