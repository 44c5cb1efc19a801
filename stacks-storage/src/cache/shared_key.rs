//! Version-stamped keys for the shared cache.
//!
//! A shared-cache key embeds the library's version at population time and the
//! cache format version, so a version bump makes every older entry for the
//! library unreachable without evicting anything.

use std::fmt;

use stacks_core::{LibraryId, RecordType, Version};

/// What a shared-cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedEntryKind {
    /// All (id, key) pairs of a type in a library.
    IdsByKey,
    /// All primary-data rows of a type in a library.
    Data,
}

impl SharedEntryKind {
    fn as_str(&self) -> &'static str {
        match self {
            SharedEntryKind::IdsByKey => "IDsByKey",
            SharedEntryKind::Data => "Data",
        }
    }

    fn from_suffix(s: &str) -> Option<(Self, &str)> {
        [SharedEntryKind::IdsByKey, SharedEntryKind::Data]
            .into_iter()
            .find_map(|kind| s.strip_suffix(kind.as_str()).map(|prefix| (kind, prefix)))
    }
}

/// Key of a shared-cache entry: `{type}{IDsByKey|Data}_{libraryID}_{version}_{format}`.
///
/// Only constructible with a library id and version, so an entry can never be
/// addressed without its library scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharedCacheKey {
    inner: SharedKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SharedKeyInner {
    record_type: RecordType,
    kind: SharedEntryKind,
    library_id: LibraryId,
    version: Version,
    format_version: u32,
}

impl SharedCacheKey {
    pub fn new(
        record_type: RecordType,
        kind: SharedEntryKind,
        library_id: LibraryId,
        version: Version,
        format_version: u32,
    ) -> Self {
        Self {
            inner: SharedKeyInner {
                record_type,
                kind,
                library_id,
                version,
                format_version,
            },
        }
    }

    pub fn ids_by_key(
        record_type: RecordType,
        library_id: LibraryId,
        version: Version,
        format_version: u32,
    ) -> Self {
        Self::new(
            record_type,
            SharedEntryKind::IdsByKey,
            library_id,
            version,
            format_version,
        )
    }

    pub fn data(
        record_type: RecordType,
        library_id: LibraryId,
        version: Version,
        format_version: u32,
    ) -> Self {
        Self::new(
            record_type,
            SharedEntryKind::Data,
            library_id,
            version,
            format_version,
        )
    }

    pub fn record_type(&self) -> RecordType {
        self.inner.record_type
    }

    pub fn kind(&self) -> SharedEntryKind {
        self.inner.kind
    }

    pub fn library_id(&self) -> LibraryId {
        self.inner.library_id
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    pub fn format_version(&self) -> u32 {
        self.inner.format_version
    }

    /// String form used as the backend key.
    pub fn encode(&self) -> String {
        format!(
            "{}{}_{}_{}_{}",
            self.inner.record_type.name(),
            self.inner.kind.as_str(),
            self.inner.library_id,
            self.inner.version,
            self.inner.format_version
        )
    }

    /// Parse an encoded key. Returns `None` for anything `encode` cannot produce.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split('_');
        let head = parts.next()?;
        let library_id = LibraryId::new(parts.next()?.parse().ok()?).ok()?;
        let version = Version(parts.next()?.parse().ok()?);
        let format_version = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let (kind, type_name) = SharedEntryKind::from_suffix(head)?;
        let record_type = RecordType::ALL
            .into_iter()
            .find(|t| t.name() == type_name)?;
        Some(Self::new(
            record_type,
            kind,
            library_id,
            version,
            format_version,
        ))
    }

    /// Prefix shared by every key of a library for one type and kind.
    pub fn library_prefix(record_type: RecordType, kind: SharedEntryKind, library_id: LibraryId) -> String {
        format!("{}{}_{}_", record_type.name(), kind.as_str(), library_id)
    }
}

impl fmt::Display for SharedCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    #[test]
    fn test_encode_format() {
        let key = SharedCacheKey::ids_by_key(RecordType::Collection, lib(7), Version(12), 3);
        assert_eq!(key.encode(), "collectionIDsByKey_7_12_3");
        let key = SharedCacheKey::data(RecordType::Search, lib(7), Version(12), 3);
        assert_eq!(key.to_string(), "searchData_7_12_3");
    }

    #[test]
    fn test_decode_round_trip() {
        for record_type in RecordType::ALL {
            for kind in [SharedEntryKind::IdsByKey, SharedEntryKind::Data] {
                let key = SharedCacheKey::new(record_type, kind, lib(42), Version(9), 3);
                assert_eq!(SharedCacheKey::decode(&key.encode()), Some(key));
            }
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SharedCacheKey::decode("collectionIDsByKey_7_12").is_none());
        assert!(SharedCacheKey::decode("noteData_7_12_3").is_none());
        assert!(SharedCacheKey::decode("collectionData_0_12_3").is_none());
        assert!(SharedCacheKey::decode("collectionData_7_12_3_4").is_none());
    }

    #[test]
    fn test_version_bump_changes_key() {
        let old = SharedCacheKey::data(RecordType::Item, lib(1), Version(4), 3);
        let new = SharedCacheKey::data(RecordType::Item, lib(1), Version(5), 3);
        assert_ne!(old.encode(), new.encode());
        let prefix = SharedCacheKey::library_prefix(RecordType::Item, SharedEntryKind::Data, lib(1));
        assert!(old.encode().starts_with(&prefix));
        assert!(new.encode().starts_with(&prefix));
    }
}
