//! Closed set of record types and their static descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

// ============================================================================
// KEY FORMAT
// ============================================================================

/// Shape of the keys a record type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyFormat {
    /// Eight characters from the generated-key alphabet.
    Token,
    /// 32 lowercase hex characters derived from the record content.
    ContentHash,
}

// ============================================================================
// RECORD TYPE
// ============================================================================

/// Record types stored per library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Creator,
    Item,
    Collection,
    Search,
    Tag,
    Relation,
}

/// Static descriptor for a record type.
#[derive(Debug)]
pub struct RecordTypeInfo {
    /// Singular name, used in cache keys and tombstones.
    pub name: &'static str,
    pub plural: &'static str,
    pub label: &'static str,
    pub plural_label: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub key_format: KeyFormat,
    /// Exact field set of a primary-data row.
    pub primary_fields: &'static [&'static str],
    /// Extra delete-log type written alongside this type's tombstones.
    pub legacy_delete_log: Option<&'static str>,
}

static CREATOR: RecordTypeInfo = RecordTypeInfo {
    name: "creator",
    plural: "creators",
    label: "Creator",
    plural_label: "Creators",
    table: "creators",
    id_column: "creatorID",
    key_format: KeyFormat::Token,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "firstName",
        "lastName",
        "fieldMode",
        "dateAdded",
        "dateModified",
    ],
    legacy_delete_log: None,
};

static ITEM: RecordTypeInfo = RecordTypeInfo {
    name: "item",
    plural: "items",
    label: "Item",
    plural_label: "Items",
    table: "items",
    id_column: "itemID",
    key_format: KeyFormat::Token,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "itemType",
        "parentID",
        "linkMode",
        "dateAdded",
        "dateModified",
    ],
    legacy_delete_log: None,
};

static COLLECTION: RecordTypeInfo = RecordTypeInfo {
    name: "collection",
    plural: "collections",
    label: "Collection",
    plural_label: "Collections",
    table: "collections",
    id_column: "collectionID",
    key_format: KeyFormat::Token,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "name",
        "parentID",
        "dateAdded",
        "dateModified",
    ],
    legacy_delete_log: None,
};

static SEARCH: RecordTypeInfo = RecordTypeInfo {
    name: "search",
    plural: "searches",
    label: "Search",
    plural_label: "Searches",
    table: "savedSearches",
    id_column: "searchID",
    key_format: KeyFormat::Token,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "name",
        "dateAdded",
        "dateModified",
    ],
    legacy_delete_log: None,
};

static TAG: RecordTypeInfo = RecordTypeInfo {
    name: "tag",
    plural: "tags",
    label: "Tag",
    plural_label: "Tags",
    table: "tags",
    id_column: "tagID",
    key_format: KeyFormat::Token,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "name",
        "type",
        "dateAdded",
        "dateModified",
    ],
    legacy_delete_log: Some("tagName"),
};

static RELATION: RecordTypeInfo = RecordTypeInfo {
    name: "relation",
    plural: "relations",
    label: "Relation",
    plural_label: "Relations",
    table: "relations",
    id_column: "relationID",
    key_format: KeyFormat::ContentHash,
    primary_fields: &[
        "id",
        "libraryID",
        "key",
        "version",
        "subject",
        "predicate",
        "object",
    ],
    legacy_delete_log: None,
};

impl RecordType {
    pub const ALL: [RecordType; 6] = [
        RecordType::Creator,
        RecordType::Item,
        RecordType::Collection,
        RecordType::Search,
        RecordType::Tag,
        RecordType::Relation,
    ];

    /// Static descriptor for this type.
    pub fn info(&self) -> &'static RecordTypeInfo {
        match self {
            RecordType::Creator => &CREATOR,
            RecordType::Item => &ITEM,
            RecordType::Collection => &COLLECTION,
            RecordType::Search => &SEARCH,
            RecordType::Tag => &TAG,
            RecordType::Relation => &RELATION,
        }
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn plural(&self) -> &'static str {
        self.info().plural
    }

    /// Name of the key property in submitted JSON, e.g. `collectionKey`.
    pub fn key_property(&self) -> String {
        format!("{}Key", self.name())
    }

    /// Check a raw key against this type's key format.
    pub fn validate_key(&self, raw: &str) -> Result<(), ValidationError> {
        if self.info().key_format.matches(raw) {
            Ok(())
        } else {
            Err(ValidationError::InvalidKey {
                record_type: *self,
                key: raw.to_string(),
            })
        }
    }

    /// Parse from a singular or plural type name.
    pub fn from_name(s: &str) -> Result<Self, ValidationError> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.name() == s || t.plural() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "recordType".to_string(),
                value: s.to_string(),
                reason: "unknown record type".to_string(),
            })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

// ============================================================================
// TESTS
// ============================================================================
