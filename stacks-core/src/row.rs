//! Primary-data rows: the field snapshot cached per record.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{StacksError, StacksResult};
use crate::identity::{LibraryId, RecordId, RecordKey, Timestamp, Version};
use crate::record_type::RecordType;

/// Storage format for `dateAdded` / `dateModified`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp the way rows store it.
pub fn format_datetime(ts: &Timestamp) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

/// Field-name to value map holding exactly the primary fields of one record.
///
/// Identity (`id`, `libraryID`, `key`) is fixed at construction and mirrored
/// in typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryDataRow {
    record_type: RecordType,
    library_id: LibraryId,
    id: RecordId,
    key: RecordKey,
    fields: BTreeMap<String, Value>,
}

impl PrimaryDataRow {
    /// Create a row with identity fields set and every other primary field null.
    pub fn new(
        record_type: RecordType,
        library_id: LibraryId,
        id: RecordId,
        key: RecordKey,
        version: Version,
    ) -> Self {
        let mut fields: BTreeMap<String, Value> = record_type
            .info()
            .primary_fields
            .iter()
            .map(|f| (f.to_string(), Value::Null))
            .collect();
        fields.insert("id".to_string(), Value::from(id.get()));
        fields.insert("libraryID".to_string(), Value::from(library_id.get()));
        fields.insert("key".to_string(), Value::from(key.as_str()));
        fields.insert("version".to_string(), Value::from(version.get()));
        Self {
            record_type,
            library_id,
            id,
            key,
            fields,
        }
    }

    /// Build a row from a loaded field map, checking it against the declared schema.
    pub fn from_fields(
        record_type: RecordType,
        fields: BTreeMap<String, Value>,
    ) -> StacksResult<Self> {
        check_field_set(record_type, fields.keys().map(String::as_str))?;

        let id = positive_field(record_type, &fields, "id").map(RecordId::new)?;
        let library_id = positive_field(record_type, &fields, "libraryID").map(LibraryId::new)?;
        let key = fields
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| StacksError::schema_mismatch(record_type, "key is not a string"))?;
        let key = RecordKey::parse(record_type, key)?;

        Ok(Self {
            record_type,
            library_id: library_id?,
            id: id?,
            key,
            fields,
        })
    }

    /// Check the field set against the declared primary fields.
    pub fn validate(&self) -> StacksResult<()> {
        check_field_set(self.record_type, self.fields.keys().map(String::as_str))
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn library_id(&self) -> LibraryId {
        self.library_id
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn version(&self) -> Version {
        Version(self.fields.get("version").and_then(Value::as_u64).unwrap_or(0))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// `parentID` as a record id, if set.
    pub fn parent_id(&self) -> Option<RecordId> {
        self.fields
            .get("parentID")
            .and_then(Value::as_u64)
            .and_then(|raw| RecordId::new(raw).ok())
    }

    /// Set a non-identity primary field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> StacksResult<()> {
        if matches!(field, "id" | "libraryID" | "key") {
            return Err(StacksError::schema_mismatch(
                self.record_type,
                format!("{} is immutable", field),
            ));
        }
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(StacksError::schema_mismatch(
                self.record_type,
                format!("unknown field {}", field),
            )),
        }
    }

    pub fn set_version(&mut self, version: Version) {
        self.fields
            .insert("version".to_string(), Value::from(version.get()));
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }
}

impl Serialize for PrimaryDataRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

fn check_field_set<'a>(
    record_type: RecordType,
    present: impl Iterator<Item = &'a str>,
) -> StacksResult<()> {
    let declared = record_type.info().primary_fields;
    let mut count = 0usize;
    for field in present {
        if !declared.contains(&field) {
            return Err(StacksError::schema_mismatch(
                record_type,
                format!("unknown field {}", field),
            ));
        }
        count += 1;
    }
    if count != declared.len() {
        return Err(StacksError::schema_mismatch(
            record_type,
            format!("expected {} fields, got {}", declared.len(), count),
        ));
    }
    Ok(())
}

fn positive_field(
    record_type: RecordType,
    fields: &BTreeMap<String, Value>,
    name: &str,
) -> StacksResult<u64> {
    fields
        .get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| StacksError::schema_mismatch(record_type, format!("{} is not numeric", name)))
}

// ============================================================================
// TESTS
// ============================================================================
