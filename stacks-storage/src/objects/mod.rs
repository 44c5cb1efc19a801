//! Batch-capable record types.
//!
//! Each type is a typed entity with an explicit field enum. The field enum's
//! dispatch table maps every field to its primary-data column and reads its
//! value from the entity, so saving is one pass over `Field::ALL`.

mod collection;
mod item;
mod search;

pub use collection::{Collection, CollectionField, Collections};
pub use item::{Item, ItemField, Items, ItemKind, LinkMode};
pub use search::{Search, SearchField, Searches};

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use stacks_core::{
    format_datetime, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksError, StacksResult,
    ValidationError, DATETIME_FORMAT,
};

use crate::batch::BatchObject;
use crate::unit_of_work::UnitOfWork;

/// Longest accepted collection or search name, in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// The built-in batch handlers.
pub fn default_handlers() -> Vec<Arc<dyn BatchObject>> {
    vec![Arc::new(Collections), Arc::new(Searches), Arc::new(Items)]
}

/// Parent named by a submitted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// `false`: move to the top level.
    TopLevel,
    Key(RecordKey),
}

// ============================================================================
// PROPERTY READERS
// ============================================================================

fn invalid(field: &str, value: &Value, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// The `{type}Key` property, parsed for the type.
pub(crate) fn key_property(
    object: &Map<String, Value>,
    record_type: RecordType,
) -> StacksResult<Option<RecordKey>> {
    let property = record_type.key_property();
    match object.get(&property) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => Ok(Some(RecordKey::parse(record_type, raw)?)),
        Some(other) => Err(invalid(&property, other, "must be a string").into()),
    }
}

/// A string property. `null` counts as absent.
pub(crate) fn string_property<'a>(
    object: &'a Map<String, Value>,
    name: &str,
) -> StacksResult<Option<&'a str>> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(invalid(name, other, "must be a string").into()),
    }
}

/// A parent reference under the first of `names` present: a key, or `false`
/// (or an empty string) for the top level.
pub(crate) fn parent_property(
    object: &Map<String, Value>,
    names: &[&str],
    record_type: RecordType,
) -> StacksResult<Option<ParentRef>> {
    let Some((name, value)) = names
        .iter()
        .find_map(|name| object.get(*name).map(|value| (*name, value)))
    else {
        return Ok(None);
    };
    match value {
        Value::Bool(false) | Value::Null => Ok(Some(ParentRef::TopLevel)),
        Value::String(raw) if raw.is_empty() => Ok(Some(ParentRef::TopLevel)),
        Value::String(raw) => Ok(Some(ParentRef::Key(RecordKey::parse(record_type, raw)?))),
        other => Err(invalid(name, other, "must be a key or false").into()),
    }
}

/// A `YYYY-MM-DD hh:mm:ss` property.
pub(crate) fn datetime_property(
    object: &Map<String, Value>,
    name: &str,
) -> StacksResult<Option<String>> {
    let Some(raw) = string_property(object, name)? else {
        return Ok(None);
    };
    check_datetime(name, raw)?;
    Ok(Some(raw.to_string()))
}

pub(crate) fn check_datetime(field: &str, raw: &str) -> Result<(), ValidationError> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map(|_| ())
        .map_err(|_| invalid(field, &Value::from(raw), "expected YYYY-MM-DD hh:mm:ss"))
}

pub(crate) fn check_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(invalid(field, &Value::from(name), "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(invalid(
            field,
            &Value::from(name),
            &format!("must be at most {} characters", MAX_NAME_LENGTH),
        ));
    }
    Ok(())
}

// ============================================================================
// SAVE HELPERS
// ============================================================================

/// Id and key for a record about to be written. New records get a fresh id
/// and, unless the client supplied one, a generated key.
pub(crate) async fn assign_identity(
    uow: &mut UnitOfWork<'_>,
    record_type: RecordType,
    id: Option<RecordId>,
    key: Option<&RecordKey>,
) -> StacksResult<(RecordId, RecordKey)> {
    match (id, key) {
        (Some(id), Some(key)) => Ok((id, key.clone())),
        (None, Some(key)) => Ok((uow.allocate_id(record_type).await?, key.clone())),
        (None, None) => {
            let key = uow.generate_key(record_type).await?;
            Ok((uow.allocate_id(record_type).await?, key))
        }
        (Some(id), None) => Err(StacksError::invalid_state(format!(
            "{} {} has an id but no key",
            record_type, id
        ))),
    }
}

/// A row stamped with the unit's version. `dateAdded` defaults to the
/// transaction time; `dateModified` is the transaction time unless given.
pub(crate) async fn stamped_row(
    uow: &mut UnitOfWork<'_>,
    record_type: RecordType,
    id: RecordId,
    key: RecordKey,
    fields: impl IntoIterator<Item = (&'static str, Value)>,
    date_modified: Option<&str>,
) -> StacksResult<PrimaryDataRow> {
    let version = uow.updated_version().await?;
    let now = format_datetime(&uow.timestamp());
    let mut row = PrimaryDataRow::new(record_type, uow.library_id(), id, key, version);
    for (column, value) in fields {
        row.set(column, value)?;
    }
    if matches!(row.get("dateAdded"), None | Some(Value::Null)) {
        row.set("dateAdded", now.clone())?;
    }
    row.set("dateModified", date_modified.map(str::to_string).unwrap_or(now))?;
    Ok(row)
}
