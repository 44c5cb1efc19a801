//! Collections: named, nestable groupings of items.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use serde_json::{Map, Value};
use stacks_core::{
    LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksError, StacksResult,
    ValidationError, Version,
};
use tracing::debug;

use super::{
    assign_identity, check_datetime, check_name, datetime_property, key_property,
    parent_property, stamped_row, string_property, ParentRef,
};
use crate::access::EditTarget;
use crate::batch::{BatchObject, ObjectOutcome};
use crate::unit_of_work::UnitOfWork;

/// Mutable fields of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectionField {
    Name,
    Parent,
    DateAdded,
    DateModified,
}

impl CollectionField {
    pub const ALL: [CollectionField; 4] = [
        CollectionField::Name,
        CollectionField::Parent,
        CollectionField::DateAdded,
        CollectionField::DateModified,
    ];

    /// Primary-data column holding this field.
    pub fn column(&self) -> &'static str {
        match self {
            CollectionField::Name => "name",
            CollectionField::Parent => "parentID",
            CollectionField::DateAdded => "dateAdded",
            CollectionField::DateModified => "dateModified",
        }
    }

    fn value(&self, collection: &Collection) -> Value {
        match self {
            CollectionField::Name => collection.name.clone().map_or(Value::Null, Value::from),
            CollectionField::Parent => collection
                .parent_id
                .map_or(Value::Null, |id| Value::from(id.get())),
            CollectionField::DateAdded => collection
                .date_added
                .clone()
                .map_or(Value::Null, Value::from),
            CollectionField::DateModified => collection
                .date_modified
                .clone()
                .map_or(Value::Null, Value::from),
        }
    }
}

/// A collection being created or edited.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    library_id: LibraryId,
    id: Option<RecordId>,
    key: Option<RecordKey>,
    version: Version,
    name: Option<String>,
    parent_id: Option<RecordId>,
    date_added: Option<String>,
    date_modified: Option<String>,
    changed: BTreeSet<CollectionField>,
}

impl Collection {
    /// A new collection; its key is generated on save.
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            id: None,
            key: None,
            version: Version::ZERO,
            name: None,
            parent_id: None,
            date_added: None,
            date_modified: None,
            changed: BTreeSet::new(),
        }
    }

    /// A new collection with a client-chosen key.
    pub fn with_key(library_id: LibraryId, key: RecordKey) -> Self {
        Self {
            key: Some(key),
            ..Self::new(library_id)
        }
    }

    pub fn from_row(row: &PrimaryDataRow) -> StacksResult<Self> {
        if row.record_type() != RecordType::Collection {
            return Err(StacksError::schema_mismatch(
                row.record_type(),
                "not a collection row",
            ));
        }
        Ok(Self {
            library_id: row.library_id(),
            id: Some(row.id()),
            key: Some(row.key().clone()),
            version: row.version(),
            name: row.get_str("name").map(str::to_string),
            parent_id: row.parent_id(),
            date_added: row.get_str("dateAdded").map(str::to_string),
            date_modified: row.get_str("dateModified").map(str::to_string),
            changed: BTreeSet::new(),
        })
    }

    pub async fn load(uow: &mut UnitOfWork<'_>, key: &RecordKey) -> StacksResult<Option<Self>> {
        uow.load(RecordType::Collection, key)
            .await?
            .map(|row| Self::from_row(&row))
            .transpose()
    }

    pub async fn load_by_id(uow: &mut UnitOfWork<'_>, id: RecordId) -> StacksResult<Option<Self>> {
        uow.load_by_id(RecordType::Collection, id)
            .await?
            .map(|row| Self::from_row(&row))
            .transpose()
    }

    pub fn library_id(&self) -> LibraryId {
        self.library_id
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn key(&self) -> Option<&RecordKey> {
        self.key.as_ref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent_id(&self) -> Option<RecordId> {
        self.parent_id
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn has_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_fields(&self) -> impl Iterator<Item = CollectionField> + '_ {
        self.changed.iter().copied()
    }

    pub fn edit_target(&self) -> EditTarget {
        EditTarget::new(self.library_id, RecordType::Collection)
    }

    // ========================================================================
    // SETTERS
    // ========================================================================

    /// Returns whether the value changed.
    pub fn set_name(&mut self, name: &str) -> StacksResult<bool> {
        check_name("name", name)?;
        if self.name.as_deref() == Some(name) {
            return Ok(false);
        }
        self.name = Some(name.to_string());
        self.changed.insert(CollectionField::Name);
        Ok(true)
    }

    pub fn set_date_added(&mut self, date_added: &str) -> StacksResult<bool> {
        check_datetime("dateAdded", date_added)?;
        if self.date_added.as_deref() == Some(date_added) {
            return Ok(false);
        }
        self.date_added = Some(date_added.to_string());
        self.changed.insert(CollectionField::DateAdded);
        Ok(true)
    }

    pub fn set_date_modified(&mut self, date_modified: &str) -> StacksResult<bool> {
        check_datetime("dateModified", date_modified)?;
        if self.date_modified.as_deref() == Some(date_modified) {
            return Ok(false);
        }
        self.date_modified = Some(date_modified.to_string());
        self.changed.insert(CollectionField::DateModified);
        Ok(true)
    }

    /// Move under the collection with `parent_key`, or to the top level.
    pub async fn set_parent_key(
        &mut self,
        uow: &mut UnitOfWork<'_>,
        parent_key: Option<&RecordKey>,
    ) -> StacksResult<bool> {
        let parent_id = match parent_key {
            None => None,
            Some(parent_key) => Some(
                uow.resolve(RecordType::Collection, parent_key)
                    .await?
                    .ok_or_else(|| ValidationError::InvalidReference {
                        field: "parentCollection".to_string(),
                        reason: format!("parent collection {} doesn't exist", parent_key),
                    })?,
            ),
        };
        self.set_parent(uow, parent_id).await
    }

    /// Move under the collection `parent_id`, or to the top level.
    ///
    /// The parent may be neither this collection nor one of its descendants.
    pub async fn set_parent(
        &mut self,
        uow: &mut UnitOfWork<'_>,
        parent_id: Option<RecordId>,
    ) -> StacksResult<bool> {
        if parent_id == self.parent_id {
            debug!(key = ?self.key.as_ref().map(RecordKey::as_str), "parent collection has not changed");
            return Ok(false);
        }
        if let Some(parent_id) = parent_id {
            if self.id == Some(parent_id) {
                return Err(ValidationError::InvalidReference {
                    field: "parentCollection".to_string(),
                    reason: "cannot move a collection into itself".to_string(),
                }
                .into());
            }
            if self.has_descendant(uow, parent_id).await? {
                return Err(ValidationError::InvalidReference {
                    field: "parentCollection".to_string(),
                    reason: "cannot move a collection into one of its own descendants".to_string(),
                }
                .into());
            }
        }
        self.parent_id = parent_id;
        self.changed.insert(CollectionField::Parent);
        Ok(true)
    }

    /// Whether `candidate` sits somewhere below this collection.
    pub async fn has_descendant(
        &self,
        uow: &mut UnitOfWork<'_>,
        candidate: RecordId,
    ) -> StacksResult<bool> {
        let Some(own_id) = self.id else {
            return Ok(false);
        };
        let mut visited = HashSet::new();
        let mut current = candidate;
        while visited.insert(current) {
            let Some(row) = uow.load_by_id(RecordType::Collection, current).await? else {
                return Ok(false);
            };
            match row.parent_id() {
                Some(parent) if parent == own_id => return Ok(true),
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
        Ok(false)
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    /// Write the collection if anything changed. Returns whether it was
    /// written. Access is checked by the caller.
    pub async fn save(&mut self, uow: &mut UnitOfWork<'_>) -> StacksResult<bool> {
        if self.library_id != uow.library_id() {
            return Err(StacksError::invalid_state(format!(
                "collection in library {} saved through library {}",
                self.library_id,
                uow.library_id()
            )));
        }
        if self.name.is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }
        if !self.has_changed() {
            debug!(id = ?self.id.map(|id| id.get()), "collection has not changed");
            return Ok(false);
        }

        let (id, key) =
            assign_identity(uow, RecordType::Collection, self.id, self.key.as_ref()).await?;
        let fields: Vec<(&'static str, Value)> = CollectionField::ALL
            .iter()
            .filter(|field| **field != CollectionField::DateModified)
            .map(|field| (field.column(), field.value(self)))
            .collect();
        let date_modified = self
            .changed
            .contains(&CollectionField::DateModified)
            .then(|| self.date_modified.clone())
            .flatten();
        let row = stamped_row(
            uow,
            RecordType::Collection,
            id,
            key,
            fields,
            date_modified.as_deref(),
        )
        .await?;
        debug!(id = %id, key = %row.key(), "saving collection");
        uow.write_row(row.clone()).await?;

        *self = Self::from_row(&row)?;
        Ok(true)
    }
}

// ============================================================================
// BATCH HANDLER
// ============================================================================

/// Batch handler for collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Collections;

#[async_trait]
impl BatchObject for Collections {
    fn record_type(&self) -> RecordType {
        RecordType::Collection
    }

    fn properties(&self) -> &'static [&'static str] {
        &[
            "collectionKey",
            "name",
            "parentCollection",
            "parentKey",
            "dateAdded",
            "dateModified",
        ]
    }

    fn accepts_bare_object(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        uow: &mut UnitOfWork<'_>,
        object: &Map<String, Value>,
        _parent: Option<&RecordKey>,
    ) -> StacksResult<ObjectOutcome> {
        let key = key_property(object, RecordType::Collection)?;
        let mut collection = match &key {
            Some(key) => match Collection::load(uow, key).await? {
                Some(existing) => existing,
                None => Collection::with_key(uow.library_id(), key.clone()),
            },
            None => Collection::new(uow.library_id()),
        };
        uow.edit_check(&collection.edit_target()).await?;

        if let Some(name) = string_property(object, "name")? {
            collection.set_name(name)?;
        }
        match parent_property(
            object,
            &["parentCollection", "parentKey"],
            RecordType::Collection,
        )? {
            Some(ParentRef::TopLevel) => {
                collection.set_parent(uow, None).await?;
            }
            Some(ParentRef::Key(parent_key)) => {
                collection.set_parent_key(uow, Some(&parent_key)).await?;
            }
            None => {}
        }
        if let Some(date_added) = datetime_property(object, "dateAdded")? {
            collection.set_date_added(&date_added)?;
        }
        if let Some(date_modified) = datetime_property(object, "dateModified")? {
            collection.set_date_modified(&date_modified)?;
        }

        let changed = collection.save(uow).await?;
        let key = collection
            .key()
            .cloned()
            .ok_or_else(|| StacksError::invalid_state("collection has no key after save"))?;
        Ok(if changed {
            ObjectOutcome::Changed(key)
        } else {
            ObjectOutcome::Unchanged(key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib() -> LibraryId {
        LibraryId::new(1).expect("positive id")
    }

    #[test]
    fn test_dispatch_table_covers_every_column() {
        let mut collection = Collection::new(lib());
        collection.set_name("Thesis").expect("valid name");
        for field in CollectionField::ALL {
            assert!(RecordType::Collection
                .info()
                .primary_fields
                .contains(&field.column()));
        }
        assert_eq!(CollectionField::Name.value(&collection), Value::from("Thesis"));
        assert_eq!(CollectionField::Parent.value(&collection), Value::Null);
    }

    #[test]
    fn test_setting_same_name_is_not_a_change() {
        let mut row = PrimaryDataRow::new(
            RecordType::Collection,
            lib(),
            RecordId::new(3).expect("id"),
            RecordKey::parse(RecordType::Collection, "CLLN2345").expect("key"),
            Version(4),
        );
        row.set("name", "Thesis").expect("set name");
        let mut collection = Collection::from_row(&row).expect("from_row");

        assert!(!collection.set_name("Thesis").expect("valid name"));
        assert!(!collection.has_changed());
        assert!(collection.set_name("Thesis II").expect("valid name"));
        assert_eq!(
            collection.changed_fields().collect::<Vec<_>>(),
            vec![CollectionField::Name]
        );
    }

    #[test]
    fn test_from_row_rejects_other_types() {
        let row = PrimaryDataRow::new(
            RecordType::Search,
            lib(),
            RecordId::new(3).expect("id"),
            RecordKey::parse(RecordType::Search, "SRCH2345").expect("key"),
            Version(1),
        );
        assert!(matches!(
            Collection::from_row(&row),
            Err(StacksError::SchemaMismatch { .. })
        ));
    }
}
