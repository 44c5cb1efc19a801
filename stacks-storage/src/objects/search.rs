//! Saved searches.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Map, Value};
use stacks_core::{
    LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksError, StacksResult,
    ValidationError, Version,
};
use tracing::debug;

use super::{
    assign_identity, check_datetime, check_name, datetime_property, key_property, stamped_row,
    string_property,
};
use crate::access::EditTarget;
use crate::batch::{BatchObject, ObjectOutcome};
use crate::unit_of_work::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SearchField {
    Name,
    DateAdded,
    DateModified,
}

impl SearchField {
    pub const ALL: [SearchField; 3] = [
        SearchField::Name,
        SearchField::DateAdded,
        SearchField::DateModified,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::DateAdded => "dateAdded",
            SearchField::DateModified => "dateModified",
        }
    }

    fn value(&self, search: &Search) -> Value {
        let slot = match self {
            SearchField::Name => &search.name,
            SearchField::DateAdded => &search.date_added,
            SearchField::DateModified => &search.date_modified,
        };
        slot.clone().map_or(Value::Null, Value::from)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    library_id: LibraryId,
    id: Option<RecordId>,
    key: Option<RecordKey>,
    version: Version,
    name: Option<String>,
    date_added: Option<String>,
    date_modified: Option<String>,
    changed: BTreeSet<SearchField>,
}

impl Search {
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            id: None,
            key: None,
            version: Version::ZERO,
            name: None,
            date_added: None,
            date_modified: None,
            changed: BTreeSet::new(),
        }
    }

    pub fn with_key(library_id: LibraryId, key: RecordKey) -> Self {
        Self {
            key: Some(key),
            ..Self::new(library_id)
        }
    }

    pub fn from_row(row: &PrimaryDataRow) -> StacksResult<Self> {
        if row.record_type() != RecordType::Search {
            return Err(StacksError::schema_mismatch(
                row.record_type(),
                "not a search row",
            ));
        }
        Ok(Self {
            library_id: row.library_id(),
            id: Some(row.id()),
            key: Some(row.key().clone()),
            version: row.version(),
            name: row.get_str("name").map(str::to_string),
            date_added: row.get_str("dateAdded").map(str::to_string),
            date_modified: row.get_str("dateModified").map(str::to_string),
            changed: BTreeSet::new(),
        })
    }

    pub async fn load(uow: &mut UnitOfWork<'_>, key: &RecordKey) -> StacksResult<Option<Self>> {
        uow.load(RecordType::Search, key)
            .await?
            .map(|row| Self::from_row(&row))
            .transpose()
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

    pub fn has_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn set_name(&mut self, name: &str) -> StacksResult<bool> {
        check_name("name", name)?;
        self.set(SearchField::Name, name)
    }

    pub fn set_date_added(&mut self, date_added: &str) -> StacksResult<bool> {
        check_datetime("dateAdded", date_added)?;
        self.set(SearchField::DateAdded, date_added)
    }

    pub fn set_date_modified(&mut self, date_modified: &str) -> StacksResult<bool> {
        check_datetime("dateModified", date_modified)?;
        self.set(SearchField::DateModified, date_modified)
    }

    fn set(&mut self, field: SearchField, value: &str) -> StacksResult<bool> {
        let slot = match field {
            SearchField::Name => &mut self.name,
            SearchField::DateAdded => &mut self.date_added,
            SearchField::DateModified => &mut self.date_modified,
        };
        if slot.as_deref() == Some(value) {
            return Ok(false);
        }
        *slot = Some(value.to_string());
        self.changed.insert(field);
        Ok(true)
    }

    /// Write the search if anything changed. Returns whether it was written.
    pub async fn save(&mut self, uow: &mut UnitOfWork<'_>) -> StacksResult<bool> {
        if self.name.is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }
        if !self.has_changed() {
            return Ok(false);
        }

        let (id, key) =
            assign_identity(uow, RecordType::Search, self.id, self.key.as_ref()).await?;
        let fields: Vec<(&'static str, Value)> = [SearchField::Name, SearchField::DateAdded]
            .iter()
            .map(|field| (field.column(), field.value(self)))
            .collect();
        let date_modified = self
            .changed
            .contains(&SearchField::DateModified)
            .then(|| self.date_modified.clone())
            .flatten();
        let row = stamped_row(
            uow,
            RecordType::Search,
            id,
            key,
            fields,
            date_modified.as_deref(),
        )
        .await?;
        debug!(id = %id, key = %row.key(), "saving search");
        uow.write_row(row.clone()).await?;

        *self = Self::from_row(&row)?;
        Ok(true)
    }
}

/// Batch handler for saved searches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Searches;

#[async_trait]
impl BatchObject for Searches {
    fn record_type(&self) -> RecordType {
        RecordType::Search
    }

    fn properties(&self) -> &'static [&'static str] {
        &["searchKey", "name", "dateAdded", "dateModified"]
    }

    async fn apply(
        &self,
        uow: &mut UnitOfWork<'_>,
        object: &Map<String, Value>,
        _parent: Option<&RecordKey>,
    ) -> StacksResult<ObjectOutcome> {
        let key = key_property(object, RecordType::Search)?;
        let mut search = match &key {
            Some(key) => match Search::load(uow, key).await? {
                Some(existing) => existing,
                None => Search::with_key(uow.library_id(), key.clone()),
            },
            None => Search::new(uow.library_id()),
        };
        uow.edit_check(&EditTarget::new(uow.library_id(), RecordType::Search))
            .await?;

        if let Some(name) = string_property(object, "name")? {
            search.set_name(name)?;
        }
        if let Some(date_added) = datetime_property(object, "dateAdded")? {
            search.set_date_added(&date_added)?;
        }
        if let Some(date_modified) = datetime_property(object, "dateModified")? {
            search.set_date_modified(&date_modified)?;
        }

        let changed = search.save(uow).await?;
        let key = search
            .key()
            .cloned()
            .ok_or_else(|| StacksError::invalid_state("search has no key after save"))?;
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

    #[test]
    fn test_new_search_tracks_changes() {
        let mut search = Search::new(LibraryId::new(1).expect("id"));
        assert!(!search.has_changed());
        assert!(search.set_name("Unread").expect("valid"));
        assert!(!search.set_name("Unread").expect("valid"));
        assert_eq!(SearchField::Name.value(&search), Value::from("Unread"));
        assert_eq!(SearchField::DateAdded.value(&search), Value::Null);
    }

    #[test]
    fn test_invalid_dates_rejected() {
        let mut search = Search::new(LibraryId::new(1).expect("id"));
        assert!(search.set_date_added("2020-13-01 00:00:00").is_err());
        assert!(!search.has_changed());
    }
}
