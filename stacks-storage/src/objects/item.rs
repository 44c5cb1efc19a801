//! Items, including child notes and attachments.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use stacks_core::{
    LibraryId, PrimaryDataRow, RecordId, RecordKey, RecordType, StacksError, StacksResult,
    ValidationError, Version,
};
use tracing::debug;

use super::{
    assign_identity, check_datetime, datetime_property, key_property, parent_property,
    stamped_row, string_property, ParentRef,
};
use crate::access::EditTarget;
use crate::batch::{BatchObject, ObjectOutcome};
use crate::unit_of_work::UnitOfWork;

// ============================================================================
// KIND AND LINK MODE
// ============================================================================

/// Broad shape of an item, derived from its `itemType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Regular,
    Note,
    Attachment,
}

impl ItemKind {
    pub fn of(item_type: &str) -> Self {
        match item_type {
            "note" => ItemKind::Note,
            "attachment" => ItemKind::Attachment,
            _ => ItemKind::Regular,
        }
    }

    /// Notes and attachments may sit under a regular item.
    pub fn can_have_parent(&self) -> bool {
        !matches!(self, ItemKind::Regular)
    }
}

/// How an attachment's content is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkMode {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
}

impl LinkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMode::ImportedFile => "imported_file",
            LinkMode::ImportedUrl => "imported_url",
            LinkMode::LinkedFile => "linked_file",
            LinkMode::LinkedUrl => "linked_url",
        }
    }

    /// The file lives in server storage.
    pub fn is_imported(&self) -> bool {
        matches!(self, LinkMode::ImportedFile | LinkMode::ImportedUrl)
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imported_file" => Ok(LinkMode::ImportedFile),
            "imported_url" => Ok(LinkMode::ImportedUrl),
            "linked_file" => Ok(LinkMode::LinkedFile),
            "linked_url" => Ok(LinkMode::LinkedUrl),
            other => Err(ValidationError::InvalidValue {
                field: "linkMode".to_string(),
                value: other.to_string(),
                reason: "unknown link mode".to_string(),
            }),
        }
    }
}

// ============================================================================
// ITEM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemField {
    ItemType,
    Parent,
    LinkMode,
    DateAdded,
    DateModified,
}

impl ItemField {
    pub const ALL: [ItemField; 5] = [
        ItemField::ItemType,
        ItemField::Parent,
        ItemField::LinkMode,
        ItemField::DateAdded,
        ItemField::DateModified,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            ItemField::ItemType => "itemType",
            ItemField::Parent => "parentID",
            ItemField::LinkMode => "linkMode",
            ItemField::DateAdded => "dateAdded",
            ItemField::DateModified => "dateModified",
        }
    }

    fn value(&self, item: &Item) -> Value {
        match self {
            ItemField::ItemType => item.item_type.clone().map_or(Value::Null, Value::from),
            ItemField::Parent => item.parent_id.map_or(Value::Null, |id| Value::from(id.get())),
            ItemField::LinkMode => item
                .link_mode
                .map_or(Value::Null, |mode| Value::from(mode.as_str())),
            ItemField::DateAdded => item.date_added.clone().map_or(Value::Null, Value::from),
            ItemField::DateModified => item.date_modified.clone().map_or(Value::Null, Value::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    library_id: LibraryId,
    id: Option<RecordId>,
    key: Option<RecordKey>,
    version: Version,
    item_type: Option<String>,
    parent_id: Option<RecordId>,
    link_mode: Option<LinkMode>,
    date_added: Option<String>,
    date_modified: Option<String>,
    changed: BTreeSet<ItemField>,
}

impl Item {
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            id: None,
            key: None,
            version: Version::ZERO,
            item_type: None,
            parent_id: None,
            link_mode: None,
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
        if row.record_type() != RecordType::Item {
            return Err(StacksError::schema_mismatch(row.record_type(), "not an item row"));
        }
        let link_mode = row
            .get_str("linkMode")
            .map(LinkMode::from_str)
            .transpose()
            .map_err(|e| StacksError::schema_mismatch(RecordType::Item, e.to_string()))?;
        Ok(Self {
            library_id: row.library_id(),
            id: Some(row.id()),
            key: Some(row.key().clone()),
            version: row.version(),
            item_type: row.get_str("itemType").map(str::to_string),
            parent_id: row.parent_id(),
            link_mode,
            date_added: row.get_str("dateAdded").map(str::to_string),
            date_modified: row.get_str("dateModified").map(str::to_string),
            changed: BTreeSet::new(),
        })
    }

    pub async fn load(uow: &mut UnitOfWork<'_>, key: &RecordKey) -> StacksResult<Option<Self>> {
        uow.load(RecordType::Item, key)
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

    pub fn item_type(&self) -> Option<&str> {
        self.item_type.as_deref()
    }

    pub fn kind(&self) -> Option<ItemKind> {
        self.item_type.as_deref().map(ItemKind::of)
    }

    pub fn parent_id(&self) -> Option<RecordId> {
        self.parent_id
    }

    pub fn link_mode(&self) -> Option<LinkMode> {
        self.link_mode
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn has_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn edit_target(&self) -> EditTarget {
        EditTarget::new(self.library_id, RecordType::Item)
            .imported_file(self.link_mode.is_some_and(|mode| mode.is_imported()))
    }

    // ========================================================================
    // SETTERS
    // ========================================================================

    /// An existing item can change type only within its kind.
    pub fn set_item_type(&mut self, item_type: &str) -> StacksResult<bool> {
        if item_type.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "itemType".to_string(),
                value: item_type.to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if self.item_type.as_deref() == Some(item_type) {
            return Ok(false);
        }
        if let Some(current) = self.kind() {
            if !self.is_new() && current != ItemKind::of(item_type) {
                return Err(ValidationError::InvalidValue {
                    field: "itemType".to_string(),
                    value: item_type.to_string(),
                    reason: format!(
                        "cannot change {} to {}",
                        self.item_type.as_deref().unwrap_or_default(),
                        item_type
                    ),
                }
                .into());
            }
        }
        self.item_type = Some(item_type.to_string());
        self.changed.insert(ItemField::ItemType);
        Ok(true)
    }

    /// Link mode is fixed once an attachment exists.
    pub fn set_link_mode(&mut self, link_mode: LinkMode) -> StacksResult<bool> {
        if self.link_mode == Some(link_mode) {
            return Ok(false);
        }
        if !self.is_new() && self.link_mode.is_some() {
            return Err(ValidationError::InvalidValue {
                field: "linkMode".to_string(),
                value: link_mode.to_string(),
                reason: "cannot change attachment link mode".to_string(),
            }
            .into());
        }
        self.link_mode = Some(link_mode);
        self.changed.insert(ItemField::LinkMode);
        Ok(true)
    }

    pub fn set_date_added(&mut self, date_added: &str) -> StacksResult<bool> {
        check_datetime("dateAdded", date_added)?;
        if self.date_added.as_deref() == Some(date_added) {
            return Ok(false);
        }
        self.date_added = Some(date_added.to_string());
        self.changed.insert(ItemField::DateAdded);
        Ok(true)
    }

    pub fn set_date_modified(&mut self, date_modified: &str) -> StacksResult<bool> {
        check_datetime("dateModified", date_modified)?;
        if self.date_modified.as_deref() == Some(date_modified) {
            return Ok(false);
        }
        self.date_modified = Some(date_modified.to_string());
        self.changed.insert(ItemField::DateModified);
        Ok(true)
    }

    /// Move under the item `parent_key`, or to the top level.
    ///
    /// Only notes and attachments take a parent, and the parent must be a
    /// top-level regular item in the same library.
    pub async fn set_parent_key(
        &mut self,
        uow: &mut UnitOfWork<'_>,
        parent_key: Option<&RecordKey>,
    ) -> StacksResult<bool> {
        let Some(parent_key) = parent_key else {
            if self.parent_id.is_none() {
                return Ok(false);
            }
            self.parent_id = None;
            self.changed.insert(ItemField::Parent);
            return Ok(true);
        };

        if !self.kind().is_some_and(|kind| kind.can_have_parent()) {
            return Err(ValidationError::InvalidReference {
                field: "parentItem".to_string(),
                reason: "only notes and attachments can have a parent item".to_string(),
            }
            .into());
        }
        if self.key.as_ref() == Some(parent_key) {
            return Err(ValidationError::InvalidReference {
                field: "parentItem".to_string(),
                reason: "an item cannot be its own parent".to_string(),
            }
            .into());
        }
        let parent = uow.load(RecordType::Item, parent_key).await?.ok_or_else(|| {
            ValidationError::InvalidReference {
                field: "parentItem".to_string(),
                reason: format!("parent item {} doesn't exist", parent_key),
            }
        })?;
        if parent.parent_id().is_some() {
            return Err(ValidationError::InvalidReference {
                field: "parentItem".to_string(),
                reason: format!("parent item {} is not a top-level item", parent_key),
            }
            .into());
        }
        if parent
            .get_str("itemType")
            .is_some_and(|t| ItemKind::of(t) != ItemKind::Regular)
        {
            return Err(ValidationError::InvalidReference {
                field: "parentItem".to_string(),
                reason: format!("parent item {} is a note or attachment", parent_key),
            }
            .into());
        }

        if self.parent_id == Some(parent.id()) {
            return Ok(false);
        }
        self.parent_id = Some(parent.id());
        self.changed.insert(ItemField::Parent);
        Ok(true)
    }

    fn is_new(&self) -> bool {
        self.id.is_none()
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    pub async fn save(&mut self, uow: &mut UnitOfWork<'_>) -> StacksResult<bool> {
        let Some(kind) = self.kind() else {
            return Err(ValidationError::RequiredFieldMissing {
                field: "itemType".to_string(),
            }
            .into());
        };
        match (kind, self.link_mode) {
            (ItemKind::Attachment, None) => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "linkMode".to_string(),
                }
                .into())
            }
            (ItemKind::Regular | ItemKind::Note, Some(mode)) => {
                return Err(ValidationError::InvalidValue {
                    field: "linkMode".to_string(),
                    value: mode.to_string(),
                    reason: "only attachments have a link mode".to_string(),
                }
                .into())
            }
            _ => {}
        }
        if !self.has_changed() {
            debug!(id = ?self.id.map(|id| id.get()), "item has not changed");
            return Ok(false);
        }

        let (id, key) = assign_identity(uow, RecordType::Item, self.id, self.key.as_ref()).await?;
        let fields: Vec<(&'static str, Value)> = ItemField::ALL
            .iter()
            .filter(|field| **field != ItemField::DateModified)
            .map(|field| (field.column(), field.value(self)))
            .collect();
        let date_modified = self
            .changed
            .contains(&ItemField::DateModified)
            .then(|| self.date_modified.clone())
            .flatten();
        let row = stamped_row(uow, RecordType::Item, id, key, fields, date_modified.as_deref())
            .await?;
        debug!(id = %id, key = %row.key(), "saving item");
        uow.write_row(row.clone()).await?;

        *self = Self::from_row(&row)?;
        Ok(true)
    }
}

// ============================================================================
// BATCH HANDLER
// ============================================================================

/// Batch handler for items.
#[derive(Debug, Clone, Copy, Default)]
pub struct Items;

#[async_trait]
impl BatchObject for Items {
    fn record_type(&self) -> RecordType {
        RecordType::Item
    }

    fn properties(&self) -> &'static [&'static str] {
        &[
            "itemKey",
            "itemType",
            "parentItem",
            "linkMode",
            "dateAdded",
            "dateModified",
        ]
    }

    fn allows_parent(&self) -> bool {
        true
    }

    async fn apply(
        &self,
        uow: &mut UnitOfWork<'_>,
        object: &Map<String, Value>,
        parent: Option<&RecordKey>,
    ) -> StacksResult<ObjectOutcome> {
        let key = key_property(object, RecordType::Item)?;
        let mut item = match &key {
            Some(key) => match Item::load(uow, key).await? {
                Some(existing) => existing,
                None => Item::with_key(uow.library_id(), key.clone()),
            },
            None => Item::new(uow.library_id()),
        };

        let link_mode = string_property(object, "linkMode")?
            .map(LinkMode::from_str)
            .transpose()?;
        let imported = link_mode.or(item.link_mode()).is_some_and(|m| m.is_imported());
        uow.edit_check(&item.edit_target().imported_file(imported))
            .await?;

        if let Some(item_type) = string_property(object, "itemType")? {
            item.set_item_type(item_type)?;
        }
        if let Some(link_mode) = link_mode {
            item.set_link_mode(link_mode)?;
        }
        let parent_ref = match parent_property(object, &["parentItem"], RecordType::Item)? {
            Some(parent_ref) => Some(parent_ref),
            None => parent.cloned().map(ParentRef::Key),
        };
        match parent_ref {
            Some(ParentRef::TopLevel) => {
                item.set_parent_key(uow, None).await?;
            }
            Some(ParentRef::Key(parent_key)) => {
                item.set_parent_key(uow, Some(&parent_key)).await?;
            }
            None => {}
        }
        if let Some(date_added) = datetime_property(object, "dateAdded")? {
            item.set_date_added(&date_added)?;
        }
        if let Some(date_modified) = datetime_property(object, "dateModified")? {
            item.set_date_modified(&date_modified)?;
        }

        let changed = item.save(uow).await?;
        let key = item
            .key()
            .cloned()
            .ok_or_else(|| StacksError::invalid_state("item has no key after save"))?;
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

    fn attachment_row(link_mode: &str) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Item,
            LibraryId::new(1).expect("id"),
            RecordId::new(9).expect("id"),
            RecordKey::parse(RecordType::Item, "ATTA2345").expect("key"),
            Version(2),
        );
        row.set("itemType", "attachment").expect("set");
        row.set("linkMode", link_mode).expect("set");
        row
    }

    #[test]
    fn test_item_kind() {
        assert_eq!(ItemKind::of("book"), ItemKind::Regular);
        assert_eq!(ItemKind::of("note"), ItemKind::Note);
        assert!(ItemKind::of("attachment").can_have_parent());
        assert!(!ItemKind::of("journalArticle").can_have_parent());
    }

    #[test]
    fn test_link_mode_parse() {
        assert_eq!("imported_url".parse::<LinkMode>().expect("parse"), LinkMode::ImportedUrl);
        assert!(LinkMode::ImportedFile.is_imported());
        assert!(!LinkMode::LinkedUrl.is_imported());
        assert!("embedded".parse::<LinkMode>().is_err());
    }

    #[test]
    fn test_imported_attachment_edit_target() {
        let item = Item::from_row(&attachment_row("imported_file")).expect("from_row");
        assert!(item.edit_target().is_imported_file);
        let item = Item::from_row(&attachment_row("linked_url")).expect("from_row");
        assert!(!item.edit_target().is_imported_file);
    }

    #[test]
    fn test_existing_attachment_keeps_kind_and_link_mode() {
        let mut item = Item::from_row(&attachment_row("linked_file")).expect("from_row");
        assert!(item.set_item_type("book").is_err());
        assert!(item.set_link_mode(LinkMode::ImportedFile).is_err());
        assert!(!item.set_link_mode(LinkMode::LinkedFile).expect("same mode"));
        assert!(!item.has_changed());
    }

    #[test]
    fn test_unknown_link_mode_in_row_is_schema_mismatch() {
        assert!(matches!(
            Item::from_row(&attachment_row("embedded")),
            Err(StacksError::SchemaMismatch { .. })
        ));
    }
}
