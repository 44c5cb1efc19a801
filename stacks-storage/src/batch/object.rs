//! Batch handler trait.

use async_trait::async_trait;
use serde_json::{Map, Value};
use stacks_core::{RecordKey, RecordType, StacksResult, ValidationError};

use crate::unit_of_work::UnitOfWork;

/// What applying one submitted object did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// The record was created or modified; the unit should commit.
    Changed(RecordKey),
    /// The submitted values equal the stored ones; the unit should roll back.
    Unchanged(RecordKey),
}

impl ObjectOutcome {
    pub fn key(&self) -> &RecordKey {
        match self {
            ObjectOutcome::Changed(key) | ObjectOutcome::Unchanged(key) => key,
        }
    }
}

/// A record type that accepts batch writes.
#[async_trait]
pub trait BatchObject: Send + Sync {
    fn record_type(&self) -> RecordType;

    /// Top-level properties a submitted object may carry.
    fn properties(&self) -> &'static [&'static str];

    /// Whether a batch-level parent may be passed for this type.
    fn allows_parent(&self) -> bool {
        false
    }

    /// Whether a single object may be submitted without the plural wrapper.
    fn accepts_bare_object(&self) -> bool {
        false
    }

    /// Create or update one record inside `uow`.
    async fn apply(
        &self,
        uow: &mut UnitOfWork<'_>,
        object: &Map<String, Value>,
        parent: Option<&RecordKey>,
    ) -> StacksResult<ObjectOutcome>;
}

/// `UnknownProperty` for the first property the handler does not accept.
pub fn check_properties(
    handler: &dyn BatchObject,
    object: &Map<String, Value>,
) -> Result<(), ValidationError> {
    let accepted = handler.properties();
    match object.keys().find(|k| !accepted.contains(&k.as_str())) {
        Some(property) => Err(ValidationError::UnknownProperty {
            property: property.clone(),
        }),
        None => Ok(()),
    }
}
