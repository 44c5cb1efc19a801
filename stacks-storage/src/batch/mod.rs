//! Batch mutation engine.
//!
//! A batch is a list of submitted JSON objects of one record type. Each object
//! is applied in its own unit of work: a failure rolls back that object only
//! and is reported next to the successes.

mod object;

pub use object::{check_properties, BatchObject, ObjectOutcome};

use std::sync::Arc;

use serde_json::Value;
use stacks_core::{
    BatchReport, BatchResult, ErrorDescriptor, LibraryId, RecordKey, RecordType, StacksError,
    StacksResult, ValidationError,
};
use tracing::{debug, info, warn};

use crate::access::RequestContext;
use crate::store::ObjectStore;
use crate::unit_of_work::UnitOfWork;

// ============================================================================
// SUBMISSION
// ============================================================================

/// The objects of one batch request, validated for shape and size.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedBatch {
    record_type: RecordType,
    objects: Vec<Value>,
}

impl SubmittedBatch {
    /// Accepts `{"<plural>": [...]}`, or a single bare object when
    /// `accepts_bare` is set and the object carries a `name`.
    pub fn from_json(
        record_type: RecordType,
        json: &Value,
        limit: usize,
        accepts_bare: bool,
    ) -> StacksResult<Self> {
        let plural = record_type.plural();
        let Some(map) = json.as_object() else {
            return Err(ValidationError::InvalidValue {
                field: plural.to_string(),
                value: json.to_string(),
                reason: "batch must be a JSON object".to_string(),
            }
            .into());
        };

        let objects = match map.get(plural) {
            Some(list) => {
                if let Some(property) = map.keys().find(|k| k.as_str() != plural) {
                    return Err(ValidationError::UnknownProperty {
                        property: property.clone(),
                    }
                    .into());
                }
                list.as_array()
                    .cloned()
                    .ok_or_else(|| ValidationError::InvalidValue {
                        field: plural.to_string(),
                        value: list.to_string(),
                        reason: "must be an array".to_string(),
                    })?
            }
            None if accepts_bare => {
                if !map.contains_key("name") {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: format!("'{}' or 'name'", plural),
                    }
                    .into());
                }
                vec![json.clone()]
            }
            None => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: plural.to_string(),
                }
                .into())
            }
        };

        if objects.len() > limit {
            return Err(StacksError::PayloadTooLarge {
                record_type,
                limit,
                submitted: objects.len(),
            });
        }

        Ok(Self {
            record_type,
            objects,
        })
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

impl ObjectStore {
    /// Apply a batch of create/update objects to a library.
    pub async fn apply_batch(
        &self,
        ctx: &RequestContext,
        library_id: LibraryId,
        record_type: RecordType,
        json: &Value,
    ) -> StacksResult<BatchReport> {
        self.apply_batch_with_parent(ctx, library_id, record_type, json, None)
            .await
    }

    /// [`apply_batch`](Self::apply_batch) with a parent applied to every
    /// object that does not name its own.
    ///
    /// Request-level problems (open transaction, unknown type or library,
    /// malformed or oversized batch) fail the whole call before any object is
    /// processed. Everything after that is reported per object.
    pub async fn apply_batch_with_parent(
        &self,
        ctx: &RequestContext,
        library_id: LibraryId,
        record_type: RecordType,
        json: &Value,
        parent: Option<&RecordKey>,
    ) -> StacksResult<BatchReport> {
        ctx.ensure_idle("batch write")?;

        let handler = self
            .handler(record_type)
            .cloned()
            .ok_or(ValidationError::UnsupportedOperation {
                record_type,
                operation: "batch write".to_string(),
            })?;
        if parent.is_some() && !handler.allows_parent() {
            return Err(ValidationError::InvalidReference {
                field: "parent".to_string(),
                reason: format!("a parent is not valid for {}", record_type.plural()),
            }
            .into());
        }

        let limit = self
            .config()
            .max_write
            .for_type(record_type)
            .unwrap_or(0);
        let batch =
            SubmittedBatch::from_json(record_type, json, limit, handler.accepts_bare_object())?;
        self.versions().library(library_id).await?;

        let mut report = BatchReport::new();
        for (index, object) in batch.objects().iter().enumerate() {
            let result = match self
                .apply_object(ctx, library_id, &handler, object, parent)
                .await
            {
                Ok(ObjectOutcome::Changed(key)) => BatchResult::Success { index, key },
                Ok(ObjectOutcome::Unchanged(key)) => {
                    debug!(index, key = %key, "{} unchanged", record_type);
                    BatchResult::Unchanged { index, key }
                }
                Err(e) => {
                    let key = submitted_key(record_type, object);
                    warn!(index, key = ?key, error = %e, "{} failed", record_type);
                    BatchResult::Failure {
                        index,
                        key,
                        error: ErrorDescriptor::from(&e),
                    }
                }
            };
            report.push(result);
        }

        info!(
            library_id = %library_id,
            record_type = %record_type,
            success = report.success_count(),
            unchanged = report.unchanged_count(),
            failed = report.failure_count(),
            "applied batch"
        );
        Ok(report)
    }

    async fn apply_object(
        &self,
        ctx: &RequestContext,
        library_id: LibraryId,
        handler: &Arc<dyn BatchObject>,
        object: &Value,
        parent: Option<&RecordKey>,
    ) -> StacksResult<ObjectOutcome> {
        let record_type = handler.record_type();
        let map = object.as_object().ok_or_else(|| ValidationError::InvalidValue {
            field: record_type.name().to_string(),
            value: object.to_string(),
            reason: "must be a JSON object".to_string(),
        })?;
        check_properties(handler.as_ref(), map)?;

        let mut uow = UnitOfWork::begin(self, ctx, library_id).await?;
        match handler.apply(&mut uow, map, parent).await {
            Ok(ObjectOutcome::Changed(key)) => {
                uow.commit().await?;
                Ok(ObjectOutcome::Changed(key))
            }
            Ok(ObjectOutcome::Unchanged(key)) => {
                uow.rollback().await?;
                Ok(ObjectOutcome::Unchanged(key))
            }
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// The key a client supplied for an object, if it is a string.
fn submitted_key(record_type: RecordType, object: &Value) -> Option<String> {
    object
        .get(record_type.key_property())
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plural_wrapper() {
        let batch = SubmittedBatch::from_json(
            RecordType::Search,
            &json!({"searches": [{"name": "a"}, {"name": "b"}]}),
            50,
            false,
        )
        .expect("batch should parse");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_extra_top_level_property_rejected() {
        let result = SubmittedBatch::from_json(
            RecordType::Search,
            &json!({"searches": [], "extra": 1}),
            50,
            false,
        );
        assert!(matches!(
            result,
            Err(StacksError::InvalidInput(ValidationError::UnknownProperty { property }))
                if property == "extra"
        ));
    }

    #[test]
    fn test_bare_object_only_when_accepted() {
        let bare = json!({"name": "Reading"});
        let batch = SubmittedBatch::from_json(RecordType::Collection, &bare, 50, true)
            .expect("bare collection should parse");
        assert_eq!(batch.objects(), &[bare.clone()]);

        assert!(matches!(
            SubmittedBatch::from_json(RecordType::Search, &bare, 50, false),
            Err(StacksError::InvalidInput(ValidationError::RequiredFieldMissing { .. }))
        ));
        assert!(matches!(
            SubmittedBatch::from_json(RecordType::Collection, &json!({"parentCollection": false}), 50, true),
            Err(StacksError::InvalidInput(ValidationError::RequiredFieldMissing { .. }))
        ));
    }

    #[test]
    fn test_oversized_batch() {
        let objects: Vec<Value> = (0..3).map(|i| json!({"name": i.to_string()})).collect();
        let result = SubmittedBatch::from_json(
            RecordType::Item,
            &json!({ "items": objects }),
            2,
            false,
        );
        assert!(matches!(
            result,
            Err(StacksError::PayloadTooLarge { limit: 2, submitted: 3, .. })
        ));
    }

    #[test]
    fn test_submitted_key() {
        assert_eq!(
            submitted_key(RecordType::Collection, &json!({"collectionKey": "ABCD2345"})),
            Some("ABCD2345".to_string())
        );
        assert_eq!(submitted_key(RecordType::Collection, &json!({"name": "x"})), None);
        assert_eq!(submitted_key(RecordType::Collection, &json!("scalar")), None);
    }
}
