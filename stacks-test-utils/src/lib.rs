//! Stacks Test Utilities
//!
//! Shared test infrastructure for the stacks workspace:
//! - Proptest generators for keys, ids and names
//! - Seeded in-memory stores and row fixtures
//! - Assertions on the error taxonomy
//! - One-time tracing setup for tests

pub use stacks_storage::{InMemorySharedCache, InMemoryStorage, ObjectStore, RequestContext};

pub use stacks_core::{
    Actor, BatchReport, BatchResult, ErrorCode, LibraryId, LibraryRecord, LibraryType, Membership,
    PrimaryDataRow, RecordId, RecordKey, RecordType, ShardId, StacksConfig, StacksError,
    StacksResult, UserId, ValidationError, Version, KEY_ALPHABET, KEY_LENGTH,
};

use std::sync::Once;

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for stacks identities.

    use super::*;
    use proptest::prelude::*;

    /// A token key drawn from the generated-key alphabet.
    pub fn arb_record_key() -> impl Strategy<Value = RecordKey> {
        proptest::collection::vec(proptest::sample::select(KEY_ALPHABET.to_vec()), KEY_LENGTH)
            .prop_map(|bytes| {
                let raw: String = bytes.into_iter().map(char::from).collect();
                RecordKey::parse(RecordType::Item, &raw).expect("alphabet keys are valid")
            })
    }

    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        (1u64..1_000_000).prop_map(|raw| RecordId::new(raw).expect("positive id"))
    }

    pub fn arb_library_id() -> impl Strategy<Value = LibraryId> {
        (1u64..10_000).prop_map(|raw| LibraryId::new(raw).expect("positive id"))
    }

    /// Record types whose keys are tokens.
    pub fn arb_token_record_type() -> impl Strategy<Value = RecordType> {
        prop_oneof![
            Just(RecordType::Creator),
            Just(RecordType::Item),
            Just(RecordType::Collection),
            Just(RecordType::Search),
            Just(RecordType::Tag),
        ]
    }

    /// A valid collection or search name.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 ]{0,40}"
    }

    /// Up to `max` distinct keys paired with distinct ids.
    pub fn arb_key_id_pairs(max: usize) -> impl Strategy<Value = Vec<(RecordKey, RecordId)>> {
        proptest::collection::btree_set(arb_record_key(), 1..=max).prop_map(|keys| {
            keys.into_iter()
                .enumerate()
                .map(|(i, key)| (key, RecordId::new(i as u64 + 1).expect("positive id")))
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Seeded storage, stores and rows for common scenarios.

    use super::*;
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::Arc;

    pub fn library_id(raw: u64) -> LibraryId {
        LibraryId::new(raw).expect("positive id")
    }

    pub fn user_id(raw: u64) -> UserId {
        UserId::new(raw).expect("positive id")
    }

    pub fn record_id(raw: u64) -> RecordId {
        RecordId::new(raw).expect("positive id")
    }

    pub fn key(record_type: RecordType, raw: &str) -> RecordKey {
        RecordKey::parse(record_type, raw).expect("valid key")
    }

    /// Add a library at `version` on shard 1.
    pub fn add_library(
        storage: &InMemoryStorage,
        raw: u64,
        library_type: LibraryType,
        version: u64,
    ) -> LibraryId {
        let id = library_id(raw);
        let mut library = LibraryRecord::new(id, library_type, ShardId(1), Utc::now());
        library.version = Version(version);
        storage.add_library(library).expect("add library");
        id
    }

    /// A store over `storage` with the default config and an in-memory
    /// shared cache.
    pub fn store(storage: &InMemoryStorage) -> ObjectStore {
        store_with_config(storage, StacksConfig::default())
    }

    pub fn store_with_config(storage: &InMemoryStorage, config: StacksConfig) -> ObjectStore {
        ObjectStore::builder(Arc::new(storage.clone()))
            .config(config)
            .build()
            .expect("build should succeed")
    }

    /// A group library with three members:
    /// user 10 edits everything, user 11 edits but not files, user 12 reads.
    pub fn group_with_members(storage: &InMemoryStorage, raw: u64) -> LibraryId {
        let id = add_library(storage, raw, LibraryType::Group, 0);
        storage
            .add_membership(id, user_id(10), Membership::file_editor())
            .expect("add membership");
        storage
            .add_membership(id, user_id(11), Membership::editor())
            .expect("add membership");
        storage
            .add_membership(id, user_id(12), Membership::reader())
            .expect("add membership");
        id
    }

    pub fn collection_row(
        library_id: LibraryId,
        id: u64,
        raw_key: &str,
        name: &str,
        parent: Option<u64>,
    ) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Collection,
            library_id,
            record_id(id),
            key(RecordType::Collection, raw_key),
            Version(1),
        );
        row.set("name", name).expect("set name");
        row.set("parentID", parent.map_or(Value::Null, Value::from))
            .expect("set parent");
        row.set("dateAdded", "2020-01-01 00:00:00").expect("set date");
        row.set("dateModified", "2020-01-01 00:00:00").expect("set date");
        row
    }

    pub fn item_row(
        library_id: LibraryId,
        id: u64,
        raw_key: &str,
        item_type: &str,
        parent: Option<u64>,
    ) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Item,
            library_id,
            record_id(id),
            key(RecordType::Item, raw_key),
            Version(1),
        );
        row.set("itemType", item_type).expect("set type");
        row.set("parentID", parent.map_or(Value::Null, Value::from))
            .expect("set parent");
        if item_type == "attachment" {
            row.set("linkMode", "imported_file").expect("set link mode");
        }
        row.set("dateAdded", "2020-01-01 00:00:00").expect("set date");
        row.set("dateModified", "2020-01-01 00:00:00").expect("set date");
        row
    }

    /// A relation whose key is derived from its content.
    pub fn relation_row(
        library_id: LibraryId,
        id: u64,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> PrimaryDataRow {
        let mut row = PrimaryDataRow::new(
            RecordType::Relation,
            library_id,
            record_id(id),
            RecordKey::content_hash(subject, predicate, object),
            Version(1),
        );
        row.set("subject", subject).expect("set subject");
        row.set("predicate", predicate).expect("set predicate");
        row.set("object", object).expect("set object");
        row
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the stacks error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(result: &StacksResult<T>) {
        match result {
            Err(StacksError::InvalidInput(_)) => {}
            other => panic!("Expected InvalidInput, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_access_denied<T: std::fmt::Debug>(result: &StacksResult<T>) {
        match result {
            Err(StacksError::AccessDenied { .. }) => {}
            other => panic!("Expected AccessDenied, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_state<T: std::fmt::Debug>(result: &StacksResult<T>) {
        match result {
            Err(StacksError::InvalidState { .. }) => {}
            other => panic!("Expected InvalidState, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &StacksResult<T>) {
        match result {
            Err(StacksError::Conflict { .. }) => {}
            other => panic!("Expected Conflict, got: {:?}", other),
        }
    }

    /// Assert a batch entry succeeded and return its key.
    #[track_caller]
    pub fn assert_success(report: &BatchReport, index: usize) -> RecordKey {
        match report.results().get(index) {
            Some(BatchResult::Success { key, .. }) => key.clone(),
            other => panic!("Expected Success at {}, got: {:?}", index, other),
        }
    }

    #[track_caller]
    pub fn assert_unchanged(report: &BatchReport, index: usize) {
        match report.results().get(index) {
            Some(BatchResult::Unchanged { .. }) => {}
            other => panic!("Expected Unchanged at {}, got: {:?}", index, other),
        }
    }

    /// Assert a batch entry failed with `code`.
    #[track_caller]
    pub fn assert_failure(report: &BatchReport, index: usize, code: ErrorCode) {
        match report.results().get(index) {
            Some(BatchResult::Failure { error, .. }) => {
                assert_eq!(error.code, code, "wrong error code at {}", index)
            }
            other => panic!("Expected Failure at {}, got: {:?}", index, other),
        }
    }
}
