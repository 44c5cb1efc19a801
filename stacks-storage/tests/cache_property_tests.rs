//! Property-Based Tests for the Object Caches
//!
//! Key/id bijection in the identity cache, row sharing in the primary-data
//! cache, idempotent tombstones and version-stamped shared-cache entries.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use stacks_core::{LibraryType, RecordType, Version};
use stacks_storage::{
    InMemorySharedCache, InMemoryStorage, ObjectStore, RequestContext, SharedCache,
    SharedCacheKey,
};
use stacks_test_utils::{assertions, fixtures, generators, init_tracing};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every registered key resolves to its id and back.
    #[test]
    fn prop_registered_keys_form_a_bijection(
        pairs in generators::arb_key_id_pairs(20),
        record_type in generators::arb_token_record_type(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let storage = InMemoryStorage::new();
            let lib = fixtures::add_library(&storage, 1, LibraryType::User, 0);
            let store = fixtures::store(&storage);
            for (key, id) in &pairs {
                store
                    .ids()
                    .register(lib, record_type, key, *id)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            for (key, id) in &pairs {
                let resolved = store
                    .ids()
                    .resolve(lib, record_type, key)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(resolved, Some(*id));
                let back = store
                    .ids()
                    .key_for_id(lib, record_type, *id)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(back.as_ref(), Some(key));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Re-registering a key with another id is a conflict and keeps the
    /// original binding.
    #[test]
    fn prop_rebinding_a_key_conflicts(
        pairs in generators::arb_key_id_pairs(5),
        offset in 1u64..1000,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let storage = InMemoryStorage::new();
            let lib = fixtures::add_library(&storage, 1, LibraryType::User, 0);
            let store = fixtures::store(&storage);
            let (key, id) = &pairs[0];
            store
                .ids()
                .register(lib, RecordType::Item, key, *id)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let other = fixtures::record_id(id.get() + offset);
            let result = store.ids().register(lib, RecordType::Item, key, other).await;
            assertions::assert_conflict(&result);
            let resolved = store
                .ids()
                .resolve(lib, RecordType::Item, key)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(resolved, Some(*id));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Appending the same tombstone repeatedly keeps one entry at the
    /// highest version.
    #[test]
    fn prop_tombstone_append_is_idempotent(versions in proptest::collection::vec(1u64..100, 1..8)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let storage = InMemoryStorage::new();
            let lib = fixtures::add_library(&storage, 1, LibraryType::User, 0);
            let store = fixtures::store(&storage);
            let key = fixtures::key(RecordType::Search, "SRCH2345");
            for v in &versions {
                store
                    .delete_log()
                    .append(lib, RecordType::Search, &key, Version(*v), chrono::Utc::now())
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
            }
            let tombstones = storage
                .committed_tombstones(lib)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(tombstones.len(), 1);
            let max = versions.iter().copied().max().unwrap_or_default();
            prop_assert_eq!(tombstones[0].version, Version(max));
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// PRIMARY DATA
// ============================================================================

#[tokio::test]
async fn test_lookups_by_id_and_key_share_one_row() {
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 1, LibraryType::User, 1);
    storage
        .insert_row(fixtures::collection_row(lib, 4, "CLLN2345", "Reading", None))
        .expect("seed");
    let store = fixtures::store(&storage);

    let by_key = store
        .rows()
        .get_by_key(lib, RecordType::Collection, &fixtures::key(RecordType::Collection, "CLLN2345"))
        .await
        .expect("get_by_key")
        .expect("cached");
    let by_id = store
        .rows()
        .get_by_id(lib, RecordType::Collection, fixtures::record_id(4))
        .await
        .expect("get_by_id")
        .expect("cached");
    assert!(Arc::ptr_eq(&by_key, &by_id));
    assert_eq!(storage.bulk_load_count(lib, RecordType::Collection), 1);
}

#[tokio::test]
async fn test_libraries_are_isolated() {
    let storage = InMemoryStorage::new();
    let one = fixtures::add_library(&storage, 1, LibraryType::User, 1);
    let two = fixtures::add_library(&storage, 2, LibraryType::User, 1);
    storage
        .insert_row(fixtures::collection_row(one, 4, "CLLN2345", "Reading", None))
        .expect("seed");
    let store = fixtures::store(&storage);
    let key = fixtures::key(RecordType::Collection, "CLLN2345");

    assert!(store
        .ids()
        .resolve(two, RecordType::Collection, &key)
        .await
        .expect("resolve")
        .is_none());
    assert!(store
        .ids()
        .resolve(one, RecordType::Collection, &key)
        .await
        .expect("resolve")
        .is_some());
}

// ============================================================================
// SHARED CACHE
// ============================================================================

#[tokio::test]
async fn test_version_bump_bypasses_old_shared_entries() {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 3, LibraryType::User, 1);
    storage
        .insert_row(fixtures::collection_row(lib, 1, "CLLN2345", "Old", None))
        .expect("seed");
    let shared = Arc::new(InMemorySharedCache::new());
    let store = ObjectStore::builder(Arc::new(storage.clone()))
        .shared_cache(Some(shared.clone() as Arc<dyn SharedCache>))
        .build()
        .expect("build should succeed");
    let format = store.config().cache_format_version;

    assert_eq!(
        store
            .rows()
            .rows(lib, RecordType::Collection)
            .await
            .expect("rows")
            .len(),
        1
    );
    let v1 = SharedCacheKey::data(RecordType::Collection, lib, Version(1), format);
    assert!(shared.contains(&v1).await);
    assert_eq!(v1.encode(), format!("collectionData_3_1_{}", format));

    let ctx = RequestContext::system();
    let report = store
        .apply_batch(&ctx, lib, RecordType::Collection, &json!({"collections": [{"name": "New"}]}))
        .await
        .expect("batch should be accepted");
    assertions::assert_success(&report, 0);

    // A fresh process sees the old entry but must not use it.
    let cold = ObjectStore::builder(Arc::new(storage.clone()))
        .shared_cache(Some(shared.clone() as Arc<dyn SharedCache>))
        .build()
        .expect("build should succeed");
    let rows = cold
        .rows()
        .rows(lib, RecordType::Collection)
        .await
        .expect("rows");
    assert_eq!(rows.len(), 2);
    assert!(shared.contains(&v1).await);
    assert!(
        shared
            .contains(&SharedCacheKey::data(RecordType::Collection, lib, Version(2), format))
            .await
    );
}
