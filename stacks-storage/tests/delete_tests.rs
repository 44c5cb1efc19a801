//! Delete pipeline: cascades, relation cleanup, tombstones and cache
//! eviction.

use stacks_core::{
    Actor, DeletedSince, LibraryId, LibraryType, PrimaryDataRow, RecordType, Version,
};
use stacks_storage::{InMemoryStorage, ObjectStore, RequestContext};
use stacks_test_utils::{assertions, fixtures, init_tracing};

/// Library 1 at version 3:
/// book 1 with a note (2) and an imported attachment (3), a top-level
/// note (4), and book 5 with a note (6).
fn seeded() -> (InMemoryStorage, LibraryId, ObjectStore) {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 1, LibraryType::User, 3);
    for row in [
        fixtures::item_row(lib, 1, "BKBK2345", "book", None),
        fixtures::item_row(lib, 2, "NTNT2345", "note", Some(1)),
        fixtures::item_row(lib, 3, "ATAT2345", "attachment", Some(1)),
        fixtures::item_row(lib, 4, "TPNT2345", "note", None),
        fixtures::item_row(lib, 5, "BKBK6789", "book", None),
        fixtures::item_row(lib, 6, "NTNT6789", "note", Some(5)),
    ] {
        storage.insert_row(row).expect("seed");
    }
    let store = fixtures::store(&storage);
    (storage, lib, store)
}

fn remaining_keys(storage: &InMemoryStorage, lib: LibraryId) -> Vec<String> {
    storage
        .committed_rows(lib, RecordType::Item)
        .expect("read rows")
        .iter()
        .map(|row: &PrimaryDataRow| row.key().as_str().to_string())
        .collect()
}

#[tokio::test]
async fn test_top_level_item_takes_its_children_only() {
    let (storage, lib, store) = seeded();
    let ctx = RequestContext::system();
    let book = fixtures::key(RecordType::Item, "BKBK2345");

    // Warm the caches so eviction is observable.
    assert!(store
        .rows()
        .get_by_key(lib, RecordType::Item, &book)
        .await
        .expect("get_by_key")
        .is_some());

    assert!(store
        .delete(&ctx, lib, RecordType::Item, &book)
        .await
        .expect("delete should succeed"));

    assert_eq!(
        remaining_keys(&storage, lib),
        vec!["TPNT2345", "BKBK6789", "NTNT6789"]
    );
    let mut deleted: Vec<String> = store
        .delete_log()
        .keys_deleted_since(lib, RecordType::Item, DeletedSince::Version(Version(3)))
        .await
        .expect("keys_deleted_since")
        .iter()
        .map(|k| k.as_str().to_string())
        .collect();
    deleted.sort();
    assert_eq!(deleted, vec!["ATAT2345", "BKBK2345", "NTNT2345"]);
    assert!(storage
        .committed_tombstones(lib)
        .expect("tombstones")
        .iter()
        .all(|t| t.version == Version(4)));

    assert!(store
        .rows()
        .get_by_key(lib, RecordType::Item, &book)
        .await
        .expect("get_by_key")
        .is_none());
    assert!(store
        .ids()
        .resolve(lib, RecordType::Item, &book)
        .await
        .expect("resolve")
        .is_none());
}

#[tokio::test]
async fn test_deleting_child_leaves_parent() {
    let (storage, lib, store) = seeded();
    let ctx = RequestContext::system();

    assert!(store
        .delete(&ctx, lib, RecordType::Item, &fixtures::key(RecordType::Item, "NTNT6789"))
        .await
        .expect("delete should succeed"));
    assert!(remaining_keys(&storage, lib).contains(&"BKBK6789".to_string()));
    assert_eq!(storage.committed_version(lib).expect("version"), Some(Version(4)));
}

#[tokio::test]
async fn test_delete_many_processes_children_first() {
    let (storage, lib, store) = seeded();
    let ctx = RequestContext::system();
    let keys = [
        fixtures::key(RecordType::Item, "BKBK2345"),
        fixtures::key(RecordType::Item, "NTNT2345"),
        fixtures::key(RecordType::Item, "MSMS2345"),
    ];

    let deleted = store
        .delete_many(&ctx, lib, RecordType::Item, &keys)
        .await
        .expect("delete_many should succeed");

    assert_eq!(deleted, vec![keys[1].clone(), keys[0].clone()]);
    assert!(!remaining_keys(&storage, lib).contains(&"ATAT2345".to_string()));
    // One unit per deleted key.
    assert_eq!(storage.committed_version(lib).expect("version"), Some(Version(5)));
}

#[tokio::test]
async fn test_relations_erased_except_merge_tracking() {
    let (storage, lib, store) = seeded();
    let uri = "http://stacks.local/users/1/items/BKBK2345";
    let elsewhere = "http://stacks.local/users/1/items/BKBK6789";
    let related = fixtures::relation_row(lib, 10, uri, "dc:relation", elsewhere);
    let inbound = fixtures::relation_row(lib, 11, elsewhere, "dc:relation", uri);
    let merged = fixtures::relation_row(lib, 12, elsewhere, "dc:replaces", uri);
    for row in [related.clone(), inbound.clone(), merged.clone()] {
        storage.insert_row(row).expect("seed");
    }
    let ctx = RequestContext::system();

    store
        .delete(&ctx, lib, RecordType::Item, &fixtures::key(RecordType::Item, "BKBK2345"))
        .await
        .expect("delete should succeed");

    let relations = storage
        .committed_rows(lib, RecordType::Relation)
        .expect("read rows");
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].key(), merged.key());

    let mut tombstoned = store
        .delete_log()
        .keys_deleted_since(lib, RecordType::Relation, DeletedSince::Version(Version(3)))
        .await
        .expect("keys_deleted_since");
    tombstoned.sort();
    let mut expected = vec![related.key().clone(), inbound.key().clone()];
    expected.sort();
    assert_eq!(tombstoned, expected);
}

#[tokio::test]
async fn test_tag_delete_writes_name_log() {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 2, LibraryType::User, 0);
    let mut tag = PrimaryDataRow::new(
        RecordType::Tag,
        lib,
        fixtures::record_id(1),
        fixtures::key(RecordType::Tag, "TGTG2345"),
        Version(0),
    );
    tag.set("name", "to-read").expect("set name");
    tag.set("type", 0).expect("set type");
    storage.insert_row(tag.clone()).expect("seed");
    let store = fixtures::store(&storage);
    let ctx = RequestContext::system();

    assert!(store
        .delete(&ctx, lib, RecordType::Tag, tag.key())
        .await
        .expect("delete should succeed"));

    let since = DeletedSince::Version(Version::ZERO);
    assert_eq!(
        store
            .delete_log()
            .keys_deleted_since(lib, RecordType::Tag, since)
            .await
            .expect("keys_deleted_since"),
        vec![tag.key().clone()]
    );
    assert_eq!(
        store
            .delete_log()
            .tag_names_deleted_since(lib, since)
            .await
            .expect("tag_names_deleted_since"),
        vec!["to-read".to_string()]
    );
}

#[tokio::test]
async fn test_delete_requires_file_rights_for_imported_attachment() {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::group_with_members(&storage, 5);
    storage
        .insert_row(fixtures::item_row(lib, 1, "ATAT2345", "attachment", None))
        .expect("seed");
    let store = fixtures::store(&storage);
    let key = fixtures::key(RecordType::Item, "ATAT2345");

    let editor = RequestContext::for_actor(Actor::new(fixtures::user_id(11)));
    assertions::assert_access_denied(&store.delete(&editor, lib, RecordType::Item, &key).await);
    assert_eq!(storage.committed_rows(lib, RecordType::Item).expect("rows").len(), 1);

    let file_editor = RequestContext::for_actor(Actor::new(fixtures::user_id(10)));
    assert!(store
        .delete(&file_editor, lib, RecordType::Item, &key)
        .await
        .expect("delete should succeed"));
}

// ============================================================================
// COLLECTIONS
// ============================================================================

fn remaining_collections(storage: &InMemoryStorage, lib: LibraryId) -> Vec<String> {
    storage
        .committed_rows(lib, RecordType::Collection)
        .expect("read rows")
        .iter()
        .map(|row| row.key().as_str().to_string())
        .collect()
}

#[tokio::test]
async fn test_collection_takes_its_subtree() {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 4, LibraryType::User, 3);
    for row in [
        fixtures::collection_row(lib, 1, "AAAA2345", "A", None),
        fixtures::collection_row(lib, 2, "BBBB2345", "B", Some(1)),
        fixtures::collection_row(lib, 3, "CCCC2345", "C", Some(1)),
        fixtures::collection_row(lib, 4, "DDDD2345", "D", Some(2)),
        fixtures::collection_row(lib, 5, "EEEE2345", "E", None),
    ] {
        storage.insert_row(row).expect("seed");
    }
    let store = fixtures::store(&storage);
    let ctx = RequestContext::system();

    assert!(store
        .delete(&ctx, lib, RecordType::Collection, &fixtures::key(RecordType::Collection, "AAAA2345"))
        .await
        .expect("delete should succeed"));

    assert_eq!(remaining_collections(&storage, lib), vec!["EEEE2345"]);
    let mut deleted: Vec<String> = store
        .delete_log()
        .keys_deleted_since(lib, RecordType::Collection, DeletedSince::Version(Version(3)))
        .await
        .expect("keys_deleted_since")
        .iter()
        .map(|k| k.as_str().to_string())
        .collect();
    deleted.sort();
    assert_eq!(deleted, vec!["AAAA2345", "BBBB2345", "CCCC2345", "DDDD2345"]);
    let tombstones = storage.committed_tombstones(lib).expect("tombstones");
    assert_eq!(tombstones.len(), 4);
    assert!(tombstones.iter().all(|t| t.version == Version(4)));
    assert_eq!(storage.committed_version(lib).expect("version"), Some(Version(4)));
}

#[tokio::test]
async fn test_cascade_skips_child_cached_under_another_parent() {
    init_tracing();
    let storage = InMemoryStorage::new();
    let lib = fixtures::add_library(&storage, 4, LibraryType::User, 3);
    storage
        .insert_row(fixtures::collection_row(lib, 1, "AAAA2345", "A", None))
        .expect("seed");
    storage
        .insert_row(fixtures::collection_row(lib, 3, "CCCC2345", "C", None))
        .expect("seed");
    let store = fixtures::store(&storage);
    assert_eq!(
        store
            .rows()
            .rows(lib, RecordType::Collection)
            .await
            .expect("rows")
            .len(),
        2
    );
    // Storage now files C under A; the cached row still says top-level.
    storage
        .insert_row(fixtures::collection_row(lib, 3, "CCCC2345", "C", Some(1)))
        .expect("reparent");
    let ctx = RequestContext::system();

    assert!(store
        .delete(&ctx, lib, RecordType::Collection, &fixtures::key(RecordType::Collection, "AAAA2345"))
        .await
        .expect("delete should succeed"));

    assert_eq!(remaining_collections(&storage, lib), vec!["CCCC2345"]);
    assert_eq!(
        store
            .delete_log()
            .keys_deleted_since(lib, RecordType::Collection, DeletedSince::Version(Version(3)))
            .await
            .expect("keys_deleted_since"),
        vec![fixtures::key(RecordType::Collection, "AAAA2345")]
    );
}
