//! End-to-end tests across committed transactions.

use objdb_core::{
    reference_sub_field, sub_field, CopyState, DbError, DeleteAction, FieldChange,
    FieldChangeListener, ObjId, ObjTypeBuilder, Schema, SchemaBuilder, SchemaVersionBuilder,
    Transaction, Value, ValueType,
};
use objdb_kv::MemoryKvStore;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

const AUTHOR: u32 = 20;
const A_NAME: u32 = 1;
const A_ROYALTIES: u32 = 2;

const BOOK: u32 = 21;
const B_TITLE: u32 = 3;
const B_AUTHOR: u32 = 4;
const B_TAGS: u32 = 5;
const B_TAG: u32 = 6;
const B_CHAPTERS: u32 = 7;
const B_CHAPTER: u32 = 8;
const B_META: u32 = 9;
const B_META_KEY: u32 = 11;
const B_META_VALUE: u32 = 12;

fn library_schema(author_on_delete: DeleteAction) -> Arc<Schema> {
    let v1 = SchemaVersionBuilder::new(1)
        .obj_type(
            ObjTypeBuilder::new(AUTHOR, "author")
                .simple_field(A_NAME, "name", ValueType::String, true)
                .counter_field(A_ROYALTIES, "royalties"),
        )
        .obj_type(
            ObjTypeBuilder::new(BOOK, "book")
                .simple_field(B_TITLE, "title", ValueType::String, true)
                .reference_field(B_AUTHOR, "author", author_on_delete)
                .set_field(B_TAGS, "tags", sub_field(B_TAG, "tag", ValueType::String, true))
                .list_field(
                    B_CHAPTERS,
                    "chapters",
                    sub_field(B_CHAPTER, "chapter", ValueType::String, false),
                )
                .map_field(
                    B_META,
                    "meta",
                    sub_field(B_META_KEY, "key", ValueType::String, false),
                    sub_field(B_META_VALUE, "value", ValueType::String, true),
                ),
        )
        .build()
        .unwrap();
    Arc::new(SchemaBuilder::new().version(v1).build().unwrap())
}

fn string(s: &str) -> Value {
    Value::String(s.into())
}

#[test]
fn lifecycle_across_commits() {
    let store = MemoryKvStore::new();
    let schema = library_schema(DeleteAction::Exception);

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    let author = tx.create_of_type(AUTHOR).unwrap();
    let book = tx.create_of_type(BOOK).unwrap();
    tx.write_simple_field(author, A_NAME, string("Herbert")).unwrap();
    tx.adjust_counter_field(author, A_ROYALTIES, 500).unwrap();
    tx.write_simple_field(book, B_TITLE, string("Dune")).unwrap();
    tx.write_simple_field(book, B_AUTHOR, Value::Reference(Some(author))).unwrap();
    tx.set_add(book, B_TAGS, string("sf")).unwrap();
    tx.list_push(book, B_CHAPTERS, string("Arrakis")).unwrap();
    tx.map_put(book, B_META, string("lang"), string("en")).unwrap();
    tx.commit().unwrap();

    // A second transaction sees everything, through data and indexes alike.
    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    assert_eq!(tx.read_simple_field(book, B_TITLE, false).unwrap(), string("Dune"));
    assert_eq!(tx.read_counter_field(author, A_ROYALTIES, false).unwrap(), 500);
    assert_eq!(tx.set_elements(book, B_TAGS).unwrap(), vec![string("sf")]);
    assert_eq!(
        tx.map_get(book, B_META, &string("lang")).unwrap(),
        Some(string("en"))
    );
    assert_eq!(
        tx.query_index(B_TITLE).unwrap().get(&string("Dune")).unwrap(),
        BTreeSet::from([book])
    );
    assert_eq!(
        tx.query_index(B_AUTHOR)
            .unwrap()
            .get(&Value::Reference(Some(author)))
            .unwrap(),
        BTreeSet::from([book])
    );
    tx.adjust_counter_field(author, A_ROYALTIES, -200).unwrap();
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, schema, 1).unwrap();
    assert_eq!(tx.read_counter_field(author, A_ROYALTIES, false).unwrap(), 300);
}

#[test]
fn exception_policy_blocks_delete_until_referrer_goes() {
    let store = MemoryKvStore::new();
    let schema = library_schema(DeleteAction::Exception);

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    let author = tx.create_of_type(AUTHOR).unwrap();
    let book = tx.create_of_type(BOOK).unwrap();
    tx.write_simple_field(book, B_AUTHOR, Value::Reference(Some(author))).unwrap();
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, schema, 1).unwrap();
    match tx.delete(author) {
        Err(DbError::ReferencedObject { id, referrer, storage_id }) => {
            assert_eq!(id, author);
            assert_eq!(referrer, book);
            assert_eq!(storage_id, B_AUTHOR);
        }
        other => panic!("expected ReferencedObject, got {other:?}"),
    }
    assert!(tx.delete(book).unwrap());
    assert!(tx.delete(author).unwrap());
    tx.commit().unwrap();
}

#[test]
fn unreference_policy_clears_every_container_kind() {
    const OWNER: u32 = 30;
    const TOP: u32 = 31;
    const REFS: u32 = 32;
    const REF: u32 = 33;
    const ORDER: u32 = 34;
    const ORDER_ELEM: u32 = 35;
    const BY_NAME: u32 = 36;
    const BY_NAME_KEY: u32 = 37;
    const BY_NAME_VALUE: u32 = 38;

    let v1 = SchemaVersionBuilder::new(1)
        .obj_type(
            ObjTypeBuilder::new(OWNER, "owner")
                .reference_field(TOP, "top", DeleteAction::Unreference)
                .set_field(
                    REFS,
                    "refs",
                    reference_sub_field(REF, "ref", DeleteAction::Unreference),
                )
                .list_field(
                    ORDER,
                    "order",
                    reference_sub_field(ORDER_ELEM, "elem", DeleteAction::Unreference),
                )
                .map_field(
                    BY_NAME,
                    "by_name",
                    sub_field(BY_NAME_KEY, "key", ValueType::String, false),
                    reference_sub_field(BY_NAME_VALUE, "value", DeleteAction::Unreference),
                ),
        )
        .build()
        .unwrap();
    let schema = Arc::new(SchemaBuilder::new().version(v1).build().unwrap());
    let store = MemoryKvStore::new();

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    let owner = tx.create_of_type(OWNER).unwrap();
    let victim = tx.create_of_type(OWNER).unwrap();
    let keeper = tx.create_of_type(OWNER).unwrap();
    tx.write_simple_field(owner, TOP, Value::Reference(Some(victim))).unwrap();
    tx.set_add(owner, REFS, Value::Reference(Some(victim))).unwrap();
    tx.set_add(owner, REFS, Value::Reference(Some(keeper))).unwrap();
    tx.list_push(owner, ORDER, Value::Reference(Some(keeper))).unwrap();
    tx.list_push(owner, ORDER, Value::Reference(Some(victim))).unwrap();
    tx.map_put(owner, BY_NAME, string("v"), Value::Reference(Some(victim))).unwrap();
    tx.map_put(owner, BY_NAME, string("k"), Value::Reference(Some(keeper))).unwrap();
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, schema, 1).unwrap();
    assert!(tx.delete(victim).unwrap());

    assert_eq!(
        tx.read_simple_field(owner, TOP, false).unwrap(),
        Value::Reference(None)
    );
    assert_eq!(
        tx.set_elements(owner, REFS).unwrap(),
        vec![Value::Reference(Some(keeper))]
    );
    assert_eq!(
        tx.list_elements(owner, ORDER).unwrap(),
        vec![Value::Reference(Some(keeper))]
    );
    assert_eq!(
        tx.map_entries(owner, BY_NAME).unwrap(),
        vec![(string("k"), Value::Reference(Some(keeper)))]
    );
    // Nothing points at the victim any more, by data or by index.
    assert!(tx
        .query_index(REF)
        .unwrap()
        .get(&Value::Reference(Some(victim)))
        .unwrap()
        .is_empty());
    tx.commit().unwrap();
}

#[test]
fn delete_cascade_terminates_on_reference_cycle() {
    const NODE: u32 = 40;
    const NEXT: u32 = 41;

    let v1 = SchemaVersionBuilder::new(1)
        .obj_type(
            ObjTypeBuilder::new(NODE, "node")
                .reference_field(NEXT, "next", DeleteAction::Delete),
        )
        .build()
        .unwrap();
    let schema = Arc::new(SchemaBuilder::new().version(v1).build().unwrap());
    let store = MemoryKvStore::new();

    let mut tx = Transaction::open(&store, schema, 1).unwrap();
    let a = tx.create_of_type(NODE).unwrap();
    let b = tx.create_of_type(NODE).unwrap();
    let c = tx.create_of_type(NODE).unwrap();
    tx.write_simple_field(a, NEXT, Value::Reference(Some(b))).unwrap();
    tx.write_simple_field(b, NEXT, Value::Reference(Some(c))).unwrap();
    tx.write_simple_field(c, NEXT, Value::Reference(Some(a))).unwrap();

    assert!(tx.delete(b).unwrap());
    for id in [a, b, c] {
        assert!(!tx.exists(id).unwrap());
    }
    tx.commit().unwrap();
    assert_eq!(store.len(), 0);
}

#[test]
fn migration_is_lazy_and_keeps_indexes_consistent() {
    const THING: u32 = 50;
    const LABEL: u32 = 51;
    const PRICE: u32 = 52;

    // v1: label unindexed, price present. v2: label indexed, price dropped.
    let v1 = SchemaVersionBuilder::new(1)
        .obj_type(
            ObjTypeBuilder::new(THING, "thing")
                .simple_field(LABEL, "label", ValueType::String, false)
                .simple_field(PRICE, "price", ValueType::Int, false),
        )
        .build()
        .unwrap();
    let v2 = SchemaVersionBuilder::new(2)
        .obj_type(
            ObjTypeBuilder::new(THING, "thing")
                .simple_field(LABEL, "label", ValueType::String, true),
        )
        .build()
        .unwrap();
    let schema = Arc::new(SchemaBuilder::new().version(v1).version(v2).build().unwrap());
    let store = MemoryKvStore::new();

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    let thing = tx.create_of_type(THING).unwrap();
    tx.write_simple_field(thing, LABEL, string("widget")).unwrap();
    tx.write_simple_field(thing, PRICE, Value::Int(99)).unwrap();
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 2).unwrap();
    // Untouched objects stay at their stored version.
    assert_eq!(tx.get_schema_version(thing).unwrap(), 1);
    assert!(tx
        .query_index(LABEL)
        .unwrap()
        .get(&string("widget"))
        .unwrap()
        .is_empty());

    // First access migrates: value kept, new index entry written, dropped
    // field reverts to its default.
    assert_eq!(tx.read_simple_field(thing, LABEL, true).unwrap(), string("widget"));
    assert_eq!(tx.get_schema_version(thing).unwrap(), 2);
    assert_eq!(
        tx.query_index(LABEL).unwrap().get(&string("widget")).unwrap(),
        BTreeSet::from([thing])
    );
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, schema, 2).unwrap();
    assert_eq!(tx.get_schema_version(thing).unwrap(), 2);
    assert!(matches!(
        tx.read_simple_field(thing, PRICE, false),
        Err(DbError::UnknownField { .. })
    ));
}

struct Recorder {
    seen: Mutex<Vec<(ObjId, BTreeSet<ObjId>, FieldChange)>>,
}

impl FieldChangeListener for Recorder {
    fn on_field_change(
        &self,
        _tx: &mut Transaction,
        id: ObjId,
        _storage_id: u32,
        _path: &[u32],
        referrers: &BTreeSet<ObjId>,
        change: &FieldChange,
    ) -> objdb_core::DbResult<()> {
        self.seen.lock().push((id, referrers.clone(), change.clone()));
        Ok(())
    }
}

#[test]
fn two_hop_back_tracking_over_committed_data() {
    const NODE: u32 = 60;
    const PARENT: u32 = 61;
    const LABEL: u32 = 62;

    let v1 = SchemaVersionBuilder::new(1)
        .obj_type(
            ObjTypeBuilder::new(NODE, "node")
                .reference_field(PARENT, "parent", DeleteAction::Nothing)
                .simple_field(LABEL, "label", ValueType::String, false),
        )
        .build()
        .unwrap();
    let schema = Arc::new(SchemaBuilder::new().version(v1).build().unwrap());
    let store = MemoryKvStore::new();

    let mut tx = Transaction::open(&store, Arc::clone(&schema), 1).unwrap();
    let a = tx.create_of_type(NODE).unwrap();
    let b = tx.create_of_type(NODE).unwrap();
    let c = tx.create_of_type(NODE).unwrap();
    tx.write_simple_field(a, PARENT, Value::Reference(Some(b))).unwrap();
    tx.write_simple_field(b, PARENT, Value::Reference(Some(c))).unwrap();
    tx.commit().unwrap();

    let mut tx = Transaction::open(&store, schema, 1).unwrap();
    let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
    tx.add_field_change_listener(LABEL, vec![PARENT, PARENT], recorder.clone());

    tx.write_simple_field(c, LABEL, string("root")).unwrap();
    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 1);
    let (id, referrers, change) = &seen[0];
    assert_eq!(*id, c);
    assert_eq!(*referrers, BTreeSet::from([a]));
    assert!(matches!(change, FieldChange::Simple { .. }));
}

#[test]
fn copy_tree_into_fresh_store() {
    let schema = library_schema(DeleteAction::Exception);
    let source_store = MemoryKvStore::new();
    let dest_store = MemoryKvStore::new();

    let mut source = Transaction::open(&source_store, Arc::clone(&schema), 1).unwrap();
    let author = source.create_of_type(AUTHOR).unwrap();
    let book = source.create_of_type(BOOK).unwrap();
    source.write_simple_field(author, A_NAME, string("Herbert")).unwrap();
    source.write_simple_field(book, B_TITLE, string("Dune")).unwrap();
    source
        .write_simple_field(book, B_AUTHOR, Value::Reference(Some(author)))
        .unwrap();

    let mut dest = Transaction::open(&dest_store, Arc::clone(&schema), 1).unwrap();
    let copied = source
        .copy_tree(&mut dest, book, &[vec![B_AUTHOR]], &mut CopyState::new())
        .unwrap();
    assert_eq!(copied, 2);
    dest.commit().unwrap();

    let mut check = Transaction::open(&dest_store, schema, 1).unwrap();
    assert_eq!(check.read_simple_field(book, B_TITLE, false).unwrap(), string("Dune"));
    assert_eq!(check.read_simple_field(author, A_NAME, false).unwrap(), string("Herbert"));
    assert_eq!(
        check.query_index(A_NAME).unwrap().get(&string("Herbert")).unwrap(),
        BTreeSet::from([author])
    );
}
