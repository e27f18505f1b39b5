//! End-to-end scenarios exercised against the reference in-memory
//! backend, driving the public `Database`/`ObjectStore`/`Transaction`
//! facade rather than any single module in isolation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use txkv::{
    commit_combined, Backend, Database, IndexOptions, Key, KeyPath, KeyRange, MemoryBackend, Query, Result,
    StoreOptions, TxState, Value,
};

fn backend() -> Arc<Mutex<dyn Backend + Send>> {
    Arc::new(Mutex::new(MemoryBackend::new()))
}

#[test]
fn scenario_1_open_write_commit_read() {
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("s", StoreOptions::default())
    };
    let db = Database::connect("db1", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx1 = db.transaction("s").unwrap();
    tx1.put(Key::str("k"), Value::Str("v".to_string())).unwrap();
    assert!(tx1.commit().unwrap());

    let s = db.transaction("s").unwrap();
    assert_eq!(s.get(&Key::str("k")).unwrap(), Some(Value::Str("v".to_string())));
}

#[test]
fn scenario_2_sibling_conflict() {
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("s", StoreOptions::default())
    };
    let db = Database::connect("db2", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx1 = db.transaction("s").unwrap();
    let mut tx2 = db.transaction("s").unwrap();

    tx1.put(Key::int(1), Value::Int(1)).unwrap();
    assert!(tx1.commit().unwrap());

    tx2.put(Key::int(1), Value::Int(2)).unwrap();
    assert!(!tx2.commit().unwrap());
    assert_eq!(tx2.state(), TxState::Conflicted);

    let s = db.transaction("s").unwrap();
    assert_eq!(s.get(&Key::int(1)).unwrap(), Some(Value::Int(1)));
}

fn person(id: &str, age: i64) -> Value {
    let mut m = BTreeMap::new();
    m.insert("id".to_string(), Value::Str(id.to_string()));
    m.insert("age".to_string(), Value::Int(age));
    Value::Map(m)
}

#[test]
fn scenario_3_range_query_with_index() {
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("people", StoreOptions::default())?;
        db.create_index("people", "age", KeyPath::single("age"), IndexOptions::default())
    };
    let db = Database::connect("db3", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx = db.transaction("people").unwrap();
    tx.put(Key::str("p1"), person("p1", 20)).unwrap();
    tx.put(Key::str("p2"), person("p2", 25)).unwrap();
    tx.put(Key::str("p3"), person("p3", 30)).unwrap();
    assert!(tx.commit().unwrap());

    let tx = db.transaction("people").unwrap();
    let q = Query::range("age", KeyRange::bound(Key::int(20), Key::int(30), true, true));
    assert_eq!(q.keys(&tx).unwrap(), vec![Key::str("p2")]);

    let top = Query::range("age", KeyRange::only(Key::int(30))).values(&tx).unwrap();
    match &top[0] {
        Value::Map(m) => assert_eq!(m.get("id"), Some(&Value::Str("p3".to_string()))),
        _ => panic!("expected a map"),
    }
}

#[test]
fn scenario_4_multi_entry_index() {
    let tags_of = |values: &[&str]| {
        let mut m = BTreeMap::new();
        m.insert(
            "t".to_string(),
            Value::Seq(values.iter().map(|s| Value::Str(s.to_string())).collect()),
        );
        Value::Map(m)
    };
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("tags", StoreOptions::default())?;
        let opts = IndexOptions {
            multi_entry: true,
            ..IndexOptions::default()
        };
        db.create_index("tags", "t", KeyPath::single("t"), opts)
    };
    let db = Database::connect("db4", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx = db.transaction("tags").unwrap();
    tx.put(Key::str("a"), tags_of(&["x", "y"])).unwrap();
    assert!(tx.commit().unwrap());

    let tx = db.transaction("tags").unwrap();
    assert_eq!(
        Query::range("t", KeyRange::only(Key::str("x"))).keys(&tx).unwrap(),
        vec![Key::str("a")]
    );
    assert_eq!(
        Query::range("t", KeyRange::only(Key::str("y"))).keys(&tx).unwrap(),
        vec![Key::str("a")]
    );
    drop(tx);

    let mut tx = db.transaction("tags").unwrap();
    tx.put(Key::str("a"), tags_of(&["x"])).unwrap();
    assert!(tx.commit().unwrap());

    let tx = db.transaction("tags").unwrap();
    assert!(Query::range("t", KeyRange::only(Key::str("y")))
        .keys(&tx)
        .unwrap()
        .is_empty());
}

#[test]
fn scenario_5_combined_atomic_commit() {
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("a", StoreOptions::default())?;
        db.create_object_store("b", StoreOptions::default())
    };
    let db = Database::connect("db5", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx_a = db.transaction("a").unwrap();
    let mut tx_b = db.transaction("b").unwrap();
    tx_a.put(Key::str("k"), Value::Int(1)).unwrap();
    tx_b.put(Key::str("k"), Value::Int(2)).unwrap();

    let mut txs = vec![tx_a, tx_b];
    assert!(commit_combined(&mut txs).unwrap());

    let a = db.transaction("a").unwrap();
    let b = db.transaction("b").unwrap();
    assert_eq!(a.get(&Key::str("k")).unwrap(), Some(Value::Int(1)));
    assert_eq!(b.get(&Key::str("k")).unwrap(), Some(Value::Int(2)));
}

#[test]
fn scenario_6_nested_transaction() {
    let mut hook = |db: &mut Database, _old: u32, _new: u32| -> Result<()> {
        db.create_object_store("s", StoreOptions::default())
    };
    let db = Database::connect("db6", 1, backend(), 0, Some(&mut hook)).unwrap();

    let mut tx = db.transaction("s").unwrap();
    let mut child = tx.transaction().unwrap();

    child.put(Key::str("x"), Value::Int(42)).unwrap();
    assert_eq!(tx.get(&Key::str("x")).unwrap(), None);

    let err = tx.put(Key::str("y"), Value::Int(1)).unwrap_err();
    match err {
        txkv::Error::NestedTransactionBlocked(_) => {}
        other => panic!("expected NestedTransactionBlocked, got {:?}", other),
    }

    let outside = db.transaction("s").unwrap();
    assert_eq!(outside.get(&Key::str("x")).unwrap(), None);

    assert!(child.commit().unwrap());
    assert_eq!(tx.get(&Key::str("x")).unwrap(), Some(Value::Int(42)));
}
