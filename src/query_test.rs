use super::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::backend::MemoryBackend;
use crate::key::KeyPath;
use crate::memindex::IndexDef;
use crate::object_store::ObjectStore;

fn person(age: i64, city: &str) -> Value {
    let mut m = BTreeMap::new();
    m.insert("age".to_string(), Value::Int(age));
    m.insert("city".to_string(), Value::Str(city.to_string()));
    Value::Map(m)
}

fn store() -> Arc<Mutex<ObjectStore>> {
    let backend: Arc<Mutex<dyn crate::backend::Backend + Send>> = Arc::new(Mutex::new(MemoryBackend::new()));
    backend.lock().unwrap().create_table("people").unwrap();
    let mut s = ObjectStore::new("people", backend);
    s.register_index(IndexDef {
        name: "age".to_string(),
        key_path: KeyPath::single("age"),
        multi_entry: false,
        unique: false,
    })
    .unwrap();
    s.register_index(IndexDef {
        name: "city".to_string(),
        key_path: KeyPath::single("city"),
        multi_entry: false,
        unique: false,
    })
    .unwrap();
    Arc::new(Mutex::new(s))
}

#[test]
fn test_range_query_over_one_index() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("p1"), person(20, "nyc")).unwrap();
    tx.put(Key::str("p2"), person(30, "sf")).unwrap();
    tx.put(Key::str("p3"), person(40, "nyc")).unwrap();

    let q = Query::range("age", KeyRange::bound(Key::int(20), Key::int(35), false, false));
    let mut keys = q.keys(&tx).unwrap();
    keys.sort();
    assert_eq!(keys, vec![Key::str("p1"), Key::str("p2")]);
}

#[test]
fn test_and_intersects_two_indices() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("p1"), person(20, "nyc")).unwrap();
    tx.put(Key::str("p2"), person(30, "nyc")).unwrap();
    tx.put(Key::str("p3"), person(20, "sf")).unwrap();

    let q = Query::and(vec![
        Query::range("age", KeyRange::only(Key::int(20))),
        Query::range("city", KeyRange::only(Key::str("nyc"))),
    ]);
    assert_eq!(q.keys(&tx).unwrap(), vec![Key::str("p1")]);
}

#[test]
fn test_or_unions_two_indices() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("p1"), person(20, "nyc")).unwrap();
    tx.put(Key::str("p2"), person(30, "sf")).unwrap();
    tx.put(Key::str("p3"), person(40, "la")).unwrap();

    let q = Query::or(vec![
        Query::range("age", KeyRange::only(Key::int(20))),
        Query::range("city", KeyRange::only(Key::str("sf"))),
    ]);
    let mut keys = q.keys(&tx).unwrap();
    keys.sort();
    assert_eq!(keys, vec![Key::str("p1"), Key::str("p2")]);
}

#[test]
fn test_min_max_and_values_resolve_through_transaction() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("p1"), person(20, "nyc")).unwrap();
    tx.put(Key::str("p2"), person(30, "sf")).unwrap();

    assert_eq!(Query::min("age").keys(&tx).unwrap(), vec![Key::str("p1")]);
    assert_eq!(Query::max("age").keys(&tx).unwrap(), vec![Key::str("p2")]);

    let values = Query::min("age").values(&tx).unwrap();
    assert_eq!(values, vec![person(20, "nyc")]);
}
