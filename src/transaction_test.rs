use super::*;
use std::sync::Arc;

use crate::backend::MemoryBackend;
use crate::object_store::ObjectStore;
use crate::Error;

fn store() -> Arc<Mutex<ObjectStore>> {
    let backend: Arc<Mutex<dyn crate::backend::Backend + Send>> = Arc::new(Mutex::new(MemoryBackend::new()));
    backend.lock().unwrap().create_table("t").unwrap();
    Arc::new(Mutex::new(ObjectStore::new("t", backend)))
}

#[test]
fn test_write_then_read_back_before_commit() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("a"), Value::Int(1)).unwrap();
    assert_eq!(tx.get(&Key::str("a")).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_commit_then_read_from_fresh_transaction() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("a"), Value::Int(1)).unwrap();
    assert!(tx.commit().unwrap());

    let tx2 = ObjectStore::begin(&store).unwrap();
    assert_eq!(tx2.get(&Key::str("a")).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_sibling_commit_conflict() {
    let store = store();
    let mut t1 = ObjectStore::begin(&store).unwrap();
    let mut t2 = ObjectStore::begin(&store).unwrap();

    t1.put(Key::str("a"), Value::Int(1)).unwrap();
    t2.put(Key::str("b"), Value::Int(2)).unwrap();

    assert!(t1.commit().unwrap());
    assert!(!t2.commit().unwrap());
    assert_eq!(t2.state(), TxState::Conflicted);
}

#[test]
fn test_nested_transaction_visible_only_after_child_commit() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    let mut child = tx.transaction().unwrap();

    child.put(Key::str("x"), Value::Int(42)).unwrap();
    assert_eq!(tx.get(&Key::str("x")).unwrap(), None);

    assert!(child.commit().unwrap());
    assert_eq!(tx.get(&Key::str("x")).unwrap(), Some(Value::Int(42)));

    let outside = ObjectStore::begin(&store).unwrap();
    assert_eq!(outside.get(&Key::str("x")).unwrap(), None);
}

#[test]
fn test_put_blocked_while_child_open() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    let _child = tx.transaction().unwrap();

    let err = tx.put(Key::str("a"), Value::Int(1)).unwrap_err();
    assert!(matches!(err, Error::NestedTransactionBlocked(_)));
}

#[test]
fn test_abort_discards_overlay() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("a"), Value::Int(1)).unwrap();
    tx.abort().unwrap();

    let tx2 = ObjectStore::begin(&store).unwrap();
    assert_eq!(tx2.get(&Key::str("a")).unwrap(), None);
}

#[test]
fn test_remove_and_truncate() {
    let store = store();
    let mut tx = ObjectStore::begin(&store).unwrap();
    tx.put(Key::str("a"), Value::Int(1)).unwrap();
    tx.put(Key::str("b"), Value::Int(2)).unwrap();
    tx.remove(&Key::str("a")).unwrap();
    assert_eq!(tx.get(&Key::str("a")).unwrap(), None);
    assert_eq!(tx.get(&Key::str("b")).unwrap(), Some(Value::Int(2)));

    tx.truncate().unwrap();
    assert_eq!(tx.get(&Key::str("b")).unwrap(), None);
}
