use super::*;
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, MemoryBackend};
use crate::key::{Key, Value};
use crate::Error;

fn store_with_max_stack(max: usize) -> Arc<Mutex<ObjectStore>> {
    let backend: Arc<Mutex<dyn Backend + Send>> = Arc::new(Mutex::new(MemoryBackend::new()));
    backend.lock().unwrap().create_table("t").unwrap();
    Arc::new(Mutex::new(ObjectStore::new("t", backend).with_max_stack_size(max)))
}

#[test]
fn test_reader_keeps_committed_layer_on_stack() {
    let store = store_with_max_stack(10);
    let reader = ObjectStore::begin(&store).unwrap();

    let mut writer = ObjectStore::begin(&store).unwrap();
    writer.put(Key::str("a"), Value::Int(1)).unwrap();
    assert!(writer.commit().unwrap());

    // reader opened before the commit must not see it.
    assert_eq!(reader.get(&Key::str("a")).unwrap(), None);

    // a fresh transaction reads through the still-unflushed layer.
    let fresh = ObjectStore::begin(&store).unwrap();
    assert_eq!(fresh.get(&Key::str("a")).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_collapse_flattens_once_last_reader_leaves() {
    let store = store_with_max_stack(10);
    let mut reader = ObjectStore::begin(&store).unwrap();

    let mut writer = ObjectStore::begin(&store).unwrap();
    writer.put(Key::str("a"), Value::Int(1)).unwrap();
    assert!(writer.commit().unwrap());

    assert_eq!(store.lock().unwrap().stack.len(), 1);

    reader.abort().unwrap();
    assert_eq!(store.lock().unwrap().stack.len(), 0);

    let fresh = ObjectStore::begin(&store).unwrap();
    assert_eq!(fresh.get(&Key::str("a")).unwrap(), Some(Value::Int(1)));
}

#[test]
fn test_conflicted_commit_still_releases_its_base() {
    let store = store_with_max_stack(1);

    let mut t1 = ObjectStore::begin(&store).unwrap();
    let mut t2 = ObjectStore::begin(&store).unwrap();

    t1.put(Key::str("a"), Value::Int(1)).unwrap();
    assert!(t1.commit().unwrap());

    t2.put(Key::str("b"), Value::Int(2)).unwrap();
    assert!(!t2.commit().unwrap());

    // the conflicted commit must still decrement its base's open
    // count and let the stalled layer collapse, or the stack never
    // flattens and every later commit spuriously overflows.
    assert_eq!(store.lock().unwrap().stack.len(), 0);

    let mut t3 = ObjectStore::begin(&store).unwrap();
    t3.put(Key::str("c"), Value::Int(3)).unwrap();
    assert!(t3.commit().unwrap());
}

#[test]
fn test_stack_overflow_is_retryable() {
    let store = store_with_max_stack(1);
    let mut reader = ObjectStore::begin(&store).unwrap();

    let mut w1 = ObjectStore::begin(&store).unwrap();
    w1.put(Key::str("a"), Value::Int(1)).unwrap();
    assert!(w1.commit().unwrap());

    let mut w2 = ObjectStore::begin(&store).unwrap();
    w2.put(Key::str("b"), Value::Int(2)).unwrap();
    let err = w2.commit().unwrap_err();
    assert!(matches!(err, Error::StackOverflow(_)));

    // tx is still retryable: committing again after the reader leaves
    // lets the stalled layer collapse and frees room to push.
    reader.abort().unwrap();
    assert!(w2.commit().unwrap());
}
