use super::*;
use std::collections::BTreeSet;

use crate::backend::{Backend, MemoryBackend};
use crate::key::KeyPath;

fn age_def() -> IndexDef {
    IndexDef {
        name: "age".to_string(),
        key_path: KeyPath::single("age"),
        multi_entry: false,
        unique: false,
    }
}

fn person(age: i64) -> Value {
    let mut m = std::collections::BTreeMap::new();
    m.insert("age".to_string(), Value::Int(age));
    Value::Map(m)
}

#[test]
fn test_put_tracks_insert_and_remove_diff() {
    let mut ti = TransactionIndex::new("people", age_def());
    ti.put(&Key::str("p1"), &person(20), None).unwrap();
    ti.put(&Key::str("p1"), &person(25), Some(&person(20))).unwrap();

    let delta = ti.take_delta(false);
    assert_eq!(delta.removed, vec![(Key::int(20), Key::str("p1"))]);
    assert_eq!(delta.inserted, vec![(Key::int(25), Key::str("p1"))]);
}

#[test]
fn test_keys_unions_backend_and_new_side_minus_removed() {
    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    backend.put("people", Key::str("p1"), person(20)).unwrap();

    let mut ti = TransactionIndex::new("people", age_def());
    ti.put(&Key::str("p2"), &person(25), None).unwrap();

    let removed = BTreeSet::new();
    let modified = BTreeSet::new();
    let keys = ti
        .keys(&mut backend, &KeyRange::all(), false, &removed, &modified)
        .unwrap();
    assert_eq!(keys, vec![Key::str("p1"), Key::str("p2")]);

    let mut removed_p1 = BTreeSet::new();
    removed_p1.insert(Key::str("p1"));
    let keys = ti
        .keys(&mut backend, &KeyRange::all(), false, &removed_p1, &modified)
        .unwrap();
    assert_eq!(keys, vec![Key::str("p2")]);
}

#[test]
fn test_keys_skips_backend_when_truncated() {
    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    backend.put("people", Key::str("p1"), person(20)).unwrap();

    let mut ti = TransactionIndex::new("people", age_def());
    ti.put(&Key::str("p2"), &person(25), None).unwrap();

    let removed = BTreeSet::new();
    let modified = BTreeSet::new();
    let keys = ti
        .keys(&mut backend, &KeyRange::all(), true, &removed, &modified)
        .unwrap();
    assert_eq!(keys, vec![Key::str("p2")]);
}

#[test]
fn test_merge_from_replays_child_pairs() {
    let mut parent = TransactionIndex::new("people", age_def());
    let mut child = TransactionIndex::new("people", age_def());
    child.put(&Key::str("p1"), &person(20), None).unwrap();

    parent.merge_from(&mut child);

    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    let empty = BTreeSet::new();
    let keys = parent
        .keys(&mut backend, &KeyRange::all(), false, &empty, &empty)
        .unwrap();
    assert_eq!(keys, vec![Key::str("p1")]);

    let delta = parent.take_delta(false);
    assert_eq!(delta.inserted, vec![(Key::int(20), Key::str("p1"))]);
}

#[test]
fn test_min_keys_picks_the_more_extreme_side() {
    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    backend.put("people", Key::str("backend_min"), person(20)).unwrap();

    // overlay's own minimum (25) is less extreme than the backend's
    // (20) — only the backend side should come back, not a union.
    let mut ti = TransactionIndex::new("people", age_def());
    ti.put(&Key::str("overlay_min"), &person(25), None).unwrap();

    let empty = BTreeSet::new();
    let mins = ti
        .min_keys(&mut backend, &KeyRange::all(), false, &empty, &empty)
        .unwrap();
    assert_eq!(mins, vec![Key::str("backend_min")]);

    let maxs = ti
        .max_keys(&mut backend, &KeyRange::all(), false, &empty, &empty)
        .unwrap();
    assert_eq!(maxs, vec![Key::str("overlay_min")]);
}

#[test]
fn test_min_keys_unions_on_exact_tie() {
    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    backend.put("people", Key::str("p1"), person(20)).unwrap();

    let mut ti = TransactionIndex::new("people", age_def());
    ti.put(&Key::str("p2"), &person(20), None).unwrap();

    let empty = BTreeSet::new();
    let mut mins = ti
        .min_keys(&mut backend, &KeyRange::all(), false, &empty, &empty)
        .unwrap();
    mins.sort();
    assert_eq!(mins, vec![Key::str("p1"), Key::str("p2")]);
}

#[test]
fn test_min_keys_ignores_filtered_out_backend_extreme() {
    let mut backend = MemoryBackend::new();
    backend.create_table("people").unwrap();
    backend.create_index("people", age_def()).unwrap();
    backend.put("people", Key::str("p1"), person(20)).unwrap();

    let ti = TransactionIndex::new("people", age_def());
    let mut removed = BTreeSet::new();
    removed.insert(Key::str("p1"));

    let mins = ti
        .min_keys(&mut backend, &KeyRange::all(), false, &removed, &BTreeSet::new())
        .unwrap();
    assert!(mins.is_empty());
}

#[test]
fn test_check_unique_constraint_against_backend() {
    let mut backend = MemoryBackend::new();
    let unique_def = IndexDef {
        name: "age".to_string(),
        key_path: KeyPath::single("age"),
        multi_entry: false,
        unique: true,
    };
    let unique_def_2 = IndexDef {
        name: "age".to_string(),
        key_path: KeyPath::single("age"),
        multi_entry: false,
        unique: true,
    };
    backend.create_table("people").unwrap();
    backend.create_index("people", unique_def).unwrap();
    backend.put("people", Key::str("p1"), person(20)).unwrap();

    let ti = TransactionIndex::new("people", unique_def_2);
    assert!(!ti.check_unique_constraint(&mut backend, &Key::int(20)).unwrap());
    assert!(ti.check_unique_constraint(&mut backend, &Key::int(99)).unwrap());
}
