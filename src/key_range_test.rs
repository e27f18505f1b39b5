use super::*;

#[test]
fn test_contains_bounded() {
    let range = KeyRange::bound(Key::Int(20), Key::Int(30), false, false);
    assert!(!range.contains(&Key::Int(19)));
    assert!(range.contains(&Key::Int(20)));
    assert!(range.contains(&Key::Int(25)));
    assert!(range.contains(&Key::Int(30)));
    assert!(!range.contains(&Key::Int(31)));
}

#[test]
fn test_contains_open_endpoints() {
    let range = KeyRange::bound(Key::Int(20), Key::Int(30), true, true);
    assert!(!range.contains(&Key::Int(20)));
    assert!(range.contains(&Key::Int(21)));
    assert!(!range.contains(&Key::Int(30)));
}

#[test]
fn test_only_is_exact() {
    let range = KeyRange::only(Key::Int(7));
    assert_eq!(range.is_exact(), Some(&Key::Int(7)));
    assert!(range.contains(&Key::Int(7)));
    assert!(!range.contains(&Key::Int(8)));
}

#[test]
fn test_all_contains_everything() {
    let range = KeyRange::all();
    assert!(range.contains(&Key::Int(i64::MIN)));
    assert!(range.contains(&Key::Str("anything".into())));
}

#[test]
fn test_one_sided_bounds() {
    let lower = KeyRange::lower_bound(Key::Int(10), false);
    assert!(!lower.contains(&Key::Int(9)));
    assert!(lower.contains(&Key::Int(10)));

    let upper = KeyRange::upper_bound(Key::Int(10), true);
    assert!(upper.contains(&Key::Int(9)));
    assert!(!upper.contains(&Key::Int(10)));
}
