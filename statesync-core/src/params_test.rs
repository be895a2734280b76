use serde_json::json;

use super::params::*;

#[test]
fn test_insertion_order_is_preserved() {
    let params = Params::new().with("z", 1).with("a", 2).with("m", 3);
    let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
}

#[test]
fn test_insert_replaces_without_reordering() {
    let params = Params::new().with("z", 1).with("a", 2).with("z", 9);
    let entries: Vec<(&str, i64)> =
        params.iter().map(|(k, v)| (k, v.as_i64().unwrap())).collect();
    assert_eq!(entries, vec![("z", 9), ("a", 2)]);
}

#[test]
fn test_stable_key_sorts_keys() {
    let forward = Params::new().with("page", 1).with("q", "ann");
    let backward = Params::new().with("q", "ann").with("page", 1);
    assert_eq!(forward.stable_key(), backward.stable_key());
    assert_eq!(forward.stable_key(), "{page=1,q=ann}");
}

#[test]
fn test_stable_key_distinguishes_values() {
    let one = Params::new().with("page", 1);
    let two = Params::new().with("page", 2);
    assert_ne!(one.stable_key(), two.stable_key());
    assert_eq!(Params::new().stable_key(), "{}");
}

#[test]
fn test_take_force_strips_and_reports() {
    let mut params = Params::new().with("page", 1).with("_force", true);
    assert!(params.take_force());
    assert!(params.get("_force").is_none());
    assert_eq!(params.stable_key(), "{page=1}");

    // Stripping is idempotent
    assert!(!params.take_force());
}

#[test]
fn test_take_force_normalizes_values() {
    let mut falsy = Params::new().with("_force", false);
    assert!(!falsy.take_force());

    let mut zero = Params::new().with("_force", 0);
    assert!(!zero.take_force());

    let mut null = Params::new().with("_force", json!(null));
    assert!(!null.take_force());

    let mut truthy = Params::new().with("_force", 1);
    assert!(truthy.take_force());

    let mut string = Params::new().with("_force", "yes");
    assert!(string.take_force());
}

#[test]
fn test_id_value_normalizes_numbers() {
    assert_eq!(Params::id("u1").id_value().as_deref(), Some("u1"));
    assert_eq!(
        Params::new().with("id", 42).id_value().as_deref(),
        Some("42")
    );
    assert_eq!(Params::new().with("page", 1).id_value(), None);
}
