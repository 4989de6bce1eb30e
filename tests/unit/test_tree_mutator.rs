//! Unit tests for merge, replace and delete on configuration trees

use serde_json::{json, Value};
use treeconf::{deep_merge, delete_at_path, lookup, replace_at_path, ConfigTree, KeyPath};

fn tree(value: Value) -> ConfigTree {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[test]
fn test_merge_with_empty_patch_is_identity() {
    let base = tree(json!({ "a": { "b": [1, 2] }, "c": null }));
    assert_eq!(deep_merge(base.clone(), ConfigTree::new()), base);
}

#[test]
fn test_merge_into_empty_base_yields_patch() {
    let patch = tree(json!({ "a": { "b": 1 } }));
    assert_eq!(deep_merge(ConfigTree::new(), patch.clone()), patch);
}

#[test]
fn test_merge_never_combines_sequences() {
    let merged = deep_merge(
        tree(json!({ "hosts": ["a", "b"] })),
        tree(json!({ "hosts": ["c"] })),
    );
    assert_eq!(merged["hosts"], json!(["c"]));
}

#[test]
fn test_replace_then_lookup_returns_value() {
    let base = tree(json!({ "a": { "b": "scalar" }, "s": [1] }));

    for raw in ["a", "a.b", "a.b.c", "s.t", "new.deep.path.here"] {
        let path = KeyPath::parse(raw);
        let value = json!({ "set-at": raw });
        let result = replace_at_path(base.clone(), &path, value.clone());
        assert_eq!(lookup(&result, &path), Some(&value), "path {raw}");
    }
}

#[test]
fn test_replace_keeps_unrelated_siblings() {
    let base = tree(json!({ "a": { "b": 1, "c": 2 }, "d": 3 }));
    let result = replace_at_path(base, &KeyPath::parse("a.b"), json!(10));

    assert_eq!(Value::Object(result), json!({ "a": { "b": 10, "c": 2 }, "d": 3 }));
}

#[test]
fn test_delete_is_idempotent() {
    let base = tree(json!({ "a": { "b": 1, "c": 2 } }));
    let path = KeyPath::parse("a.b");

    let once = delete_at_path(base, &path);
    let twice = delete_at_path(once.clone(), &path);

    assert_eq!(once, twice);
    assert_eq!(Value::Object(twice), json!({ "a": { "c": 2 } }));
}
