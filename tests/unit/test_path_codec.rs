//! Unit tests for dot-path flattening and expansion

use serde_json::{json, Value};
use treeconf::{build_nested, flatten, lookup, unflatten, ConfigTree, KeyPath};

fn tree(value: Value) -> ConfigTree {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// Trees without empty subtrees or dotted keys, so flattening loses nothing
fn sample_trees() -> Vec<ConfigTree> {
    vec![
        tree(json!({})),
        tree(json!({ "leaf": "value" })),
        tree(json!({
            "api-tools": {
                "config_file": "config/autoload/api-tools.global.php",
                "db-connected": { "enabled": false, "entities": ["user", "post"] },
            },
        })),
        tree(json!({
            "a": { "b": { "c": { "d": { "e": 1 } } } },
            "n": null,
            "f": 1.5,
            "list": [{ "inside": "array" }],
        })),
    ]
}

#[test]
fn test_flatten_unflatten_round_trip() {
    for original in sample_trees() {
        let flat = flatten(&original);
        let rebuilt = unflatten(&flat).unwrap();
        assert_eq!(rebuilt, original);
    }
}

#[test]
fn test_flat_view_contains_only_leaves() {
    for original in sample_trees() {
        for (key, value) in flatten(&original) {
            assert!(!value.is_object(), "{key} maps to a tree node");
            assert_eq!(lookup(&original, &KeyPath::parse(&key)), Some(&value));
        }
    }
}

#[test]
fn test_sequences_are_leaves() {
    let flat = flatten(&tree(json!({ "list": [{ "inside": "array" }] })));

    assert_eq!(flat.len(), 1);
    assert_eq!(flat["list"], json!([{ "inside": "array" }]));
}

#[test]
fn test_build_nested_matches_path_depth() {
    let path = KeyPath::parse("one.two.three");
    let branch = build_nested(&path, json!("leaf"));

    assert_eq!(lookup(&branch, &path), Some(&json!("leaf")));
    assert_eq!(flatten(&branch).len(), 1);
}

#[test]
fn test_unflatten_merges_shared_prefixes() {
    let flat = tree(json!({
        "db.host": "localhost",
        "db.port": 5432,
        "db.pool.size": 4,
    }));

    assert_eq!(
        Value::Object(unflatten(&flat).unwrap()),
        json!({ "db": { "host": "localhost", "port": 5432, "pool": { "size": 4 } } })
    );
}

#[test]
fn test_later_flat_entry_wins_on_conflict() {
    let flat = tree(json!({ "a": 5, "a.b": 1 }));
    assert_eq!(Value::Object(unflatten(&flat).unwrap()), json!({ "a": { "b": 1 } }));

    let flat = tree(json!({ "a.b": 1, "a": 5 }));
    assert_eq!(Value::Object(unflatten(&flat).unwrap()), json!({ "a": 5 }));
}
