//! End-to-end behaviour of a file-backed configuration resource

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use treeconf::{
    ConfigResource, ConfigTree, FileGateway, PersistenceConfig, PersistenceError,
    PersistenceGateway, TreeCache, TreeConfError,
};

fn tree(value: Value) -> ConfigTree {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn on_disk(path: &Path) -> Value {
    Value::Object(FileGateway::default().read_tree(path))
}

#[test]
fn test_flat_patch_creates_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let echoed = resource.patch(json!({ "a.b": 1 }), false).unwrap();

    assert_eq!(echoed, json!({ "a.b": 1 }));
    assert_eq!(on_disk(&path), json!({ "a": { "b": 1 } }));
    assert_eq!(Value::Object(resource.fetch(false)), json!({ "a.b": 1 }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "[a]\nb = 1\n");
}

#[test]
fn test_patch_key_overwrites_existing_leaf() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[x]\ny = \"old\"\n").unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let result = resource.patch_key("x.y", json!("new")).unwrap();

    assert_eq!(Value::Object(result), json!({ "x": { "y": "new" } }));
    assert_eq!(on_disk(&path), json!({ "x": { "y": "new" } }));
}

#[test]
fn test_patch_key_replaces_scalar_with_subtree() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"x": 5}"#).unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let result = resource.patch_key("x.y", json!("new")).unwrap();

    assert_eq!(Value::Object(result), json!({ "x": { "y": "new" } }));
    assert_eq!(on_disk(&path), json!({ "x": { "y": "new" } }));
}

#[test]
fn test_delete_key_retains_parent_node() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"a": {"b": 1, "c": 2}}"#).unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let result = resource.delete_key("a.b").unwrap();

    assert_eq!(Value::Object(result), json!({ "a": { "c": 2 } }));
    assert_eq!(on_disk(&path), json!({ "a": { "c": 2 } }));
}

#[test]
fn test_delete_empty_path_leaves_file_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    let original = "{\"a\":1}";
    fs::write(&path, original).unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let result = resource.delete_key("").unwrap();

    assert_eq!(Value::Object(result), json!({ "a": 1 }));
    // Still the compact original, so nothing was rewritten.
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn test_over_write_is_identity() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"keep": {"me": true}}"#).unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());
    let replacement = tree(json!({ "only": { "this": [1, 2, 3] }, "n": null }));

    let result = resource.over_write(replacement.clone()).unwrap();

    assert_eq!(result, replacement);
    assert_eq!(resource.fetch(true), replacement);
    assert_eq!(on_disk(&path), Value::Object(replacement));
}

#[test]
fn test_corrupt_file_is_patched_from_empty() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "[[[ definitely not toml").unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());
    assert!(resource.fetch(true).is_empty());

    resource.patch(json!({ "fresh": { "start": true } }), true).unwrap();

    assert_eq!(on_disk(&path), json!({ "fresh": { "start": true } }));
}

#[test]
fn test_mutations_start_from_disk_not_memory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"a": 1}"#).unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    fs::write(&path, r#"{"a": 1, "external": "edit"}"#).unwrap();
    resource.patch_key("b", json!(2)).unwrap();

    assert_eq!(
        Value::Object(resource.fetch(true)),
        json!({ "a": 1, "external": "edit", "b": 2 })
    );
}

#[test]
fn test_write_error_surfaces_and_keeps_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not-a-dir");
    fs::write(&blocker, "plain file").unwrap();
    let path = blocker.join("config.toml");
    let mut resource =
        ConfigResource::with_snapshot(&path, FileGateway::default(), tree(json!({ "prev": 1 })));

    let err = resource.patch_key("a", json!(1)).unwrap_err();

    assert!(matches!(err, TreeConfError::Write(PersistenceError::IoError(_))));
    assert_eq!(Value::Object(resource.fetch(true)), json!({ "prev": 1 }));
}

#[test]
fn test_null_in_toml_is_a_write_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    let err = resource.patch_key("a", Value::Null).unwrap_err();

    assert!(matches!(
        err,
        TreeConfError::Write(PersistenceError::UnsupportedValue { .. })
    ));
    assert!(!path.exists());
}

#[test]
fn test_writes_invalidate_shared_cache() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let cache = Arc::new(TreeCache::new());
    let reader = FileGateway::default();
    let mut resource = ConfigResource::open(
        &path,
        FileGateway::with_invalidator(PersistenceConfig::default(), cache.clone()),
    );

    resource.patch_key("feature.enabled", json!(false)).unwrap();
    assert_eq!(cache.get_or_load(&path, &reader)["feature"], json!({ "enabled": false }));

    resource.patch_key("feature.enabled", json!(true)).unwrap();
    assert!(!cache.contains(&path));
    assert_eq!(cache.get_or_load(&path, &reader)["feature"], json!({ "enabled": true }));
}

#[test]
fn test_backups_written_before_each_change() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let backup_dir = temp_dir.path().join("backups");
    let gateway = FileGateway::new(PersistenceConfig {
        backup_dir: Some(backup_dir.clone()),
        ..PersistenceConfig::default()
    });
    let mut resource = ConfigResource::open(&path, gateway);

    resource.patch_key("v", json!(1)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    resource.patch_key("v", json!(2)).unwrap();

    let backups: Vec<_> = fs::read_dir(&backup_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("backup"))
        .collect();

    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "v = 1\n");
}

#[test]
fn test_backup_pruning_failure_still_commits() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let backup_dir = temp_dir.path().join("backups");
    fs::write(&path, "v = 0\n").unwrap();
    fs::create_dir_all(backup_dir.join("config.toml.20200101T000000.000000.backup")).unwrap();
    let gateway = FileGateway::new(PersistenceConfig {
        backup_dir: Some(backup_dir),
        max_backups: 0,
        ..PersistenceConfig::default()
    });
    let mut resource = ConfigResource::open(&path, gateway);

    let result = resource.patch_key("v", json!(1)).unwrap();

    assert_eq!(Value::Object(result), json!({ "v": 1 }));
    assert_eq!(on_disk(&path), json!({ "v": 1 }));
    assert_eq!(Value::Object(resource.fetch(true)), on_disk(&path));
}

#[test]
fn test_backup_failure_leaves_file_and_snapshot_alone() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    let backup_dir = temp_dir.path().join("backups");
    fs::write(&path, "v = 0\n").unwrap();
    // A regular file where the backup directory should be.
    fs::write(&backup_dir, "not a directory").unwrap();
    let gateway = FileGateway::new(PersistenceConfig {
        backup_dir: Some(backup_dir),
        ..PersistenceConfig::default()
    });
    let mut resource = ConfigResource::open(&path, gateway);

    let err = resource.patch_key("v", json!(1)).unwrap_err();

    assert!(matches!(err, TreeConfError::Write(_)));
    assert_eq!(fs::read_to_string(&path).unwrap(), "v = 0\n");
    assert_eq!(Value::Object(resource.fetch(true)), json!({ "v": 0 }));
}

#[test]
fn test_unrelated_patch_keeps_toml_datetime() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "created = 1979-05-27T07:32:00Z\n").unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());

    resource.patch_key("other", json!(2)).unwrap();

    let written: toml::Table = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(written["created"].is_datetime());
    assert_eq!(resource.get("created"), Some(&json!("1979-05-27T07:32:00Z")));
}

#[test]
fn test_non_finite_float_does_not_block_patches() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "ratio = nan\nother = 1\n").unwrap();
    let mut resource = ConfigResource::open(&path, FileGateway::default());
    assert_eq!(resource.get("ratio"), Some(&json!("nan")));

    let result = resource.patch_key("other", json!(2)).unwrap();

    assert_eq!(Value::Object(result), json!({ "ratio": "nan", "other": 2 }));
    let written: toml::Table = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(written["ratio"].as_float().is_some_and(f64::is_nan));
    assert_eq!(written["other"].as_integer(), Some(2));
}
