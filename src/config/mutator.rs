//! Tree mutations addressed by [`KeyPath`].
//!
//! Public functions take a tree by value and hand back the mutated tree. The
//! recursion underneath works on an exclusively borrowed level at a time.

use super::path::{build_nested, KeyPath};
use super::{ConfigTree, ConfigValue};
use serde_json::Value;

/// Recursively merge `patch` into `base`.
///
/// Where both sides hold a tree the merge descends; in every other case
/// (scalars, sequences, type mismatches) the patch value replaces the base.
pub fn deep_merge(mut base: ConfigTree, patch: ConfigTree) -> ConfigTree {
    for (key, patch_value) in patch {
        match base.get_mut(&key) {
            Some(Value::Object(base_child)) if patch_value.is_object() => {
                if let Value::Object(patch_child) = patch_value {
                    let child = std::mem::take(base_child);
                    *base_child = deep_merge(child, patch_child);
                }
            }
            _ => {
                base.insert(key, patch_value);
            }
        }
    }
    base
}

/// Set `value` at `path`, replacing any leaf that sits on the way.
///
/// An empty path leaves the tree untouched.
pub fn replace_at_path(mut tree: ConfigTree, path: &KeyPath, value: ConfigValue) -> ConfigTree {
    if let Some((key, rest)) = path.segments().split_first() {
        replace_in(&mut tree, key, rest, value);
    }
    tree
}

fn replace_in(tree: &mut ConfigTree, key: &str, rest: &[String], value: ConfigValue) {
    let Some((next, remaining)) = rest.split_first() else {
        tree.insert(key.to_string(), value);
        return;
    };

    match tree.get_mut(key) {
        Some(Value::Object(child)) => replace_in(child, next, remaining, value),
        // Absent or a leaf: the whole position becomes a fresh branch.
        _ => {
            let branch = build_nested(&KeyPath::from(rest.to_vec()), value);
            tree.insert(key.to_string(), Value::Object(branch));
        }
    }
}

/// Remove the entry at `path` if it exists.
///
/// Missing segments and leaf intermediates stop the walk silently. Parents
/// left empty by the removal are kept.
pub fn delete_at_path(mut tree: ConfigTree, path: &KeyPath) -> ConfigTree {
    if let Some((key, rest)) = path.segments().split_first() {
        delete_in(&mut tree, key, rest);
    }
    tree
}

fn delete_in(tree: &mut ConfigTree, key: &str, rest: &[String]) {
    let Some((next, remaining)) = rest.split_first() else {
        tree.shift_remove(key);
        return;
    };

    if let Some(Value::Object(child)) = tree.get_mut(key) {
        delete_in(child, next, remaining);
    }
}
