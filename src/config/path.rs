//! Dot-path codec: flattening trees to `a.b.c` keys and back.
//!
//! Segments are split on `.` with no escaping, so a literal dot can never
//! appear inside a segment.

use super::mutator::deep_merge;
use super::{ConfigTree, ConfigValue, FlatView};
use crate::TreeConfError;
use serde_json::Value;
use std::fmt;

/// Ordered key segments addressing a position inside a [`ConfigTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Split a dot-separated string. The empty string yields an empty path.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::default();
        }
        Self(path.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}

impl From<&String> for KeyPath {
    fn from(path: &String) -> Self {
        Self::parse(path)
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

/// Flatten a tree into dot-path/leaf pairs using a pre-order walk.
///
/// Only leaves are emitted. A nested tree that is empty contributes nothing.
pub fn flatten(tree: &ConfigTree) -> FlatView {
    let mut flat = FlatView::new();
    flatten_into(tree, "", &mut flat);
    flat
}

fn flatten_into(tree: &ConfigTree, prefix: &str, out: &mut FlatView) {
    for (key, value) in tree {
        let target_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Object(child) => flatten_into(child, &target_key, out),
            leaf => {
                out.insert(target_key, leaf.clone());
            }
        }
    }
}

/// Build the one-branch tree `{k1: {k2: {... {kn: value}}}}` for a path.
///
/// An empty path produces an empty tree; callers reject empty paths first.
pub fn build_nested(path: &KeyPath, value: ConfigValue) -> ConfigTree {
    let mut segments = path.segments().iter().rev();
    let Some(last) = segments.next() else {
        return ConfigTree::new();
    };

    let mut tree = ConfigTree::new();
    tree.insert(last.clone(), value);

    for segment in segments {
        let mut parent = ConfigTree::new();
        parent.insert(segment.clone(), Value::Object(tree));
        tree = parent;
    }

    tree
}

/// Expand a flat view into a tree by merging one branch per entry, in order.
pub fn unflatten(flat: &FlatView) -> Result<ConfigTree, TreeConfError> {
    let mut tree = ConfigTree::new();

    for (key, value) in flat {
        let path = KeyPath::parse(key);
        if path.is_empty() {
            return Err(TreeConfError::MalformedInput(
                "flat patch entries must have a non-empty key".to_string(),
            ));
        }
        tree = deep_merge(tree, build_nested(&path, value.clone()));
    }

    Ok(tree)
}

/// Navigate `path` inside `tree`.
///
/// Returns `None` when a segment is missing or an intermediate value is a leaf.
pub fn lookup<'a>(tree: &'a ConfigTree, path: &KeyPath) -> Option<&'a ConfigValue> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = tree.get(first)?;

    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}
