//! The editable configuration resource.
//!
//! Every mutation follows the same protocol: read the freshest tree from the
//! gateway, apply the change, write the full tree back, invalidate caches and
//! reseed the in-memory snapshot. No lock is held across the read and the
//! write, so a concurrent external writer can still lose an update between
//! the two steps.

use super::mutator::{deep_merge, delete_at_path, replace_at_path};
use super::path::{flatten, lookup, unflatten, KeyPath};
use super::persistence::{FileGateway, PersistenceGateway};
use super::{ConfigTree, ConfigValue, FlatView};
use crate::TreeConfError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct ConfigResource<G: PersistenceGateway = FileGateway> {
    resource: PathBuf,
    gateway: G,
    snapshot: ConfigTree,
}

impl<G: PersistenceGateway> ConfigResource<G> {
    /// Bind to `resource` and seed the snapshot from a fresh read.
    pub fn open(resource: impl Into<PathBuf>, gateway: G) -> Self {
        let resource = resource.into();
        let snapshot = gateway.read_tree(&resource);
        debug!(
            resource = %resource.display(),
            keys = snapshot.len(),
            "Opened configuration resource"
        );

        Self {
            resource,
            gateway,
            snapshot,
        }
    }

    /// Bind to `resource` with a snapshot the caller already holds.
    pub fn with_snapshot(resource: impl Into<PathBuf>, gateway: G, snapshot: ConfigTree) -> Self {
        Self {
            resource: resource.into(),
            gateway,
            snapshot,
        }
    }

    pub fn resource(&self) -> &Path {
        &self.resource
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// The snapshot as a tree (`tree == true`) or as a flat dot-path view.
    pub fn fetch(&self, tree: bool) -> ConfigTree {
        if tree {
            self.snapshot.clone()
        } else {
            flatten(&self.snapshot)
        }
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.snapshot
    }

    pub fn flat(&self) -> FlatView {
        flatten(&self.snapshot)
    }

    pub fn get(&self, path: impl Into<KeyPath>) -> Option<&ConfigValue> {
        lookup(&self.snapshot, &path.into())
    }

    /// Deep-merge `data` into the stored tree and echo `data` back.
    ///
    /// With `tree == false`, `data` is a flat view whose dot-path keys are
    /// expanded before merging. Either way `data` must be a mapping.
    pub fn patch(&mut self, data: ConfigValue, tree: bool) -> Result<ConfigValue, TreeConfError> {
        let patch_values = match &data {
            Value::Object(map) if tree => map.clone(),
            Value::Object(map) => unflatten(map)?,
            other => {
                return Err(TreeConfError::MalformedInput(format!(
                    "patch data must be a mapping, got {}",
                    describe(other)
                )))
            }
        };

        let base = self.read_fresh_base();
        let merged = deep_merge(base, patch_values);
        self.commit(merged)?;

        info!(resource = %self.resource.display(), tree, "Patched configuration");
        Ok(data)
    }

    /// Set `value` at a dot-path and return the full resulting tree.
    pub fn patch_key(&mut self, path: &str, value: ConfigValue) -> Result<ConfigTree, TreeConfError> {
        let key_path = KeyPath::parse(path);
        if key_path.is_empty() {
            return Err(TreeConfError::MalformedInput(
                "cannot patch an empty key path".to_string(),
            ));
        }

        let base = self.read_fresh_base();
        let result = self.commit(replace_at_path(base, &key_path, value))?;

        info!(resource = %self.resource.display(), path = %key_path, "Patched configuration key");
        Ok(result)
    }

    /// Persist `data` verbatim, without reading or merging what was stored.
    pub fn over_write(&mut self, data: ConfigTree) -> Result<ConfigTree, TreeConfError> {
        let result = self.commit(data)?;

        info!(resource = %self.resource.display(), "Overwrote configuration");
        Ok(result)
    }

    /// Remove the entry at `path` and return the resulting tree.
    ///
    /// An empty path returns the fresh base without writing or invalidating.
    pub fn delete_key(&mut self, path: impl Into<KeyPath>) -> Result<ConfigTree, TreeConfError> {
        let key_path = path.into();
        let base = self.read_fresh_base();

        if key_path.is_empty() {
            debug!(resource = %self.resource.display(), "Empty key path, nothing to delete");
            return Ok(base);
        }

        let result = self.commit(delete_at_path(base, &key_path))?;

        info!(resource = %self.resource.display(), path = %key_path, "Deleted configuration key");
        Ok(result)
    }

    /// Reseed the snapshot from the backing resource without writing.
    pub fn reload(&mut self) -> &ConfigTree {
        self.snapshot = self.read_fresh_base();
        &self.snapshot
    }

    /// Mutations start from what is on disk now, never from the snapshot.
    fn read_fresh_base(&self) -> ConfigTree {
        self.gateway.read_tree(&self.resource)
    }

    /// Write, invalidate, reseed. The snapshot only moves once the write succeeded.
    fn commit(&mut self, tree: ConfigTree) -> Result<ConfigTree, TreeConfError> {
        if let Err(e) = self.gateway.write_tree(&self.resource, &tree) {
            warn!(resource = %self.resource.display(), "Failed to persist configuration: {}", e);
            return Err(e.into());
        }

        self.gateway.invalidate(&self.resource);
        self.snapshot = tree.clone();
        Ok(tree)
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
