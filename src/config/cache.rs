//! Cache invalidation capability and a process-level tree cache.

use super::persistence::{PersistenceError, PersistenceGateway};
use super::ConfigTree;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Something holding derived copies of a resource that must be dropped after a write.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, resource: &Path) -> Result<(), PersistenceError>;
}

/// Default invalidator for deployments without a cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _resource: &Path) -> Result<(), PersistenceError> {
        Ok(())
    }
}

impl<T: CacheInvalidator + ?Sized> CacheInvalidator for Arc<T> {
    fn invalidate(&self, resource: &Path) -> Result<(), PersistenceError> {
        (**self).invalidate(resource)
    }
}

/// Parsed trees shared by readers, keyed by resource.
///
/// Readers go through [`TreeCache::get_or_load`]; writers invalidate the entry
/// once the new tree is on disk.
#[derive(Debug, Default)]
pub struct TreeCache {
    entries: RwLock<HashMap<PathBuf, ConfigTree>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<G>(&self, resource: &Path, gateway: &G) -> ConfigTree
    where
        G: PersistenceGateway + ?Sized,
    {
        if let Some(tree) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
        {
            trace!("Cache hit for {}", resource.display());
            return tree.clone();
        }

        let tree = gateway.read_tree(resource);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.to_path_buf(), tree.clone());
        tree
    }

    pub fn contains(&self, resource: &Path) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(resource)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInvalidator for TreeCache {
    fn invalidate(&self, resource: &Path) -> Result<(), PersistenceError> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource);
        trace!("Invalidated {} (cached: {})", resource.display(), removed.is_some());
        Ok(())
    }
}
