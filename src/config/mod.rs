//! Configuration tree model, dot-path codec, mutation and persistence

pub mod cache;
pub mod discovery;
pub mod mutator;
pub mod path;
pub mod persistence;
pub mod resource;

use serde_json::{Map, Value};

/// A single configuration value: an object is a tree node, anything else a leaf.
pub type ConfigValue = Value;

/// A configuration tree level, keyed by segment name in insertion order.
pub type ConfigTree = Map<String, Value>;

/// Dot-joined path to leaf value pairs, as produced by [`path::flatten`].
pub type FlatView = Map<String, Value>;

pub use discovery::ResourceLocator;
pub use mutator::{deep_merge, delete_at_path, replace_at_path};
pub use path::{build_nested, flatten, lookup, unflatten, KeyPath};
pub use cache::{CacheInvalidator, NoopInvalidator, TreeCache};
pub use persistence::{
    FileGateway, MemoryGateway, PersistenceConfig, PersistenceError, PersistenceGateway,
    TreeFormat,
};
pub use resource::ConfigResource;
