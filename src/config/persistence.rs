use super::cache::{CacheInvalidator, NoopInvalidator};
use super::ConfigTree;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("JSON serialization error: {0}")]
    JsonSerialize(#[from] serde_json::Error),
    #[error("{format} cannot represent the value at '{path}'")]
    UnsupportedValue { path: String, format: &'static str },
    #[error("Backup error: {message}")]
    BackupError { message: String },
    #[error("Invalidation error: {message}")]
    InvalidationError { message: String },
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Where copies of the previous file go before each write. `None` disables backups.
    pub backup_dir: Option<PathBuf>,
    pub max_backups: usize,
    pub atomic_writes: bool,
    pub file_permissions: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backup_dir: None,
            max_backups: 10,
            atomic_writes: true,
            file_permissions: 0o600, // Read/write for owner only
        }
    }
}

impl PersistenceConfig {
    /// Load overrides from `TREECONF_BACKUP_DIR`, `TREECONF_MAX_BACKUPS` and
    /// `TREECONF_ATOMIC_WRITES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("TREECONF_BACKUP_DIR") {
            if !dir.is_empty() {
                config.backup_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(max) = std::env::var("TREECONF_MAX_BACKUPS") {
            match max.parse() {
                Ok(parsed) => config.max_backups = parsed,
                Err(_) => warn!("Ignoring invalid TREECONF_MAX_BACKUPS value: {}", max),
            }
        }

        if let Ok(atomic) = std::env::var("TREECONF_ATOMIC_WRITES") {
            config.atomic_writes = atomic.to_lowercase() != "false";
        }

        config
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub original_file: String,
    pub format: String,
}

/// On-disk encoding of a tree, chosen from the resource's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFormat {
    Toml,
    Json,
}

/// TOML leaf types with no JSON counterpart. They are carried as strings in
/// the tree and restored on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TomlLeaf {
    Datetime,
    Float,
}

/// Leaf paths (`a.b`, `a.list[0]`) read as a `TomlLeaf`.
type TypedLeaves = HashMap<String, TomlLeaf>;

impl TreeFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => TreeFormat::Json,
            _ => TreeFormat::Toml,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TreeFormat::Toml => "toml",
            TreeFormat::Json => "json",
        }
    }

    /// Parse `content` into a tree. `None` when it is not an associative document.
    pub fn parse(&self, content: &str) -> Option<ConfigTree> {
        self.parse_typed(content).map(|(tree, _)| tree)
    }

    pub fn render(&self, tree: &ConfigTree) -> Result<String, PersistenceError> {
        self.render_typed(tree, &TypedLeaves::new())
    }

    fn parse_typed(&self, content: &str) -> Option<(ConfigTree, TypedLeaves)> {
        match self {
            TreeFormat::Toml => match toml::from_str::<toml::Table>(content) {
                Ok(table) => {
                    let mut leaves = TypedLeaves::new();
                    let tree = toml_table_to_tree(table, "", &mut leaves);
                    Some((tree, leaves))
                }
                Err(e) => {
                    debug!("TOML parse failed: {}", e);
                    None
                }
            },
            TreeFormat::Json => match serde_json::from_str::<Value>(content) {
                Ok(Value::Object(tree)) => Some((tree, TypedLeaves::new())),
                Ok(other) => {
                    debug!("JSON document is not an object: {}", value_kind(&other));
                    None
                }
                Err(e) => {
                    debug!("JSON parse failed: {}", e);
                    None
                }
            },
        }
    }

    fn render_typed(
        &self,
        tree: &ConfigTree,
        leaves: &TypedLeaves,
    ) -> Result<String, PersistenceError> {
        match self {
            TreeFormat::Toml => {
                let table = tree_to_toml_table(tree, "", leaves)?;
                Ok(toml::to_string_pretty(&table)?)
            }
            TreeFormat::Json => {
                let mut content = serde_json::to_string_pretty(tree)?;
                content.push('\n');
                Ok(content)
            }
        }
    }
}

fn child_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn toml_table_to_tree(table: toml::Table, prefix: &str, leaves: &mut TypedLeaves) -> ConfigTree {
    table
        .into_iter()
        .map(|(key, value)| {
            let path = child_path(prefix, &key);
            (key, toml_to_value(value, path, leaves))
        })
        .collect()
}

fn toml_to_value(value: toml::Value, path: String, leaves: &mut TypedLeaves) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => match Number::from_f64(f) {
            Some(number) => Value::Number(number),
            None => {
                leaves.insert(path, TomlLeaf::Float);
                Value::String(non_finite_name(f).to_string())
            }
        },
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => {
            leaves.insert(path, TomlLeaf::Datetime);
            Value::String(dt.to_string())
        }
        toml::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| toml_to_value(item, format!("{path}[{i}]"), leaves))
                .collect(),
        ),
        toml::Value::Table(table) => Value::Object(toml_table_to_tree(table, &path, leaves)),
    }
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f.is_sign_negative() {
        "-inf"
    } else {
        "inf"
    }
}

fn parse_non_finite(s: &str) -> Option<f64> {
    match s {
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn tree_to_toml_table(
    tree: &ConfigTree,
    prefix: &str,
    leaves: &TypedLeaves,
) -> Result<toml::Table, PersistenceError> {
    let mut table = toml::Table::new();
    for (key, value) in tree {
        let path = child_path(prefix, key);
        table.insert(key.clone(), value_to_toml(value, path, leaves)?);
    }
    Ok(table)
}

/// TOML has no null and no integers above `i64::MAX`; both fail before any I/O.
fn value_to_toml(
    value: &Value,
    path: String,
    leaves: &TypedLeaves,
) -> Result<toml::Value, PersistenceError> {
    match value {
        Value::Null => Err(unsupported_in_toml(path)),
        Value::Bool(b) => Ok(toml::Value::Boolean(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(toml::Value::Integer(i)),
            (None, Some(f)) if n.is_f64() => Ok(toml::Value::Float(f)),
            _ => Err(unsupported_in_toml(path)),
        },
        Value::String(s) => Ok(restore_leaf(s, leaves.get(&path))
            .unwrap_or_else(|| toml::Value::String(s.clone()))),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| value_to_toml(item, format!("{path}[{i}]"), leaves))
            .collect::<Result<Vec<_>, _>>()
            .map(toml::Value::Array),
        Value::Object(child) => tree_to_toml_table(child, &path, leaves).map(toml::Value::Table),
    }
}

/// A string still holding what was read keeps its TOML type; anything else stays a string.
fn restore_leaf(s: &str, kind: Option<&TomlLeaf>) -> Option<toml::Value> {
    match kind? {
        TomlLeaf::Datetime => s.parse::<toml::value::Datetime>().ok().map(toml::Value::Datetime),
        TomlLeaf::Float => parse_non_finite(s).map(toml::Value::Float),
    }
}

fn unsupported_in_toml(path: String) -> PersistenceError {
    PersistenceError::UnsupportedValue { path, format: "TOML" }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Storage collaborator of a configuration resource.
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceGateway {
    /// Read the current tree. Absent or non-associative content yields an empty tree.
    fn read_tree(&self, resource: &Path) -> ConfigTree;

    /// Persist the entire tree, replacing whatever the resource held.
    fn write_tree(&self, resource: &Path, tree: &ConfigTree) -> Result<(), PersistenceError>;

    /// Drop any cached view of the resource. Best effort.
    fn invalidate(&self, resource: &Path);
}

/// File-backed gateway writing TOML or JSON documents.
///
/// TOML datetimes and non-finite floats are read as strings. The gateway
/// remembers where they were on the last read of each resource and writes
/// them back with their TOML type while the string is unchanged.
pub struct FileGateway {
    config: PersistenceConfig,
    invalidator: Box<dyn CacheInvalidator>,
    typed_leaves: Mutex<HashMap<PathBuf, TypedLeaves>>,
}

impl FileGateway {
    pub fn new(config: PersistenceConfig) -> Self {
        Self::with_invalidator(config, NoopInvalidator)
    }

    pub fn with_invalidator(
        config: PersistenceConfig,
        invalidator: impl CacheInvalidator + 'static,
    ) -> Self {
        Self {
            config,
            invalidator: Box::new(invalidator),
            typed_leaves: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn ensure_directory_exists(&self, dir: &Path) -> Result<(), PersistenceError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let permissions = fs::Permissions::from_mode(0o700); // rwx for owner only
                fs::set_permissions(dir, permissions)?;
            }
        }
        Ok(())
    }

    fn write_file_atomic(&self, file_path: &Path, content: &str) -> Result<(), PersistenceError> {
        if self.config.atomic_writes {
            let temp_path = sibling_path(file_path, "tmp")?;

            fs::write(&temp_path, content)?;
            self.apply_permissions(&temp_path)?;

            if let Err(e) = fs::rename(&temp_path, file_path) {
                let _ = fs::remove_file(&temp_path);
                return Err(e.into());
            }
        } else {
            fs::write(file_path, content)?;
            self.apply_permissions(file_path)?;
        }

        Ok(())
    }

    #[cfg(unix)]
    fn apply_permissions(&self, path: &Path) -> Result<(), PersistenceError> {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(self.config.file_permissions);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn apply_permissions(&self, _path: &Path) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn backup_file(&self, file_path: &Path, backup_dir: &Path) -> Result<(), PersistenceError> {
        if !file_path.exists() {
            return Ok(());
        }

        self.ensure_directory_exists(backup_dir)?;

        let filename = file_name(file_path)?;
        let created_at = chrono::Utc::now();
        let backup_filename = format!(
            "{}.{}.backup",
            filename,
            created_at.format(BACKUP_TIMESTAMP_FORMAT)
        );
        let backup_path = backup_dir.join(&backup_filename);

        fs::copy(file_path, &backup_path)?;

        let metadata = BackupMetadata {
            created_at,
            original_file: filename.to_string(),
            format: TreeFormat::from_path(file_path).name().to_string(),
        };

        let metadata_path = backup_path.with_extension("metadata");
        fs::write(metadata_path, toml::to_string_pretty(&metadata)?)?;

        debug!("Backed up {} to {}", file_path.display(), backup_path.display());
        Ok(())
    }

    fn cleanup_old_backups(&self, file_path: &Path, backup_dir: &Path) -> Result<(), PersistenceError> {
        if !backup_dir.exists() {
            return Ok(());
        }

        let original = file_name(file_path)?;
        let mut backup_files = Vec::new();

        for entry in fs::read_dir(backup_dir)? {
            let path = entry?.path();
            let matches_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| is_backup_of(n, original));

            if matches_file {
                backup_files.push(path);
            }
        }

        // Timestamped names sort chronologically; newest first.
        backup_files.sort_by(|a, b| b.cmp(a));

        for old_backup in backup_files.iter().skip(self.config.max_backups) {
            fs::remove_file(old_backup)?;

            let metadata_path = old_backup.with_extension("metadata");
            if metadata_path.exists() {
                fs::remove_file(metadata_path)?;
            }
        }

        Ok(())
    }
}

impl Default for FileGateway {
    fn default() -> Self {
        Self::new(PersistenceConfig::default())
    }
}

impl PersistenceGateway for FileGateway {
    fn read_tree(&self, resource: &Path) -> ConfigTree {
        let content = match fs::read_to_string(resource) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, starting from an empty tree", resource.display());
                return ConfigTree::new();
            }
            Err(e) => {
                warn!("Unable to read {}, treating as empty: {}", resource.display(), e);
                return ConfigTree::new();
            }
        };

        let mut typed_leaves = self.typed_leaves.lock().unwrap_or_else(PoisonError::into_inner);
        match TreeFormat::from_path(resource).parse_typed(&content) {
            Some((tree, leaves)) => {
                typed_leaves.insert(resource.to_path_buf(), leaves);
                tree
            }
            None => {
                typed_leaves.remove(resource);
                warn!("{} is not an associative document, treating as empty", resource.display());
                ConfigTree::new()
            }
        }
    }

    fn write_tree(&self, resource: &Path, tree: &ConfigTree) -> Result<(), PersistenceError> {
        let content = {
            let typed_leaves = self.typed_leaves.lock().unwrap_or_else(PoisonError::into_inner);
            let leaves = typed_leaves.get(resource).cloned().unwrap_or_default();
            TreeFormat::from_path(resource).render_typed(tree, &leaves)?
        };

        if let Some(parent) = resource.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.ensure_directory_exists(parent)?;
        }

        if let Some(backup_dir) = &self.config.backup_dir {
            self.backup_file(resource, backup_dir)?;
        }

        self.write_file_atomic(resource, &content)?;

        // The new tree is already in place; pruning failures must not fail the write.
        if let Some(backup_dir) = &self.config.backup_dir {
            if let Err(e) = self.cleanup_old_backups(resource, backup_dir) {
                warn!("Failed to prune backups of {}: {}", resource.display(), e);
            }
        }

        debug!("Wrote {} bytes to {}", content.len(), resource.display());
        Ok(())
    }

    fn invalidate(&self, resource: &Path) {
        if let Err(e) = self.invalidator.invalidate(resource) {
            debug!("Cache invalidation for {} failed: {}", resource.display(), e);
        }
    }
}

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6f";

/// Whether `candidate` is exactly `<original>.<timestamp>.backup`.
fn is_backup_of(candidate: &str, original: &str) -> bool {
    candidate
        .strip_prefix(original)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".backup"))
        .is_some_and(|stamp| {
            chrono::NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT).is_ok()
        })
}

fn file_name(path: &Path) -> Result<&str, PersistenceError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PersistenceError::BackupError {
            message: format!("Invalid file name: {}", path.display()),
        })
}

fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf, PersistenceError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "resource has no file name"))?;
    Ok(path.with_file_name(format!("{name}.{suffix}")))
}

/// In-process gateway keeping trees in memory, with call counters.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    trees: Mutex<HashMap<PathBuf, ConfigTree>>,
    writes: AtomicUsize,
    invalidations: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree(self, resource: impl Into<PathBuf>, tree: ConfigTree) -> Self {
        self.insert(resource, tree);
        self
    }

    /// Replace the stored tree without counting it as a write.
    pub fn insert(&self, resource: impl Into<PathBuf>, tree: ConfigTree) {
        self.trees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), tree);
    }

    pub fn stored(&self, resource: &Path) -> Option<ConfigTree> {
        self.trees
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Make every subsequent write fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl PersistenceGateway for MemoryGateway {
    fn read_tree(&self, resource: &Path) -> ConfigTree {
        self.stored(resource).unwrap_or_default()
    }

    fn write_tree(&self, resource: &Path, tree: &ConfigTree) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure").into());
        }

        self.insert(resource, tree.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn invalidate(&self, _resource: &Path) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
