//! TreeConf - Hierarchical configuration document editor
//!
//! TreeConf keeps a tree-shaped configuration document backed by a file and
//! exposes read, patch, replace and delete operations addressed either as full
//! trees or as dot-separated paths such as `api-tools.config_file`.

pub mod cli;
pub mod config;
pub mod logging;

pub use config::*;

/// Result type alias for TreeConf binaries and glue code
pub type Result<T> = anyhow::Result<T>;

/// Error types surfaced by configuration resource operations
#[derive(thiserror::Error, Debug)]
pub enum TreeConfError {
    /// The request itself was unusable; nothing was read or written.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The tree could not be persisted; the in-memory snapshot is unchanged.
    #[error("Write failed: {0}")]
    Write(#[from] config::PersistenceError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TreeConfError {
    /// Whether the caller's request was at fault rather than the system.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, TreeConfError::MalformedInput(_))
    }
}
