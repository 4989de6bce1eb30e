//! Resolution of the backing file a configuration resource edits.

use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming the backing file.
pub const FILE_ENV_VAR: &str = "TREECONF_FILE";

/// Default file name inside the application's configuration directory.
pub const DEFAULT_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ResourceLocator {
    /// Explicit override, usually from the command line.
    pub file: Option<PathBuf>,
    pub app_name: String,
}

impl Default for ResourceLocator {
    fn default() -> Self {
        Self {
            file: None,
            app_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl ResourceLocator {
    pub fn with_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    /// Explicit file, then `TREECONF_FILE`, then `<config dir>/<app>/config.toml`.
    pub fn resolve(&self) -> PathBuf {
        if let Some(file) = &self.file {
            debug!("Using explicit configuration file {}", file.display());
            return file.clone();
        }

        if let Some(file) = std::env::var_os(FILE_ENV_VAR).filter(|v| !v.is_empty()) {
            let file = PathBuf::from(file);
            debug!("Using {} from {}", file.display(), FILE_ENV_VAR);
            return file;
        }

        self.canonical_path()
    }

    /// The conventional location, ignoring any override.
    pub fn canonical_path(&self) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(&self.app_name)
            .join(DEFAULT_FILE_NAME)
    }
}
