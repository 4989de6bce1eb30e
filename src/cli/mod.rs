//! Command-line interface for TreeConf
//!
//! Every subcommand maps onto one configuration resource operation. Results
//! are printed as pretty JSON on stdout; logs go to stderr.

use crate::{
    config::{
        ConfigResource, ConfigTree, FileGateway, PersistenceConfig, PersistenceGateway,
        ResourceLocator,
    },
    logging::{init_logging, LogConfig},
    Result, TreeConfError,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// TreeConf command-line interface
#[derive(Parser)]
#[command(name = "treeconf")]
#[command(about = "Edit hierarchical configuration files with dot-path addressing")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct TreeConfCli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file to edit (.toml or .json)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,

    /// Directory receiving a backup of the file before each write
    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Show the current configuration
    Show {
        /// Print dot-path/value pairs instead of the nested tree
        #[arg(long)]
        flat: bool,
    },

    /// Get a configuration value
    Get {
        /// Configuration key (dot notation, e.g. "api-tools.config_file")
        key: String,
    },

    /// Set a configuration value, replacing whatever sits on the path
    Set {
        /// Configuration key (dot notation)
        key: String,

        /// Value, parsed as JSON when possible and used as a string otherwise
        value: String,
    },

    /// Merge a JSON object into the configuration
    Patch {
        /// JSON object; keys are dot-paths unless --tree is given
        data: String,

        /// Treat the data as a nested tree instead of dot-path pairs
        #[arg(long)]
        tree: bool,
    },

    /// Delete a configuration key
    Delete {
        /// Configuration key (dot notation)
        key: String,
    },

    /// Replace the whole configuration with a JSON document
    Overwrite {
        /// Input file path, or "-" for stdin
        input: String,
    },
}

/// Parse a command-line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// CLI command executor
pub struct TreeConfCliExecutor<G: PersistenceGateway, W: Write> {
    resource: ConfigResource<G>,
    out: W,
}

impl<G: PersistenceGateway, W: Write> TreeConfCliExecutor<G, W> {
    pub fn new(resource: ConfigResource<G>, out: W) -> Self {
        Self { resource, out }
    }

    pub fn resource(&self) -> &ConfigResource<G> {
        &self.resource
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Execute a CLI command
    pub fn execute(&mut self, command: Commands) -> Result<()> {
        debug!("Executing {:?}", command);

        match command {
            Commands::Show { flat } => {
                let view = self.resource.fetch(!flat);
                self.print(&Value::Object(view))
            }
            Commands::Get { key } => {
                let found = self.resource.get(key.as_str()).cloned();
                match found {
                    Some(value) => self.print(&value),
                    None => anyhow::bail!("Key not found: {}", key),
                }
            }
            Commands::Set { key, value } => {
                let tree = self.resource.patch_key(&key, parse_value(&value))?;
                self.print(&Value::Object(tree))
            }
            Commands::Patch { data, tree } => {
                let data: Value = serde_json::from_str(&data).map_err(|e| {
                    TreeConfError::MalformedInput(format!("patch data is not valid JSON: {e}"))
                })?;
                self.resource.patch(data, tree)?;
                let merged = self.resource.fetch(true);
                self.print(&Value::Object(merged))
            }
            Commands::Delete { key } => {
                let tree = self.resource.delete_key(key.as_str())?;
                self.print(&Value::Object(tree))
            }
            Commands::Overwrite { input } => {
                let data = read_document(&input)?;
                let tree = self.resource.over_write(data)?;
                self.print(&Value::Object(tree))
            }
        }
    }

    fn print(&mut self, value: &Value) -> Result<()> {
        writeln!(self.out, "{}", serde_json::to_string_pretty(value)?)?;
        Ok(())
    }
}

fn read_document(input: &str) -> Result<ConfigTree> {
    let content = if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read document from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(tree)) => Ok(tree),
        Ok(_) => Err(TreeConfError::MalformedInput(
            "overwrite document must be a JSON object".to_string(),
        )
        .into()),
        Err(e) => Err(TreeConfError::MalformedInput(format!(
            "overwrite document is not valid JSON: {e}"
        ))
        .into()),
    }
}

/// Run the CLI interface
pub fn run_cli() -> Result<()> {
    let cli = TreeConfCli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::from_env()
    };
    init_logging(&log_config)
        .map_err(|e| TreeConfError::Configuration(format!("Failed to initialize logging: {}", e)))?;

    let mut persistence = PersistenceConfig::from_env();
    if cli.backup_dir.is_some() {
        persistence.backup_dir = cli.backup_dir.clone();
    }

    let locator = ResourceLocator {
        file: cli.file.clone(),
        ..ResourceLocator::default()
    };
    let path = locator.resolve();
    info!("Editing {}", path.display());

    let resource = ConfigResource::open(path, FileGateway::new(persistence));
    let stdout = io::stdout();
    let mut executor = TreeConfCliExecutor::new(resource, stdout.lock());

    executor.execute(cli.command)
}
