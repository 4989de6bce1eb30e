//! TreeConf - Hierarchical configuration document editor
//!
//! Binary entry point. Distinguishes bad requests (exit code 2) from failures
//! to persist or other runtime errors (exit code 1).

use std::process::ExitCode;
use treeconf::{cli::run_cli, TreeConfError};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<TreeConfError>() {
            Some(TreeConfError::MalformedInput(message)) => {
                eprintln!("Invalid request: {}", message);
                ExitCode::from(2)
            }
            Some(TreeConfError::Write(cause)) => {
                eprintln!("Failed to save configuration: {}", cause);
                ExitCode::from(1)
            }
            _ => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(1)
            }
        },
    }
}
