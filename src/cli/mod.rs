// CLI module for genvault
// Author: kelexine (https://github.com/kelexine)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// genvault - secure multi-tier response cache and batch orchestrator
#[derive(Parser, Debug)]
#[command(name = "genvault", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.genvault/config.toml)
    #[arg(long, short, global = true, env = "GENVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Verify an exported audit file or a directory of segment files offline
    VerifyAudit {
        /// JSON export (array of segments), a single segment, or a segment directory
        path: PathBuf,
    },

    /// Print the effective configuration as TOML with secrets redacted
    PrintConfig,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config.as_deref().and_then(|p| p.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let args = Args::parse_from(["genvault"]);
        assert_eq!(args.command(), Command::Serve);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_verify_audit_with_config() {
        let args = Args::parse_from(["genvault", "verify-audit", "audit.json", "--config", "c.toml"]);
        assert_eq!(
            args.command(),
            Command::VerifyAudit {
                path: PathBuf::from("audit.json")
            }
        );
        assert_eq!(args.config_path(), Some("c.toml"));
    }
}
