//! Command-line interface for gangway
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Gangway - container device manager
#[derive(Parser)]
#[command(name = "gangway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gangway.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create the device database
    Init,

    /// Validate the configuration file
    Check,

    /// Print the runtime config lines for a container's devices
    Render {
        /// Container name
        container: String,

        /// Write the lines to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store every profile's devices in the database
    Profiles,

    /// Replace a container's devices, applying the change live if it runs
    Apply {
        /// Container name
        container: String,

        /// PID of the container's init process (container is stopped if omitted)
        #[arg(short, long)]
        pid: Option<i32>,
    },

    /// List a container's stored devices
    Devices {
        /// Container name
        container: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Move a staged mount into a container (privileged helper)
    #[command(hide = true)]
    Forkmount {
        pid: i32,
        source: PathBuf,
        target: PathBuf,
    },

    /// Unmount a path inside a container (privileged helper)
    #[command(hide = true)]
    Forkumount { pid: i32, target: PathBuf },

    /// Delete an interface inside a container (privileged helper)
    #[command(hide = true)]
    Forknetdel { pid: i32, interface: String },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "gangway", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_helper_subcommand_names() {
        let cli = Cli::try_parse_from(["gangway", "forknetdel", "42", "eth0"]).unwrap();
        match cli.command {
            Commands::Forknetdel { pid, interface } => {
                assert_eq!(pid, 42);
                assert_eq!(interface, "eth0");
            }
            _ => panic!("expected forknetdel"),
        }

        let cli = Cli::try_parse_from(["gangway", "forkmount", "7", "/a", "/b"]).unwrap();
        assert!(matches!(cli.command, Commands::Forkmount { pid: 7, .. }));
    }

    #[test]
    fn test_apply_without_pid() {
        let cli = Cli::try_parse_from(["gangway", "-c", "x.toml", "apply", "web"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(cli.command, Commands::Apply { pid: None, .. }));
    }
}
