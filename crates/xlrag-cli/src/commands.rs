//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Print the cache key for a workbook and options
    Key {
        /// Source workbook
        file: PathBuf,

        /// Processing option as name=value (value parsed as JSON when possible)
        #[arg(short, long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,

        /// Fingerprint file contents instead of metadata
        #[arg(long)]
        content: bool,
    },

    /// Show which node slots own a workbook's key
    Placement {
        /// Source workbook
        file: PathBuf,

        /// Processing option as name=value
        #[arg(short, long = "option", value_name = "NAME=VALUE")]
        options: Vec<String>,

        /// Node count (defaults to the configured value)
        #[arg(long)]
        nodes: Option<u32>,

        /// Replication factor (defaults to the configured value)
        #[arg(long)]
        replicas: Option<usize>,
    },

    /// List persisted entries in a cache directory
    Inspect {
        /// Cache directory (defaults to the configured persist_dir)
        dir: Option<PathBuf>,
    },

    /// Delete stale and corrupt persisted entries
    Purge {
        /// Cache directory (defaults to the configured persist_dir)
        dir: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the configuration file location
    Path,
}
