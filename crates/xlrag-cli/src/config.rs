//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xlrag_cache::{CacheConfig, DistributedConfig};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CliConfig {
    /// Settings for a single cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Settings for the partitioned cache.
    #[serde(default)]
    pub distributed: DistributedConfig,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from `path`, or from the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Self = serde_yaml::from_str(&content)?;
            config.cache.validate()?;
            config.distributed.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "xlrag", "xlrag")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Default cache directory when none is configured.
    pub fn default_cache_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "xlrag", "xlrag").map(|d| d.cache_dir().to_path_buf())
    }
}
