//! Error types for xlrag.
//!
//! Cache misses, stale entries and corrupted payloads are not errors: the
//! cache reports them as absent values. The variants here cover the cases
//! where an identity cannot be established or a required write failed.

use crate::ids::NodeId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Key generation errors
    #[error("Source file unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid processing options: {0}")]
    InvalidOptions(String),

    // Storage errors
    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Distribution errors
    #[error("Node unavailable: {0}")]
    NodeUnavailable(NodeId),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Build a [`Error::SourceUnavailable`] for `path`.
    pub fn source_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::SourceUnavailable {
            path: path.into(),
            source,
        }
    }
}
