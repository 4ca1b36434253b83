//! xlrag core
//!
//! Shared error handling and identifier types for the xlrag spreadsheet
//! conversion cache. This crate has minimal dependencies and defines the
//! vocabulary used by the cache library and the CLI.

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::NodeId;
