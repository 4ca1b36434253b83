//! Strongly-typed identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cache node slot.
///
/// Node ids are dense indices into the node table, which keeps placement a
/// plain modulo over the node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.strip_prefix("node-").unwrap_or(s);
        Ok(Self(raw.parse()?))
    }
}
