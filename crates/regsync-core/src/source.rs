//! Provenance of registry entries.
//!
//! Every entry a registry holds is tagged with the [`Source`] it came from.
//! The version is a logical clock owned by the node named in the source: it
//! only ever increases, which lets a receiver recognize stale or duplicate
//! replicated updates from the same origin.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a registry entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// Registered directly with this node
    Local,
    /// Received from a peer registry node
    Replicated,
    /// Imported from an external registry
    Interop,
}

/// Provenance tag: origin, owning node, and that node's logical version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Kind of origin
    pub origin: Origin,
    /// Identifier of the node that owns the entry
    pub node_id: String,
    /// Logical clock of the owning node
    pub version: u64,
}

impl Source {
    /// Create a source tag.
    #[must_use]
    pub fn new(origin: Origin, node_id: impl Into<String>, version: u64) -> Self {
        Self {
            origin,
            node_id: node_id.into(),
            version,
        }
    }

    /// A source with a freshly generated node id at version zero.
    #[must_use]
    pub fn generated(origin: Origin) -> Self {
        Self::new(origin, Uuid::new_v4().to_string(), 0)
    }

    /// The same origin and node with the version advanced by one.
    #[must_use]
    pub fn next_version(&self) -> Self {
        Self {
            origin: self.origin,
            node_id: self.node_id.clone(),
            version: self.version.saturating_add(1),
        }
    }

    /// Whether both tags belong to the same origin and node.
    #[must_use]
    pub fn same_origin(&self, other: &Source) -> bool {
        self.origin == other.origin && self.node_id == other.node_id
    }

    /// Whether `self` is a strictly newer version from the same origin and node.
    ///
    /// Tags from different nodes never supersede each other; resolving those
    /// conflicts is the registry's job.
    #[must_use]
    pub fn supersedes(&self, other: &Source) -> bool {
        self.same_origin(other) && self.version > other.version
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}@{}", self.origin, self.node_id, self.version)
    }
}
