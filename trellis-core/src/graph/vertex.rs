//! Graph Vertices
//!
//! This module defines the identifiers that live in the connectivity
//! database: vertex handles and the port discriminators carried by each
//! edge endpoint.
//!
//! The core never allocates vertex identity. Handles are issued by the
//! node-lifecycle collaborator and only name slots in the per-vertex tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a vertex (computation unit) in the graph.
///
/// The raw index addresses the per-vertex tables of the database, the
/// topology cache and the fence scheduler, so it must stay below the
/// declared vertex capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexHandle(u32);

impl VertexHandle {
    /// Create a handle from a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index value.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Index into per-vertex tables.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for VertexHandle {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for VertexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Discriminator for the input port an edge lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct InputPortId(pub u16);

/// Discriminator for the output port an edge leaves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OutputPortId(pub u16);

impl fmt::Display for InputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in{}", self.0)
    }
}

impl fmt::Display for OutputPortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out{}", self.0)
    }
}

/// Per-vertex adjacency record.
///
/// Holds the heads of the vertex's incoming and outgoing edge lists, which
/// are threaded through the database's edge arena. A record exists exactly
/// while the vertex is registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyIndex {
    /// Most recently added incoming edge slot.
    pub(crate) first_in: Option<u32>,

    /// Most recently added outgoing edge slot.
    pub(crate) first_out: Option<u32>,
}

impl TopologyIndex {
    /// True if the vertex has no incident edges.
    pub fn is_isolated(&self) -> bool {
        self.first_in.is_none() && self.first_out.is_none()
    }
}
