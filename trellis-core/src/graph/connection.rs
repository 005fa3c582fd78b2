//! Connections
//!
//! A connection is a directed, typed edge from an output port of one vertex
//! to an input port of another. Its traversal flags classify the edge and
//! decide whether it takes part in ordering, island connectivity and fencing.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::vertex::{InputPortId, OutputPortId, VertexHandle};

bitflags! {
    /// Classification bits carried by every edge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TraversalFlags: u32 {
        /// The edge carries values; the destination reads the source's output.
        const DATA = 1 << 0;
        /// The edge carries messages or events.
        const MESSAGE = 1 << 1;
        /// Weak, non-data signaling. Does not order its endpoints.
        const SIGNAL = 1 << 2;
    }
}

impl TraversalFlags {
    /// Edges that order their endpoints when no mask is configured.
    pub const ORDERING: Self = Self::DATA.union(Self::MESSAGE);
}

impl Default for TraversalFlags {
    fn default() -> Self {
        Self::DATA
    }
}

/// A directed edge record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Vertex producing the value.
    pub source: VertexHandle,
    /// Port on the source the edge leaves from.
    pub source_port: OutputPortId,
    /// Vertex consuming the value.
    pub destination: VertexHandle,
    /// Port on the destination the edge lands on.
    pub destination_port: InputPortId,
    /// Edge classification.
    pub flags: TraversalFlags,
}

impl Connection {
    /// Create a data connection between port 0 of both endpoints.
    pub fn data(source: VertexHandle, destination: VertexHandle) -> Self {
        Self::new(
            source,
            OutputPortId::default(),
            destination,
            InputPortId::default(),
            TraversalFlags::DATA,
        )
    }

    /// Create a connection with explicit ports and flags.
    pub fn new(
        source: VertexHandle,
        source_port: OutputPortId,
        destination: VertexHandle,
        destination_port: InputPortId,
        flags: TraversalFlags,
    ) -> Self {
        Self {
            source,
            source_port,
            destination,
            destination_port,
            flags,
        }
    }

    /// Replace the traversal flags.
    pub fn with_flags(mut self, flags: TraversalFlags) -> Self {
        self.flags = flags;
        self
    }

    /// True if this edge participates under the given traversal mask.
    #[inline]
    pub fn participates(&self, mask: TraversalFlags) -> bool {
        self.flags.intersects(mask)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_port, self.destination, self.destination_port
        )
    }
}

/// Stable handle to an edge in the database arena.
///
/// The generation is bumped every time a slot is freed, so a handle kept
/// past the edge's removal never aliases a later edge in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeHandle {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl EdgeHandle {
    /// Arena slot index.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation of the slot when the handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EdgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}#{}", self.slot, self.generation)
    }
}
