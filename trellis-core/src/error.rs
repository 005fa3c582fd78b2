//! Scheduler Errors
//!
//! Every fallible public operation in the crate returns one of the types
//! defined here.
//!
//! - [`CycleError`] is recoverable: the offending group is excluded from
//!   every execution order and the pass otherwise completes.
//! - [`InconsistentDiffError`] means a collaborator referenced state that
//!   does not exist. Nothing is mutated when it is returned.
//! - [`CapacityError`] means a diff needs more vertices than declared.

use thiserror::Error;

use crate::graph::{Connection, EdgeHandle, VertexHandle};
use crate::topology::GroupId;

/// A group whose traversal found a cycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("group {group} contains a cycle through {} vertices: {}", .vertices.len(), format_vertices(.vertices))]
pub struct CycleError {
    /// The group the cycle was found in.
    pub group: GroupId,

    /// Vertices on the detected cycle.
    pub vertices: Vec<VertexHandle>,
}

fn format_vertices(vertices: &[VertexHandle]) -> String {
    let names: Vec<String> = vertices.iter().map(ToString::to_string).collect();
    names.join(", ")
}

/// A diff or database call referenced a vertex or edge that is not there.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InconsistentDiffError {
    /// The vertex was never registered, or has been destroyed.
    #[error("vertex {0} is not registered")]
    UnknownVertex(VertexHandle),

    /// A create command named a vertex that is already live.
    #[error("vertex {0} is already registered")]
    VertexExists(VertexHandle),

    /// A destroy command named a vertex that still has incident edges.
    #[error("vertex {vertex} still has {edges} incident edges")]
    VertexHasEdges {
        /// The vertex being destroyed.
        vertex: VertexHandle,
        /// Number of edges still attached.
        edges: usize,
    },

    /// A disconnect named a connection that does not exist.
    #[error("connection {0} does not exist")]
    UnknownConnection(Connection),

    /// The edge handle is stale or was never issued.
    #[error("edge {0} does not exist")]
    UnknownEdge(EdgeHandle),
}

/// The edge arena and the per-vertex lists disagree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An incoming list holds an edge that lands elsewhere.
    #[error("{edge} in incoming list of {vertex} lands on {destination}")]
    MisplacedIncoming {
        /// The misplaced edge.
        edge: EdgeHandle,
        /// Owner of the list.
        vertex: VertexHandle,
        /// Where the edge actually lands.
        destination: VertexHandle,
    },

    /// An outgoing list holds an edge that leaves elsewhere.
    #[error("{edge} in outgoing list of {vertex} leaves {origin}")]
    MisplacedOutgoing {
        /// The misplaced edge.
        edge: EdgeHandle,
        /// Owner of the list.
        vertex: VertexHandle,
        /// Where the edge actually leaves from.
        origin: VertexHandle,
    },

    /// An arena slot is linked a wrong number of times.
    #[error("slot {slot} linked {incoming}/{outgoing} times, expected {expected}")]
    SlotLinks {
        /// Arena slot.
        slot: usize,
        /// Times found in incoming lists.
        incoming: u32,
        /// Times found in outgoing lists.
        outgoing: u32,
        /// 1 for a live slot, 0 for a free one.
        expected: u32,
    },

    /// The live edge counter does not match the arena.
    #[error("edge count {recorded} but {live} live slots")]
    EdgeCount {
        /// Counter value.
        recorded: usize,
        /// Live slots found.
        live: usize,
    },

    /// The live vertex counter does not match the table.
    #[error("vertex count {recorded} but {live} registered vertices")]
    VertexCount {
        /// Counter value.
        recorded: usize,
        /// Registered vertices found.
        live: usize,
    },
}

/// A diff needs more vertices than the declared capacity.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("diff requires {required} vertex slots but capacity is {capacity}")]
pub struct CapacityError {
    /// Vertex slots the diff would need.
    pub required: usize,
    /// Declared upper bound on vertex slots.
    pub capacity: usize,
}

/// Unified error type for scheduler operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// One or more groups contain cycles. The pass completed regardless.
    #[error("{} group(s) contain cycles", .0.len())]
    Cycles(Vec<CycleError>),

    /// A collaborator referenced missing state.
    #[error(transparent)]
    InconsistentDiff(#[from] InconsistentDiffError),

    /// The declared vertex capacity was exceeded.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Internal adjacency state is corrupt.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// The topology cache does not match the database it is read against.
    #[error("topology cache is at version {cache} but database is at {database}")]
    StaleTopology {
        /// Version the cache was built against.
        cache: u64,
        /// Current database version.
        database: u64,
    },

    /// The worker thread pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScheduleError {
    /// Cycle errors carried by this error, if any.
    pub fn cycles(&self) -> &[CycleError] {
        match self {
            Self::Cycles(cycles) => cycles,
            _ => &[],
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
