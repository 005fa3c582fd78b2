//! Computation Graph
//!
//! This module stores the mutable graph the scheduler works on.
//!
//! # Overview
//!
//! - Vertices are opaque handles owned by the node lifecycle. The graph only
//!   keeps adjacency keyed by them.
//! - Edges are typed [`Connection`] records from an output port of one vertex
//!   to an input port of another.
//! - All structural mutation arrives as a [`StructuralDiff`] and is applied
//!   atomically, bumping the database version once.
//!
//! # Design Decisions
//!
//! 1. Edges live in a slab arena with intrusive per-vertex lists, so an
//!    insertion never moves an existing edge and handles stay stable.
//!
//! 2. The database never computes orders or islands. It only records which
//!    vertices changed, and the topology cache decides what to rebuild.

mod connection;
mod database;
mod diff;
mod vertex;

pub use connection::{Connection, EdgeHandle, TraversalFlags};
pub use database::{ConnectivityDatabase, Edges, TopologyChanges, VersionTracker};
pub use diff::{
    AppliedDiff, ArrayResize, BufferResize, DataCommand, DiffCommand, DiffCommandKind,
    StructuralDiff, ValueObservation,
};
pub use vertex::{InputPortId, OutputPortId, TopologyIndex, VertexHandle};
