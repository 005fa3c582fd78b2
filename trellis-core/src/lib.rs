//! Trellis Core
//!
//! This crate provides the scheduling core for node-based computation
//! networks whose edges change between execution passes.
//! It implements:
//!
//! - Adjacency storage with O(1) edge insertion and O(degree) removal
//! - Atomic structural diffs with a single version bump per batch
//! - An incremental topology cache that reorders only disturbed islands
//! - Completion-fence scheduling under three execution models
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Connectivity database and structural diffs
//! - `topology`: Island decomposition, ordering and cycle detection
//! - `fence`: Completion handles and the rayon-backed task graph
//! - `schedule`: Vertex kernels and the execution fence scheduler
//! - `runtime`: The [`ExecutionGraph`] host facade
//!
//! # Example
//!
//! ```rust
//! use trellis_core::graph::{Connection, StructuralDiff, VertexHandle};
//! use trellis_core::schedule::{ExecutionModel, KernelContext};
//! use trellis_core::{ExecutionGraph, SchedulerConfig};
//!
//! let mut graph = ExecutionGraph::new(SchedulerConfig::default()).unwrap();
//! let print = graph.register_kernel("print", |context: &KernelContext| {
//!     println!("running {}", context.vertex());
//! });
//!
//! let (a, b) = (VertexHandle::new(0), VertexHandle::new(1));
//! let mut diff = StructuralDiff::new();
//! diff.create_vertex(a).create_vertex(b).connect(Connection::data(a, b));
//! graph.apply_diff_and_rebuild(&diff).unwrap();
//! graph.assign_kernel(a, print);
//! graph.assign_kernel(b, print);
//!
//! // Runs `a`, then `b`.
//! graph.wait(ExecutionModel::MaximallyParallel).unwrap();
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fence;
pub mod graph;
pub mod runtime;
pub mod schedule;
pub mod topology;

pub use config::SchedulerConfig;
pub use error::{CapacityError, CycleError, InconsistentDiffError, InvariantViolation, Result, ScheduleError};
pub use runtime::{ExecutionGraph, PassReport};
