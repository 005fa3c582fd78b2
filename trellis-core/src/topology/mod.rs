//! Topology
//!
//! Island decomposition and execution orders derived from the connectivity
//! database.
//!
//! # Overview
//!
//! The [`TopologyCache`] is a pure function of the current adjacency plus
//! its own previous state, which it only uses to avoid work. After every
//! structural diff it finds the groups the change set disturbed, reorders
//! just those, and keeps group identities stable where it can.
//!
//! Groups that contain a cycle keep their members but lose their order and
//! are excluded from execution until the cycle is broken.

mod cache;
mod group;
mod ordering;
mod walker;

pub use cache::{RebuildMode, RebuildReport, TopologyCache, DEFAULT_PARTIAL_REBUILD_FRACTION};
pub use group::{Group, GroupId};
pub use ordering::OrderingAlgorithm;
pub use walker::{GroupWalker, RootCacheWalker};
