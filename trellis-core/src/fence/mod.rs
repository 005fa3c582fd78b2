//! Completion Fences
//!
//! Primitives for expressing "run this after that finished" without blocking
//! worker threads: [`JobFence`] handles and the [`TaskGraph`] that gates
//! submission on them.

mod job;
mod task_graph;

pub use job::JobFence;
pub use task_graph::TaskGraph;

pub(crate) use task_graph::panic_message;
