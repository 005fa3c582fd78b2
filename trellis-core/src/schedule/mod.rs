//! Execution Scheduling
//!
//! Converts the cached topology into a dependency graph of completion fences
//! under one of three [`ExecutionModel`]s, running each vertex's registered
//! [`VertexKernel`].

mod kernel;
mod model;
mod scheduler;

pub use kernel::{KernelContext, KernelId, KernelRegistry, VertexKernel};
pub use model::ExecutionModel;
pub use scheduler::{FenceScheduler, ScheduledPass};
