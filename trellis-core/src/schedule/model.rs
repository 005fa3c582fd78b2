//! Execution models.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a pass maps vertices onto tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// One task per vertex, gated on the tasks of its upstream vertices.
    #[default]
    MaximallyParallel,
    /// One task per island, running its members in cached order.
    Islands,
    /// One task running the global order.
    SingleThreaded,
}

impl ExecutionModel {
    /// All models, for exhaustive tests and tooling.
    pub const ALL: [ExecutionModel; 3] = [Self::MaximallyParallel, Self::Islands, Self::SingleThreaded];
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MaximallyParallel => "maximally_parallel",
            Self::Islands => "islands",
            Self::SingleThreaded => "single_threaded",
        };
        f.write_str(name)
    }
}
