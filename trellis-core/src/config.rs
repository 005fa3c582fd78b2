//! Scheduler Configuration
//!
//! [`SchedulerConfig`] collects every tunable of an [`crate::ExecutionGraph`].
//! It can be built in code with the `with_*` methods or loaded from JSON;
//! missing JSON fields fall back to the defaults.
//!
//! ```json
//! {
//!   "ordering": "global_breadth_first",
//!   "execution_model": "islands",
//!   "traversal_mask": "DATA | MESSAGE",
//!   "worker_threads": 4
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::graph::TraversalFlags;
use crate::schedule::ExecutionModel;
use crate::topology::{OrderingAlgorithm, DEFAULT_PARTIAL_REBUILD_FRACTION};

/// Default declared vertex capacity.
pub const DEFAULT_VERTEX_CAPACITY: usize = 1 << 16;

/// Tunables of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// How islands are ordered.
    pub ordering: OrderingAlgorithm,

    /// Model used by [`crate::ExecutionGraph::wait_default`].
    pub execution_model: ExecutionModel,

    /// Edges that take part in ordering, islands and fencing.
    pub traversal_mask: TraversalFlags,

    /// Worker threads. `0` lets rayon decide.
    pub worker_threads: usize,

    /// Upper bound on vertex handle indices.
    pub vertex_capacity: usize,

    /// Share of live vertices above which a rebuild goes full.
    pub partial_rebuild_fraction: f64,

    /// Record counters in the process-wide diagnostics registry.
    pub diagnostics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingAlgorithm::default(),
            execution_model: ExecutionModel::default(),
            traversal_mask: TraversalFlags::ORDERING,
            worker_threads: 0,
            vertex_capacity: DEFAULT_VERTEX_CAPACITY,
            partial_rebuild_fraction: DEFAULT_PARTIAL_REBUILD_FRACTION,
            diagnostics: false,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ScheduleError> {
        let config: Self = serde_json::from_str(json).map_err(|err| ScheduleError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ScheduleError> {
        serde_json::to_string_pretty(self).map_err(|err| ScheduleError::Config(err.to_string()))
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if !self.partial_rebuild_fraction.is_finite() || self.partial_rebuild_fraction < 0.0 {
            return Err(ScheduleError::Config(format!(
                "partial_rebuild_fraction must be a non-negative number, got {}",
                self.partial_rebuild_fraction
            )));
        }
        if self.traversal_mask.is_empty() {
            return Err(ScheduleError::Config("traversal_mask selects no edges".into()));
        }
        Ok(())
    }

    /// Set the ordering algorithm.
    pub fn with_ordering(mut self, ordering: OrderingAlgorithm) -> Self {
        self.ordering = ordering;
        self
    }

    /// Set the default execution model.
    pub fn with_execution_model(mut self, model: ExecutionModel) -> Self {
        self.execution_model = model;
        self
    }

    /// Set the traversal mask.
    pub fn with_traversal_mask(mut self, mask: TraversalFlags) -> Self {
        self.traversal_mask = mask;
        self
    }

    /// Set the worker thread count.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the declared vertex capacity.
    pub fn with_vertex_capacity(mut self, capacity: usize) -> Self {
        self.vertex_capacity = capacity;
        self
    }

    /// Set the partial rebuild threshold.
    pub fn with_partial_rebuild_fraction(mut self, fraction: f64) -> Self {
        self.partial_rebuild_fraction = fraction;
        self
    }

    /// Toggle diagnostics.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}
