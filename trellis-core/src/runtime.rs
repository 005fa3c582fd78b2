//! Execution Graph
//!
//! The host facade. It owns the connectivity database, the topology cache,
//! the kernel registry and the fence scheduler, and drives them through one
//! pass at a time.
//!
//! # How a Frame Works
//!
//! 1. The host hands over a [`StructuralDiff`]. It is applied atomically,
//!    its data commands are queued, and the topology cache is brought up to
//!    date on the worker pool.
//!
//! 2. The first [`ExecutionGraph::root_fence`] call of the frame schedules a
//!    pass under the requested model. Later calls in the same frame return
//!    the memoized root recombined with external dependencies.
//!
//! 3. The host waits on the root fence, or reads single vertices back as
//!    soon as their own work is done.

use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::diagnostics;
use crate::error::ScheduleError;
use crate::fence::{JobFence, TaskGraph};
use crate::graph::{AppliedDiff, ConnectivityDatabase, DataCommand, StructuralDiff, VertexHandle};
use crate::schedule::{ExecutionModel, FenceScheduler, KernelId, KernelRegistry, ScheduledPass, VertexKernel};
use crate::topology::{GroupWalker, RebuildMode, RebuildReport, RootCacheWalker, TopologyCache};

/// Outcome of [`ExecutionGraph::apply_diff_and_rebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Result of applying the diff.
    pub applied: AppliedDiff,
    /// Result of the topology rebuild.
    pub rebuild: RebuildReport,
}

/// A mutable computation graph with incremental scheduling.
#[derive(Debug)]
pub struct ExecutionGraph {
    config: SchedulerConfig,
    database: ConnectivityDatabase,
    cache: TopologyCache,
    kernels: KernelRegistry,
    scheduler: FenceScheduler,

    /// Data commands waiting for the value marshalling collaborator.
    data_commands: Vec<DataCommand>,

    /// Whether the current frame already has a scheduled pass.
    frame_scheduled: bool,
}

impl ExecutionGraph {
    /// Create an empty graph.
    pub fn new(config: SchedulerConfig) -> Result<Self, ScheduleError> {
        config.validate()?;
        if config.diagnostics {
            diagnostics::enable();
        }

        let tasks = TaskGraph::new(config.worker_threads)?;
        debug!(
            threads = tasks.thread_count(),
            ordering = ?config.ordering,
            model = %config.execution_model,
            "execution graph created"
        );

        Ok(Self {
            database: ConnectivityDatabase::new(config.vertex_capacity),
            cache: TopologyCache::from_config(&config),
            kernels: KernelRegistry::new(),
            scheduler: FenceScheduler::new(tasks),
            data_commands: Vec::new(),
            frame_scheduled: false,
            config,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The connectivity database.
    pub fn database(&self) -> &ConnectivityDatabase {
        &self.database
    }

    /// The topology cache.
    pub fn topology(&self) -> &TopologyCache {
        &self.cache
    }

    /// The fence scheduler.
    pub fn scheduler(&self) -> &FenceScheduler {
        &self.scheduler
    }

    /// Register a kernel kind. See [`KernelRegistry::register`].
    pub fn register_kernel(&mut self, name: impl Into<String>, kernel: impl VertexKernel + 'static) -> KernelId {
        self.kernels.register(name, kernel)
    }

    /// Run `kernel` for `vertex` in every following pass.
    pub fn assign_kernel(&mut self, vertex: VertexHandle, kernel: KernelId) -> bool {
        self.kernels.assign(vertex, kernel)
    }

    /// Kernel registry.
    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    /// Apply a diff, rebuild the topology and open a new frame.
    ///
    /// Destroyed vertices lose their kernel assignment, so a re-created
    /// handle starts without one.
    ///
    /// A rejected diff leaves everything untouched. Cycles do not stop the
    /// pass: the cache is rebuilt, the cyclic groups are excluded, and the
    /// cycles are returned as [`ScheduleError::Cycles`].
    pub fn apply_diff_and_rebuild(&mut self, diff: &StructuralDiff) -> Result<PassReport, ScheduleError> {
        let applied = self.database.apply(diff)?;
        self.data_commands.extend_from_slice(&applied.data_commands);

        let changes = self.database.take_changes();
        for &vertex in changes.destroyed() {
            self.kernels.unassign(vertex);
        }

        let database = &self.database;
        let cache = &mut self.cache;
        let rebuild = self.scheduler.task_graph().install(|| cache.rebuild(database, &changes));
        self.frame_scheduled = false;

        diagnostics::record("diff.commands", diff.len() as u64);
        match rebuild.mode {
            RebuildMode::Skipped => diagnostics::record("rebuild.skipped", 0),
            RebuildMode::Full => diagnostics::record("rebuild.full", rebuild.vertices_visited as u64),
            RebuildMode::Partial => diagnostics::record("rebuild.partial", rebuild.vertices_visited as u64),
        }

        if rebuild.has_cycles() {
            diagnostics::record("rebuild.cycles", rebuild.cycles.len() as u64);
            warn!(
                cycles = rebuild.cycles.len(),
                version = rebuild.version,
                "pass completed with cyclic groups"
            );
            return Err(ScheduleError::Cycles(rebuild.cycles));
        }

        Ok(PassReport { applied, rebuild })
    }

    /// Schedule a pass now, even if the frame already has one.
    pub fn run_pass(&mut self, model: ExecutionModel) -> Result<ScheduledPass, ScheduleError> {
        let pass = self
            .scheduler
            .schedule(&self.database, &self.cache, &self.kernels, model)?;
        self.frame_scheduled = true;
        diagnostics::record("pass.tasks", pass.tasks as u64);
        Ok(pass)
    }

    /// Root fence of the current frame, scheduling a pass under `model` if
    /// the frame has none yet.
    pub fn root_fence(&mut self, model: ExecutionModel) -> Result<JobFence, ScheduleError> {
        if !self.frame_scheduled {
            self.run_pass(model)?;
        }
        Ok(self.scheduler.root_fence())
    }

    /// Make every later root fence also wait for `fence`.
    pub fn inject_external_dependency(&mut self, fence: JobFence) {
        self.scheduler.inject_external_dependency(fence);
    }

    /// Block until the frame's work under `model` has finished.
    pub fn wait(&mut self, model: ExecutionModel) -> Result<(), ScheduleError> {
        if !self.frame_scheduled {
            self.run_pass(model)?;
        }
        self.scheduler.wait();
        Ok(())
    }

    /// [`ExecutionGraph::wait`] with the configured model.
    pub fn wait_default(&mut self) -> Result<(), ScheduleError> {
        self.wait(self.config.execution_model)
    }

    /// Handle of the last work scheduled for `vertex`.
    pub fn vertex_fence(&self, vertex: VertexHandle) -> Option<JobFence> {
        self.scheduler.vertex_fence(vertex)
    }

    /// Wait for the vertex's last scheduled work, then run `read`.
    pub fn read_back<R>(&self, vertex: VertexHandle, read: impl FnOnce() -> R) -> R {
        self.scheduler.read_back(vertex, read)
    }

    /// Groups by ascending id.
    pub fn groups(&self) -> GroupWalker<'_> {
        self.cache.groups()
    }

    /// Root vertices of every group.
    pub fn root_cache(&self) -> RootCacheWalker<'_> {
        self.cache.root_cache()
    }

    /// Whole-graph execution order.
    pub fn global_order(&self) -> &[VertexHandle] {
        self.cache.global_order()
    }

    /// Drain queued data commands in recording order.
    pub fn take_data_commands(&mut self) -> Vec<DataCommand> {
        std::mem::take(&mut self.data_commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, OutputPortId};
    use crate::schedule::KernelContext;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn v(index: u32) -> VertexHandle {
        VertexHandle::new(index)
    }

    fn graph() -> ExecutionGraph {
        ExecutionGraph::new(SchedulerConfig::default().with_worker_threads(2)).unwrap()
    }

    #[test]
    fn frame_schedules_once() {
        let mut graph = graph();
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0)).create_vertex(v(1)).connect(Connection::data(v(0), v(1)));
        graph.apply_diff_and_rebuild(&diff).unwrap();

        graph.root_fence(ExecutionModel::Islands).unwrap().wait();
        graph.root_fence(ExecutionModel::Islands).unwrap().wait();
        assert_eq!(graph.scheduler().render_version(), 1);

        graph.apply_diff_and_rebuild(&StructuralDiff::new()).unwrap();
        graph.wait(ExecutionModel::Islands).unwrap();
        assert_eq!(graph.scheduler().render_version(), 2);
    }

    #[test]
    fn rejected_diff_changes_nothing() {
        let mut graph = graph();
        let mut diff = StructuralDiff::new();
        diff.connect(Connection::data(v(0), v(1)));

        assert!(matches!(
            graph.apply_diff_and_rebuild(&diff),
            Err(ScheduleError::InconsistentDiff(_))
        ));
        assert_eq!(graph.database().version(), 0);
        assert!(graph.topology().version().is_none());
    }

    #[test]
    fn cycles_are_reported_after_the_rebuild() {
        let mut graph = graph();
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0))
            .create_vertex(v(1))
            .create_vertex(v(2))
            .connect(Connection::data(v(0), v(1)))
            .connect(Connection::data(v(1), v(0)));

        let err = graph.apply_diff_and_rebuild(&diff).unwrap_err();
        assert_eq!(err.cycles().len(), 1);
        assert!(graph.topology().is_current(graph.database()));
        assert_eq!(graph.global_order(), &[v(2)]);
        graph.wait(ExecutionModel::MaximallyParallel).unwrap();
    }

    #[test]
    fn data_commands_are_queued() {
        let mut graph = graph();
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0)).observe_value(v(0), OutputPortId(0), true);
        graph.apply_diff_and_rebuild(&diff).unwrap();

        let commands = graph.take_data_commands();
        assert_eq!(commands.len(), 1);
        assert!(graph.take_data_commands().is_empty());
    }

    #[test]
    fn destroyed_vertices_lose_their_kernel() {
        let mut graph = graph();
        let runs = Arc::new(Mutex::new(0usize));
        let counter = runs.clone();
        let kernel = graph.register_kernel("count", move |_: &KernelContext| {
            *counter.lock() += 1;
        });

        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0));
        graph.apply_diff_and_rebuild(&diff).unwrap();
        assert!(graph.assign_kernel(v(0), kernel));
        graph.wait_default().unwrap();
        assert_eq!(*runs.lock(), 1);

        let mut destroy = StructuralDiff::new();
        destroy.destroy_vertex(v(0));
        graph.apply_diff_and_rebuild(&destroy).unwrap();
        assert_eq!(graph.kernels().assignment(v(0)), None);

        let mut recreate = StructuralDiff::new();
        recreate.create_vertex(v(0));
        graph.apply_diff_and_rebuild(&recreate).unwrap();
        graph.wait_default().unwrap();
        assert_eq!(*runs.lock(), 1);
    }

    #[test]
    fn kernels_run_through_the_facade() {
        let mut graph = graph();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let kernel = graph.register_kernel("collect", move |context: &KernelContext| {
            sink.lock().push((context.vertex(), context.upstream().to_vec()));
        });

        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0)).create_vertex(v(1)).connect(Connection::data(v(0), v(1)));
        graph.apply_diff_and_rebuild(&diff).unwrap();
        assert!(graph.assign_kernel(v(0), kernel));
        assert!(graph.assign_kernel(v(1), kernel));

        graph.wait_default().unwrap();
        let upstream_of_one = graph.read_back(v(1), || {
            seen.lock()
                .iter()
                .find(|(vertex, _)| *vertex == v(1))
                .map(|(_, upstream)| upstream.clone())
        });
        assert_eq!(upstream_of_one, Some(vec![v(0)]));
    }
}
