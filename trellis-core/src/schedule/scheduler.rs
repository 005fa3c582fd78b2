//! Execution Fence Scheduler
//!
//! Turns the cached topology into tasks on a [`TaskGraph`] and tracks the
//! completion handle of every vertex's last scheduled work.
//!
//! # Passes
//!
//! Each call to [`FenceScheduler::schedule`] is one pass and bumps the
//! render version. Cyclic groups are skipped. Tasks without an upstream
//! dependency inside the pass wait on the previous pass's root fence, so
//! work for a vertex never overlaps across passes.
//!
//! # Root fence
//!
//! The root fence of a pass combines the distinct handles of every group's
//! leaves. Every scheduled vertex is upstream of some leaf (or shares its
//! task), so the root covers the whole pass. It is computed once per render
//! version and recombined with externally injected dependencies each time it
//! is handed out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, error};

use crate::error::ScheduleError;
use crate::fence::{panic_message, JobFence, TaskGraph};
use crate::graph::{ConnectivityDatabase, TraversalFlags, VertexHandle};
use crate::topology::{Group, TopologyCache};

use super::kernel::{KernelContext, KernelRegistry, VertexKernel};
use super::model::ExecutionModel;

/// Summary of one scheduled pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPass {
    /// Render version of the pass.
    pub render_version: u64,
    /// Model the pass was scheduled under.
    pub model: ExecutionModel,
    /// Tasks submitted to the task graph.
    pub tasks: usize,
    /// Vertices with work in this pass.
    pub vertices: usize,
    /// Cyclic groups left out.
    pub excluded_groups: usize,
    /// Distinct handles combined into the root fence.
    pub root_handles: usize,
}

/// One vertex's share of a task.
struct VertexWork {
    kernel: Option<Arc<dyn VertexKernel>>,
    context: KernelContext,
}

impl VertexWork {
    fn run(&self) {
        let Some(kernel) = &self.kernel else { return };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| kernel.execute(&self.context))) {
            error!(
                vertex = %self.context.vertex,
                kernel = kernel.name(),
                reason = panic_message(payload.as_ref()),
                "vertex kernel panicked"
            );
        }
    }
}

/// Schedules passes and owns the per-vertex completion handles.
#[derive(Debug)]
pub struct FenceScheduler {
    tasks: TaskGraph,

    /// Handle of the last work scheduled for each vertex.
    vertex_fences: Vec<Option<JobFence>>,

    /// Vertices that received work in the current render version.
    scheduled: Vec<VertexHandle>,

    render_version: u64,

    /// Root of the current render version, before external dependencies.
    root: JobFence,

    external: Vec<JobFence>,
}

impl FenceScheduler {
    /// Create a scheduler submitting to `tasks`.
    pub fn new(tasks: TaskGraph) -> Self {
        Self {
            tasks,
            vertex_fences: Vec::new(),
            scheduled: Vec::new(),
            render_version: 0,
            root: JobFence::completed(),
            external: Vec::new(),
        }
    }

    /// Task graph the scheduler submits to.
    pub fn task_graph(&self) -> &TaskGraph {
        &self.tasks
    }

    /// Number of passes scheduled so far.
    pub fn render_version(&self) -> u64 {
        self.render_version
    }

    /// Schedule one pass over the current topology.
    ///
    /// Fails with [`ScheduleError::StaleTopology`] if the cache was not
    /// rebuilt against the database's current version.
    pub fn schedule(
        &mut self,
        database: &ConnectivityDatabase,
        cache: &TopologyCache,
        kernels: &KernelRegistry,
        model: ExecutionModel,
    ) -> Result<ScheduledPass, ScheduleError> {
        cache.ensure_current(database)?;

        self.render_version += 1;
        let render_version = self.render_version;
        let previous = self.root.clone();
        let mask = cache.mask();

        self.forget_dead_vertices(database);
        self.scheduled.clear();

        let executable: Vec<&Group> = cache.groups().filter(|group| !group.is_cyclic()).collect();
        let excluded_groups = cache.group_count() - executable.len();

        let work = |vertex: VertexHandle, group: &Group| VertexWork {
            kernel: kernels.kernel_for(vertex),
            context: KernelContext {
                vertex,
                group: group.id(),
                render_version,
                upstream: upstream_of(database, vertex, mask),
            },
        };

        let mut tasks = 0;
        match model {
            ExecutionModel::MaximallyParallel => {
                for &group in &executable {
                    for &vertex in group.order() {
                        let unit = work(vertex, group);
                        // Upstream vertices precede this one in the order, so
                        // their slots already hold this pass's handles.
                        let mut dependencies: SmallVec<[JobFence; 4]> = unit
                            .context
                            .upstream
                            .iter()
                            .filter_map(|source| self.fence_slot(*source).cloned())
                            .collect();
                        if dependencies.is_empty() {
                            dependencies.push(previous.clone());
                        }
                        let fence = self.tasks.schedule(&dependencies, move || unit.run());
                        self.record(vertex, fence);
                        tasks += 1;
                    }
                }
            }
            ExecutionModel::Islands => {
                for &group in &executable {
                    let units: Vec<VertexWork> = group.order().iter().map(|&vertex| work(vertex, group)).collect();
                    let fence = self.tasks.schedule(&[previous.clone()], move || {
                        for unit in &units {
                            unit.run();
                        }
                    });
                    for &vertex in group.order() {
                        self.record(vertex, fence.clone());
                    }
                    tasks += 1;
                }
            }
            ExecutionModel::SingleThreaded => {
                let mut units = Vec::with_capacity(cache.global_order().len());
                for &vertex in cache.global_order() {
                    let Some(group) = cache.group_of(vertex).and_then(|id| cache.group(id)) else {
                        continue;
                    };
                    units.push(work(vertex, group));
                }
                if !units.is_empty() {
                    let vertices: Vec<VertexHandle> = units.iter().map(|unit| unit.context.vertex).collect();
                    let fence = self.tasks.schedule(&[previous.clone()], move || {
                        for unit in &units {
                            unit.run();
                        }
                    });
                    for vertex in vertices {
                        self.record(vertex, fence.clone());
                    }
                    tasks += 1;
                }
            }
        }

        let leaves = executable
            .iter()
            .flat_map(|group| group.leaves().iter())
            .filter_map(|&leaf| self.fence_slot(leaf).cloned());
        let mut handles: SmallVec<[JobFence; 8]> = SmallVec::new();
        for fence in leaves {
            if !handles.iter().any(|seen| seen.ptr_eq(&fence)) {
                handles.push(fence);
            }
        }
        let root_handles = handles.len();
        self.root = if tasks == 0 {
            previous
        } else {
            JobFence::combine(handles)
        };

        debug!(
            render_version,
            %model,
            tasks,
            vertices = self.scheduled.len(),
            excluded_groups,
            root_handles,
            "pass scheduled"
        );

        Ok(ScheduledPass {
            render_version,
            model,
            tasks,
            vertices: self.scheduled.len(),
            excluded_groups,
            root_handles,
        })
    }

    /// Root fence of the current render version, combined with every
    /// pending external dependency.
    pub fn root_fence(&mut self) -> JobFence {
        self.external.retain(|fence| !fence.is_complete());
        JobFence::combine(std::iter::once(self.root.clone()).chain(self.external.iter().cloned()))
    }

    /// Make every later root fence wait for `fence` too.
    pub fn inject_external_dependency(&mut self, fence: JobFence) {
        self.external.push(fence);
    }

    /// Handle of the last work scheduled for `vertex`.
    pub fn vertex_fence(&self, vertex: VertexHandle) -> Option<JobFence> {
        self.fence_slot(vertex).cloned()
    }

    /// Wait for the vertex's last scheduled work, then run `read`.
    pub fn read_back<R>(&self, vertex: VertexHandle, read: impl FnOnce() -> R) -> R {
        if let Some(fence) = self.fence_slot(vertex) {
            fence.wait();
        }
        read()
    }

    /// Block on the root fence.
    ///
    /// Debug builds then check that every vertex scheduled in the current
    /// render version reports completed.
    pub fn wait(&mut self) {
        self.root_fence().wait();
        debug_assert!(
            self.unfinished().is_empty(),
            "root fence completed before {:?}",
            self.unfinished()
        );
    }

    /// Vertices scheduled in the current render version whose handle has
    /// not completed.
    pub fn unfinished(&self) -> Vec<VertexHandle> {
        self.scheduled
            .iter()
            .copied()
            .filter(|&vertex| self.fence_slot(vertex).map_or(false, |fence| !fence.is_complete()))
            .collect()
    }

    /// Vertices that received work in the current render version.
    pub fn scheduled_vertices(&self) -> &[VertexHandle] {
        &self.scheduled
    }

    fn fence_slot(&self, vertex: VertexHandle) -> Option<&JobFence> {
        self.vertex_fences.get(vertex.index()).and_then(Option::as_ref)
    }

    fn record(&mut self, vertex: VertexHandle, fence: JobFence) {
        if vertex.index() >= self.vertex_fences.len() {
            self.vertex_fences.resize(vertex.index() + 1, None);
        }
        self.vertex_fences[vertex.index()] = Some(fence);
        self.scheduled.push(vertex);
    }

    fn forget_dead_vertices(&mut self, database: &ConnectivityDatabase) {
        self.vertex_fences.truncate(database.vertex_slots_in_use());
        for (index, slot) in self.vertex_fences.iter_mut().enumerate() {
            if slot.is_some() && !database.contains_vertex(VertexHandle::new(index as u32)) {
                *slot = None;
            }
        }
    }
}

fn upstream_of(database: &ConnectivityDatabase, vertex: VertexHandle, mask: TraversalFlags) -> SmallVec<[VertexHandle; 4]> {
    let mut sources: SmallVec<[VertexHandle; 4]> = database
        .edges_into(vertex, None)
        .matching(mask)
        .map(|(_, connection)| connection.source)
        .filter(|&source| source != vertex)
        .collect();
    sources.sort_unstable();
    sources.dedup();
    sources
}
