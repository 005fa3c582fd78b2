//! Vertex Kernels
//!
//! A kernel is the per-vertex work a pass runs. Kernels are registered once
//! per kind in a [`KernelRegistry`] and assigned to vertices by id, so a pass
//! only clones an `Arc` per scheduled vertex.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::graph::VertexHandle;
use crate::topology::GroupId;

/// What a kernel sees when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelContext {
    pub(crate) vertex: VertexHandle,
    pub(crate) group: GroupId,
    pub(crate) render_version: u64,
    pub(crate) upstream: SmallVec<[VertexHandle; 4]>,
}

impl KernelContext {
    /// Vertex being executed.
    pub fn vertex(&self) -> VertexHandle {
        self.vertex
    }

    /// Group of the vertex.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Render version of the pass.
    pub fn render_version(&self) -> u64 {
        self.render_version
    }

    /// Distinct sources of incoming traversal edges, ascending. Their work
    /// for this pass has completed.
    pub fn upstream(&self) -> &[VertexHandle] {
        &self.upstream
    }
}

/// Per-vertex computation.
pub trait VertexKernel: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Run the vertex's work for one pass.
    fn execute(&self, context: &KernelContext);
}

impl<F> VertexKernel for F
where
    F: Fn(&KernelContext) + Send + Sync,
{
    fn execute(&self, context: &KernelContext) {
        self(context)
    }
}

/// Index of a registered kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(u32);

impl KernelId {
    /// Raw index.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Kernel table plus the per-vertex assignment.
#[derive(Default, Clone)]
pub struct KernelRegistry {
    kernels: IndexMap<String, Arc<dyn VertexKernel>>,
    assignments: Vec<Option<KernelId>>,
}

impl KernelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel kind under `name`.
    ///
    /// Registering an existing name replaces the kernel and keeps its id.
    pub fn register(&mut self, name: impl Into<String>, kernel: impl VertexKernel + 'static) -> KernelId {
        let (index, _) = self.kernels.insert_full(name.into(), Arc::new(kernel));
        KernelId(index as u32)
    }

    /// Id of a registered kernel kind.
    pub fn id_of(&self, name: &str) -> Option<KernelId> {
        self.kernels.get_index_of(name).map(|index| KernelId(index as u32))
    }

    /// Number of registered kernel kinds.
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// True if no kernel is registered.
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Run `kernel` for `vertex` in every following pass.
    ///
    /// Returns false if the kernel id is unknown.
    pub fn assign(&mut self, vertex: VertexHandle, kernel: KernelId) -> bool {
        if kernel.0 as usize >= self.kernels.len() {
            return false;
        }
        if vertex.index() >= self.assignments.len() {
            self.assignments.resize(vertex.index() + 1, None);
        }
        self.assignments[vertex.index()] = Some(kernel);
        true
    }

    /// Remove the assignment of a vertex.
    pub fn unassign(&mut self, vertex: VertexHandle) -> Option<KernelId> {
        self.assignments.get_mut(vertex.index()).and_then(Option::take)
    }

    /// Kernel kind assigned to a vertex.
    pub fn assignment(&self, vertex: VertexHandle) -> Option<KernelId> {
        self.assignments.get(vertex.index()).copied().flatten()
    }

    /// Kernel that runs for a vertex, if any.
    pub fn kernel_for(&self, vertex: VertexHandle) -> Option<Arc<dyn VertexKernel>> {
        let id = self.assignment(vertex)?;
        self.kernels.get_index(id.0 as usize).map(|(_, kernel)| Arc::clone(kernel))
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("assigned", &self.assignments.iter().filter(|slot| slot.is_some()).count())
            .finish()
    }
}
