//! Connectivity Database
//!
//! Adjacency storage for vertices and directed edges.
//!
//! # Layout
//!
//! Edges live in a growable arena of slots addressed by stable integer
//! handles. Every vertex owns two singly-linked lists threaded through the
//! arena: one for its incoming edges and one for its outgoing edges.
//!
//! - Insertion prepends to both lists: O(1).
//! - Removal unlinks from both lists: O(local degree).
//! - Freed slots go on an explicit free list and are reused. Each slot
//!   carries a generation so stale handles are detected instead of aliasing.
//!
//! Iteration visits the most recently added edge first. Nothing in the crate
//! relies on that order for correctness; consumers only aggregate.
//!
//! # Versioning
//!
//! Every mutation is recorded in a [`TopologyChanges`] set and bumps the
//! [`VersionTracker`]. Diff application (see [`super::diff`]) mutates through
//! the unversioned internals and bumps exactly once at the end.

use crate::error::{CapacityError, InconsistentDiffError, InvariantViolation, ScheduleError};

use super::connection::{Connection, EdgeHandle, TraversalFlags};
use super::vertex::{InputPortId, OutputPortId, TopologyIndex, VertexHandle};

/// Monotonic structural version counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionTracker {
    current: u64,
}

impl VersionTracker {
    /// Current version.
    pub fn get(&self) -> u64 {
        self.current
    }

    /// Advance to the next version and return it.
    pub fn bump(&mut self) -> u64 {
        self.current += 1;
        self.current
    }
}

/// Structural changes accumulated since the last [`ConnectivityDatabase::take_changes`].
///
/// The topology cache uses this as an incrementality hint. It only trusts a
/// change set whose `base_version` equals the version it was last built
/// against; anything else forces a full rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChanges {
    pub(crate) base_version: u64,
    pub(crate) version: u64,
    pub(crate) touched: Vec<VertexHandle>,
    pub(crate) created: Vec<VertexHandle>,
    pub(crate) destroyed: Vec<VertexHandle>,
}

impl TopologyChanges {
    /// Version the change set starts from.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Version the change set brings the database to.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Vertices with an added or removed incident edge.
    pub fn touched(&self) -> &[VertexHandle] {
        &self.touched
    }

    /// Vertices registered since the base version.
    pub fn created(&self) -> &[VertexHandle] {
        &self.created
    }

    /// Vertices unregistered since the base version.
    pub fn destroyed(&self) -> &[VertexHandle] {
        &self.destroyed
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.created.is_empty() && self.destroyed.is_empty()
    }

    /// Number of recorded vertex changes, duplicates included.
    pub fn len(&self) -> usize {
        self.touched.len() + self.created.len() + self.destroyed.len()
    }

    fn touch_edge(&mut self, connection: &Connection) {
        self.touched.push(connection.source);
        if connection.destination != connection.source {
            self.touched.push(connection.destination);
        }
    }
}

/// Which of a vertex's two lists an operation walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone)]
struct EdgeEntry {
    connection: Connection,
    /// Next slot in the destination's incoming list.
    next_in: Option<u32>,
    /// Next slot in the source's outgoing list.
    next_out: Option<u32>,
}

impl EdgeEntry {
    fn next(&self, direction: Direction) -> Option<u32> {
        match direction {
            Direction::Incoming => self.next_in,
            Direction::Outgoing => self.next_out,
        }
    }

    fn set_next(&mut self, direction: Direction, next: Option<u32>) {
        match direction {
            Direction::Incoming => self.next_in = next,
            Direction::Outgoing => self.next_out = next,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct EdgeSlot {
    generation: u32,
    entry: Option<EdgeEntry>,
}

/// Port filter applied by [`Edges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortFilter {
    Any,
    Input(InputPortId),
    Output(OutputPortId),
}

impl PortFilter {
    fn accepts(&self, connection: &Connection) -> bool {
        match self {
            Self::Any => true,
            Self::Input(port) => connection.destination_port == *port,
            Self::Output(port) => connection.source_port == *port,
        }
    }
}

/// Lazy walk over one of a vertex's edge lists.
///
/// Finite and restartable: clone it before iterating to walk the same list
/// again.
#[derive(Debug, Clone)]
pub struct Edges<'a> {
    database: &'a ConnectivityDatabase,
    cursor: Option<u32>,
    direction: Direction,
    port: PortFilter,
    mask: Option<TraversalFlags>,
}

impl<'a> Edges<'a> {
    /// Only yield edges whose flags intersect `mask`.
    pub fn matching(mut self, mask: TraversalFlags) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Yield the vertex at the other end of each edge.
    pub fn neighbors(self) -> impl Iterator<Item = VertexHandle> + 'a {
        let direction = self.direction;
        self.map(move |(_, connection)| match direction {
            Direction::Incoming => connection.source,
            Direction::Outgoing => connection.destination,
        })
    }
}

impl<'a> Iterator for Edges<'a> {
    type Item = (EdgeHandle, &'a Connection);

    fn next(&mut self) -> Option<Self::Item> {
        let database: &'a ConnectivityDatabase = self.database;
        while let Some(slot) = self.cursor {
            let record = &database.edges[slot as usize];
            let Some(entry) = record.entry.as_ref() else {
                debug_assert!(false, "edge list links free slot {slot}");
                self.cursor = None;
                return None;
            };
            self.cursor = entry.next(self.direction);

            let connection = &entry.connection;
            if !self.port.accepts(connection) {
                continue;
            }
            if let Some(mask) = self.mask {
                if !connection.participates(mask) {
                    continue;
                }
            }

            let handle = EdgeHandle {
                slot,
                generation: record.generation,
            };
            return Some((handle, connection));
        }
        None
    }
}

/// Adjacency storage for the computation graph.
#[derive(Debug, Clone)]
pub struct ConnectivityDatabase {
    /// Per-vertex list heads, indexed by vertex handle.
    vertices: Vec<Option<TopologyIndex>>,

    /// Edge arena.
    edges: Vec<EdgeSlot>,

    /// Reusable arena slots.
    free_slots: Vec<u32>,

    vertex_count: usize,
    edge_count: usize,

    /// Upper bound on vertex handle indices, declared by the node lifecycle.
    vertex_capacity: usize,

    version: VersionTracker,
    changes: TopologyChanges,
}

impl ConnectivityDatabase {
    /// Create an empty database accepting vertex indices below `vertex_capacity`.
    pub fn new(vertex_capacity: usize) -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            free_slots: Vec::new(),
            vertex_count: 0,
            edge_count: 0,
            vertex_capacity,
            version: VersionTracker::default(),
            changes: TopologyChanges::default(),
        }
    }

    /// Current structural version.
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// Declared upper bound on vertex indices.
    pub fn vertex_capacity(&self) -> usize {
        self.vertex_capacity
    }

    /// Change the declared vertex capacity.
    ///
    /// Fails if a live vertex would fall outside the new bound.
    pub fn set_vertex_capacity(&mut self, capacity: usize) -> Result<(), CapacityError> {
        let required = self.vertex_slots_in_use();
        if required > capacity {
            return Err(CapacityError { required, capacity });
        }
        self.vertex_capacity = capacity;
        Ok(())
    }

    /// Length of the per-vertex table needed to index every live vertex.
    pub fn vertex_slots_in_use(&self) -> usize {
        self.vertices
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |last| last + 1)
    }

    /// Number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Check if a vertex is registered.
    pub fn contains_vertex(&self, vertex: VertexHandle) -> bool {
        matches!(self.vertices.get(vertex.index()), Some(Some(_)))
    }

    /// Adjacency record of a live vertex.
    pub fn topology_index(&self, vertex: VertexHandle) -> Option<&TopologyIndex> {
        self.vertices.get(vertex.index()).and_then(Option::as_ref)
    }

    /// All live vertices in ascending handle order.
    pub fn vertices(&self) -> impl Iterator<Item = VertexHandle> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| VertexHandle::new(index as u32))
    }

    /// Look up the connection behind a handle.
    pub fn connection(&self, handle: EdgeHandle) -> Option<&Connection> {
        self.edges
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| &entry.connection)
    }

    /// Edges landing on `vertex`, optionally restricted to one input port.
    pub fn edges_into(&self, vertex: VertexHandle, port: Option<InputPortId>) -> Edges<'_> {
        Edges {
            database: self,
            cursor: self.topology_index(vertex).and_then(|index| index.first_in),
            direction: Direction::Incoming,
            port: port.map_or(PortFilter::Any, PortFilter::Input),
            mask: None,
        }
    }

    /// Edges leaving `vertex`, optionally restricted to one output port.
    pub fn edges_out_of(&self, vertex: VertexHandle, port: Option<OutputPortId>) -> Edges<'_> {
        Edges {
            database: self,
            cursor: self.topology_index(vertex).and_then(|index| index.first_out),
            direction: Direction::Outgoing,
            port: port.map_or(PortFilter::Any, PortFilter::Output),
            mask: None,
        }
    }

    /// Number of incoming edges whose flags intersect `mask`.
    pub fn in_degree(&self, vertex: VertexHandle, mask: TraversalFlags) -> usize {
        self.edges_into(vertex, None).matching(mask).count()
    }

    /// Number of outgoing edges whose flags intersect `mask`.
    pub fn out_degree(&self, vertex: VertexHandle, mask: TraversalFlags) -> usize {
        self.edges_out_of(vertex, None).matching(mask).count()
    }

    /// Number of incident edges regardless of flags.
    pub fn degree(&self, vertex: VertexHandle) -> usize {
        self.edges_into(vertex, None).count() + self.edges_out_of(vertex, None).count()
    }

    /// Find an edge with exactly this connection record.
    pub fn find_edge(&self, connection: &Connection) -> Option<EdgeHandle> {
        self.edges_out_of(connection.source, Some(connection.source_port))
            .find(|(_, candidate)| *candidate == connection)
            .map(|(handle, _)| handle)
    }

    /// Register a vertex so edges can attach to it.
    pub fn register_vertex(&mut self, vertex: VertexHandle) -> Result<(), ScheduleError> {
        self.insert_vertex(vertex)?;
        self.bump_version();
        Ok(())
    }

    /// Unregister a vertex. All incident edges must have been removed first.
    pub fn unregister_vertex(&mut self, vertex: VertexHandle) -> Result<(), ScheduleError> {
        self.erase_vertex(vertex)?;
        self.bump_version();
        Ok(())
    }

    /// Insert an edge. Both endpoints must be registered.
    pub fn add_edge(&mut self, connection: Connection) -> Result<EdgeHandle, InconsistentDiffError> {
        let handle = self.attach_edge(connection)?;
        self.bump_version();
        Ok(handle)
    }

    /// Remove an edge and return its connection record.
    pub fn remove_edge(&mut self, handle: EdgeHandle) -> Result<Connection, InconsistentDiffError> {
        let connection = self.detach_edge(handle)?;
        self.bump_version();
        Ok(connection)
    }

    /// Changes accumulated since the last drain.
    pub fn pending_changes(&self) -> &TopologyChanges {
        &self.changes
    }

    /// Drain the accumulated change set.
    pub fn take_changes(&mut self) -> TopologyChanges {
        let version = self.version.get();
        let mut changes = std::mem::take(&mut self.changes);
        changes.version = version;
        self.changes.base_version = version;
        self.changes.version = version;
        changes
    }

    /// Walk every list and check it against the arena.
    ///
    /// Every live edge must appear exactly once in its source's outgoing list
    /// and once in its destination's incoming list, and the live counters
    /// must match the tables.
    pub fn validate_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen_in = vec![0u32; self.edges.len()];
        let mut seen_out = vec![0u32; self.edges.len()];

        for vertex in self.vertices() {
            for (handle, connection) in self.edges_into(vertex, None) {
                if connection.destination != vertex {
                    return Err(InvariantViolation::MisplacedIncoming {
                        edge: handle,
                        vertex,
                        destination: connection.destination,
                    });
                }
                seen_in[handle.slot as usize] += 1;
            }
            for (handle, connection) in self.edges_out_of(vertex, None) {
                if connection.source != vertex {
                    return Err(InvariantViolation::MisplacedOutgoing {
                        edge: handle,
                        vertex,
                        origin: connection.source,
                    });
                }
                seen_out[handle.slot as usize] += 1;
            }
        }

        let mut live = 0;
        for (slot, record) in self.edges.iter().enumerate() {
            let expected = u32::from(record.entry.is_some());
            if seen_in[slot] != expected || seen_out[slot] != expected {
                return Err(InvariantViolation::SlotLinks {
                    slot,
                    incoming: seen_in[slot],
                    outgoing: seen_out[slot],
                    expected,
                });
            }
            live += expected as usize;
        }

        if live != self.edge_count {
            return Err(InvariantViolation::EdgeCount {
                recorded: self.edge_count,
                live,
            });
        }
        let registered = self.vertices().count();
        if registered != self.vertex_count {
            return Err(InvariantViolation::VertexCount {
                recorded: self.vertex_count,
                live: registered,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Unversioned internals shared with diff application
    // ------------------------------------------------------------------------

    pub(crate) fn bump_version(&mut self) {
        let version = self.version.bump();
        self.changes.version = version;
    }

    pub(crate) fn insert_vertex(&mut self, vertex: VertexHandle) -> Result<(), ScheduleError> {
        let index = vertex.index();
        if index >= self.vertex_capacity {
            return Err(CapacityError {
                required: index + 1,
                capacity: self.vertex_capacity,
            }
            .into());
        }
        if self.contains_vertex(vertex) {
            return Err(InconsistentDiffError::VertexExists(vertex).into());
        }
        if index >= self.vertices.len() {
            self.vertices.resize(index + 1, None);
        }
        self.vertices[index] = Some(TopologyIndex::default());
        self.vertex_count += 1;
        self.changes.created.push(vertex);
        Ok(())
    }

    pub(crate) fn erase_vertex(&mut self, vertex: VertexHandle) -> Result<(), InconsistentDiffError> {
        let Some(index) = self.topology_index(vertex) else {
            return Err(InconsistentDiffError::UnknownVertex(vertex));
        };
        if !index.is_isolated() {
            return Err(InconsistentDiffError::VertexHasEdges {
                vertex,
                edges: self.degree(vertex),
            });
        }
        self.vertices[vertex.index()] = None;
        self.vertex_count -= 1;
        self.changes.destroyed.push(vertex);
        Ok(())
    }

    pub(crate) fn attach_edge(&mut self, connection: Connection) -> Result<EdgeHandle, InconsistentDiffError> {
        for endpoint in [connection.source, connection.destination] {
            if !self.contains_vertex(endpoint) {
                return Err(InconsistentDiffError::UnknownVertex(endpoint));
            }
        }

        let next_in = self.head(connection.destination, Direction::Incoming);
        let next_out = self.head(connection.source, Direction::Outgoing);
        let entry = EdgeEntry {
            connection,
            next_in,
            next_out,
        };

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.edges[slot as usize].entry = Some(entry);
                slot
            }
            None => {
                self.edges.push(EdgeSlot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.edges.len() - 1) as u32
            }
        };

        self.set_head(connection.destination, Direction::Incoming, Some(slot));
        self.set_head(connection.source, Direction::Outgoing, Some(slot));
        self.edge_count += 1;
        self.changes.touch_edge(&connection);

        Ok(EdgeHandle {
            slot,
            generation: self.edges[slot as usize].generation,
        })
    }

    pub(crate) fn detach_edge(&mut self, handle: EdgeHandle) -> Result<Connection, InconsistentDiffError> {
        let connection = *self
            .connection(handle)
            .ok_or(InconsistentDiffError::UnknownEdge(handle))?;

        self.unlink(connection.destination, Direction::Incoming, handle.slot);
        self.unlink(connection.source, Direction::Outgoing, handle.slot);

        let record = &mut self.edges[handle.slot as usize];
        record.entry = None;
        record.generation = record.generation.wrapping_add(1);
        self.free_slots.push(handle.slot);
        self.edge_count -= 1;
        self.changes.touch_edge(&connection);

        Ok(connection)
    }

    fn head(&self, vertex: VertexHandle, direction: Direction) -> Option<u32> {
        self.topology_index(vertex).and_then(|index| match direction {
            Direction::Incoming => index.first_in,
            Direction::Outgoing => index.first_out,
        })
    }

    fn set_head(&mut self, vertex: VertexHandle, direction: Direction, slot: Option<u32>) {
        if let Some(Some(index)) = self.vertices.get_mut(vertex.index()) {
            match direction {
                Direction::Incoming => index.first_in = slot,
                Direction::Outgoing => index.first_out = slot,
            }
        }
    }

    fn next_link(&self, slot: u32, direction: Direction) -> Option<u32> {
        self.edges[slot as usize]
            .entry
            .as_ref()
            .and_then(|entry| entry.next(direction))
    }

    /// Remove `target` from one of `vertex`'s lists.
    fn unlink(&mut self, vertex: VertexHandle, direction: Direction, target: u32) {
        let after = self.next_link(target, direction);
        let head = self.head(vertex, direction);

        if head == Some(target) {
            self.set_head(vertex, direction, after);
            return;
        }

        let mut cursor = head;
        while let Some(current) = cursor {
            let following = self.next_link(current, direction);
            if following == Some(target) {
                if let Some(entry) = self.edges[current as usize].entry.as_mut() {
                    entry.set_next(direction, after);
                }
                return;
            }
            cursor = following;
        }

        debug_assert!(false, "edge slot {target} missing from {direction:?} list of {vertex}");
    }
}

impl Default for ConnectivityDatabase {
    fn default() -> Self {
        Self::new(u32::MAX as usize)
    }
}
