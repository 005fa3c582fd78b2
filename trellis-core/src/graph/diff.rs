//! Structural Diff Queue
//!
//! A [`StructuralDiff`] is an atomic, ordered batch of mutations produced by
//! the upstream construction phase and applied at the start of a pass.
//!
//! # Storage
//!
//! Each command kind has its own side table. A master list records
//! `(kind, index into side table)` pairs so replay follows recording order
//! even though the tables grow independently.
//!
//! # Application
//!
//! [`ConnectivityDatabase::apply`] validates the whole batch against the
//! current database first. Capacity and consistency errors reject the diff
//! before anything is mutated. The commands are then replayed in order and
//! the version is bumped exactly once, so the topology cache never observes
//! an intermediate state.
//!
//! Buffer/array resizes and value observation changes do not touch
//! adjacency. They are forwarded in order as [`DataCommand`]s for the value
//! marshalling collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CapacityError, InconsistentDiffError, ScheduleError};

use super::connection::Connection;
use super::database::ConnectivityDatabase;
use super::vertex::{InputPortId, OutputPortId, VertexHandle};

/// Kind tag of a recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffCommandKind {
    /// A vertex was instantiated.
    CreateVertex,
    /// A vertex was destroyed.
    DestroyVertex,
    /// An edge was connected.
    Connect,
    /// An edge was disconnected.
    Disconnect,
    /// An output buffer changed size.
    ResizeBuffer,
    /// An input port array changed size.
    ResizeArray,
    /// An output value started or stopped being observed.
    ObserveValue,
}

impl DiffCommandKind {
    /// True for commands that change adjacency.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CreateVertex | Self::DestroyVertex | Self::Connect | Self::Disconnect
        )
    }
}

/// Resize of a vertex's output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferResize {
    /// Owning vertex.
    pub vertex: VertexHandle,
    /// Output port whose buffer changes.
    pub port: OutputPortId,
    /// New element count.
    pub size: usize,
}

/// Resize of a vertex's input port array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayResize {
    /// Owning vertex.
    pub vertex: VertexHandle,
    /// Input port array that changes.
    pub port: InputPortId,
    /// New array length.
    pub size: usize,
}

/// Change in whether an output value is observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueObservation {
    /// Owning vertex.
    pub vertex: VertexHandle,
    /// Observed output port.
    pub port: OutputPortId,
    /// Whether the value is now observed.
    pub observed: bool,
}

/// Non-structural command forwarded to the value marshalling collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataCommand {
    /// See [`BufferResize`].
    ResizeBuffer(BufferResize),
    /// See [`ArrayResize`].
    ResizeArray(ArrayResize),
    /// See [`ValueObservation`].
    ObserveValue(ValueObservation),
}

impl DataCommand {
    /// Vertex the command applies to.
    pub fn vertex(&self) -> VertexHandle {
        match self {
            Self::ResizeBuffer(resize) => resize.vertex,
            Self::ResizeArray(resize) => resize.vertex,
            Self::ObserveValue(observation) => observation.vertex,
        }
    }
}

/// A command resolved from its side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffCommand<'a> {
    /// Register a vertex.
    CreateVertex(VertexHandle),
    /// Unregister a vertex.
    DestroyVertex(VertexHandle),
    /// Insert an edge.
    Connect(&'a Connection),
    /// Remove an edge matching the record.
    Disconnect(&'a Connection),
    /// Forward to the data collaborator.
    Data(DataCommand),
}

/// An ordered batch of pending structural mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralDiff {
    /// Master list: kind plus index into that kind's side table.
    commands: Vec<(DiffCommandKind, u32)>,

    created: Vec<VertexHandle>,
    destroyed: Vec<VertexHandle>,
    connections: Vec<Connection>,
    disconnections: Vec<Connection>,
    buffer_resizes: Vec<BufferResize>,
    array_resizes: Vec<ArrayResize>,
    observations: Vec<ValueObservation>,
}

impl StructuralDiff {
    /// Create an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, kind: DiffCommandKind, index: usize) {
        self.commands.push((kind, index as u32));
    }

    /// Record a vertex creation.
    pub fn create_vertex(&mut self, vertex: VertexHandle) -> &mut Self {
        self.created.push(vertex);
        self.record(DiffCommandKind::CreateVertex, self.created.len() - 1);
        self
    }

    /// Record a vertex destruction.
    pub fn destroy_vertex(&mut self, vertex: VertexHandle) -> &mut Self {
        self.destroyed.push(vertex);
        self.record(DiffCommandKind::DestroyVertex, self.destroyed.len() - 1);
        self
    }

    /// Record an edge connection.
    pub fn connect(&mut self, connection: Connection) -> &mut Self {
        self.connections.push(connection);
        self.record(DiffCommandKind::Connect, self.connections.len() - 1);
        self
    }

    /// Record an edge disconnection.
    pub fn disconnect(&mut self, connection: Connection) -> &mut Self {
        self.disconnections.push(connection);
        self.record(DiffCommandKind::Disconnect, self.disconnections.len() - 1);
        self
    }

    /// Record an output buffer resize.
    pub fn resize_buffer(&mut self, vertex: VertexHandle, port: OutputPortId, size: usize) -> &mut Self {
        self.buffer_resizes.push(BufferResize { vertex, port, size });
        self.record(DiffCommandKind::ResizeBuffer, self.buffer_resizes.len() - 1);
        self
    }

    /// Record an input array resize.
    pub fn resize_array(&mut self, vertex: VertexHandle, port: InputPortId, size: usize) -> &mut Self {
        self.array_resizes.push(ArrayResize { vertex, port, size });
        self.record(DiffCommandKind::ResizeArray, self.array_resizes.len() - 1);
        self
    }

    /// Record an observation change on an output value.
    pub fn observe_value(&mut self, vertex: VertexHandle, port: OutputPortId, observed: bool) -> &mut Self {
        self.observations.push(ValueObservation {
            vertex,
            port,
            observed,
        });
        self.record(DiffCommandKind::ObserveValue, self.observations.len() - 1);
        self
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if no command was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// True if any command changes adjacency.
    pub fn is_structural(&self) -> bool {
        self.commands.iter().any(|(kind, _)| kind.is_structural())
    }

    /// Number of recorded vertex creations.
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    /// Drop all commands, keeping the allocations.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.created.clear();
        self.destroyed.clear();
        self.connections.clear();
        self.disconnections.clear();
        self.buffer_resizes.clear();
        self.array_resizes.clear();
        self.observations.clear();
    }

    /// Commands in recording order.
    pub fn commands(&self) -> impl Iterator<Item = DiffCommand<'_>> + '_ {
        self.commands.iter().map(move |&(kind, index)| {
            let index = index as usize;
            match kind {
                DiffCommandKind::CreateVertex => DiffCommand::CreateVertex(self.created[index]),
                DiffCommandKind::DestroyVertex => DiffCommand::DestroyVertex(self.destroyed[index]),
                DiffCommandKind::Connect => DiffCommand::Connect(&self.connections[index]),
                DiffCommandKind::Disconnect => DiffCommand::Disconnect(&self.disconnections[index]),
                DiffCommandKind::ResizeBuffer => {
                    DiffCommand::Data(DataCommand::ResizeBuffer(self.buffer_resizes[index]))
                }
                DiffCommandKind::ResizeArray => {
                    DiffCommand::Data(DataCommand::ResizeArray(self.array_resizes[index]))
                }
                DiffCommandKind::ObserveValue => {
                    DiffCommand::Data(DataCommand::ObserveValue(self.observations[index]))
                }
            }
        })
    }

    /// Check the whole batch against the database without mutating it.
    ///
    /// Simulates vertex liveness, per-vertex degree and per-connection
    /// multiplicity through the command list.
    pub fn validate(&self, database: &ConnectivityDatabase) -> Result<(), ScheduleError> {
        let capacity = database.vertex_capacity();
        let mut alive: HashMap<VertexHandle, bool> = HashMap::new();
        let mut degree_delta: HashMap<VertexHandle, isize> = HashMap::new();
        let mut multiplicity: HashMap<Connection, isize> = HashMap::new();

        let is_alive = |alive: &HashMap<VertexHandle, bool>, vertex: VertexHandle| {
            alive
                .get(&vertex)
                .copied()
                .unwrap_or_else(|| database.contains_vertex(vertex))
        };

        for command in self.commands() {
            match command {
                DiffCommand::CreateVertex(vertex) => {
                    if vertex.index() >= capacity {
                        return Err(CapacityError {
                            required: vertex.index() + 1,
                            capacity,
                        }
                        .into());
                    }
                    if is_alive(&alive, vertex) {
                        return Err(InconsistentDiffError::VertexExists(vertex).into());
                    }
                    alive.insert(vertex, true);
                }
                DiffCommand::DestroyVertex(vertex) => {
                    if !is_alive(&alive, vertex) {
                        return Err(InconsistentDiffError::UnknownVertex(vertex).into());
                    }
                    let remaining = database.degree(vertex) as isize
                        + degree_delta.get(&vertex).copied().unwrap_or(0);
                    if remaining != 0 {
                        return Err(InconsistentDiffError::VertexHasEdges {
                            vertex,
                            edges: remaining.max(0) as usize,
                        }
                        .into());
                    }
                    alive.insert(vertex, false);
                }
                DiffCommand::Connect(connection) => {
                    for endpoint in [connection.source, connection.destination] {
                        if !is_alive(&alive, endpoint) {
                            return Err(InconsistentDiffError::UnknownVertex(endpoint).into());
                        }
                    }
                    *multiplicity
                        .entry(*connection)
                        .or_insert_with(|| existing_edges(database, connection)) += 1;
                    *degree_delta.entry(connection.source).or_default() += 1;
                    *degree_delta.entry(connection.destination).or_default() += 1;
                }
                DiffCommand::Disconnect(connection) => {
                    let count = multiplicity
                        .entry(*connection)
                        .or_insert_with(|| existing_edges(database, connection));
                    if *count <= 0 {
                        return Err(InconsistentDiffError::UnknownConnection(*connection).into());
                    }
                    *count -= 1;
                    *degree_delta.entry(connection.source).or_default() -= 1;
                    *degree_delta.entry(connection.destination).or_default() -= 1;
                }
                DiffCommand::Data(data) => {
                    if !is_alive(&alive, data.vertex()) {
                        return Err(InconsistentDiffError::UnknownVertex(data.vertex()).into());
                    }
                }
            }
        }

        Ok(())
    }
}

fn existing_edges(database: &ConnectivityDatabase, connection: &Connection) -> isize {
    database
        .edges_out_of(connection.source, Some(connection.source_port))
        .filter(|(_, candidate)| *candidate == connection)
        .count() as isize
}

/// Outcome of applying a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedDiff {
    /// Database version after application.
    pub version: u64,

    /// Whether adjacency changed (and the version was bumped).
    pub structural: bool,

    /// Non-structural commands, in recording order.
    pub data_commands: Vec<DataCommand>,
}

impl ConnectivityDatabase {
    /// Apply a diff as one atomic unit.
    ///
    /// The diff is validated before any mutation; on error the database is
    /// unchanged. On success the version is bumped once if the diff carried
    /// structural commands.
    pub fn apply(&mut self, diff: &StructuralDiff) -> Result<AppliedDiff, ScheduleError> {
        diff.validate(self)?;

        let mut data_commands = Vec::new();
        for command in diff.commands() {
            match command {
                DiffCommand::CreateVertex(vertex) => self.insert_vertex(vertex)?,
                DiffCommand::DestroyVertex(vertex) => self.erase_vertex(vertex)?,
                DiffCommand::Connect(connection) => {
                    self.attach_edge(*connection)?;
                }
                DiffCommand::Disconnect(connection) => {
                    let handle = self
                        .find_edge(connection)
                        .ok_or(InconsistentDiffError::UnknownConnection(*connection))?;
                    self.detach_edge(handle)?;
                }
                DiffCommand::Data(data) => data_commands.push(data),
            }
        }

        let structural = diff.is_structural();
        if structural {
            self.bump_version();
        }

        tracing::debug!(
            commands = diff.len(),
            structural,
            version = self.version(),
            vertices = self.vertex_count(),
            edges = self.edge_count(),
            "applied structural diff"
        );

        Ok(AppliedDiff {
            version: self.version(),
            structural,
            data_commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TraversalFlags;

    fn v(index: u32) -> VertexHandle {
        VertexHandle::new(index)
    }

    #[test]
    fn replays_in_recorded_order_with_one_version_bump() {
        let mut db = ConnectivityDatabase::new(16);
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0))
            .create_vertex(v(1))
            .create_vertex(v(2))
            .connect(Connection::data(v(0), v(1)))
            .connect(Connection::data(v(1), v(2)));

        let applied = db.apply(&diff).unwrap();

        assert!(applied.structural);
        assert_eq!(applied.version, 1);
        assert_eq!(db.version(), 1);
        assert_eq!(db.vertex_count(), 3);
        assert_eq!(db.edge_count(), 2);
        db.validate_invariants().unwrap();
    }

    #[test]
    fn connect_then_disconnect_within_one_diff() {
        let mut db = ConnectivityDatabase::new(4);
        let edge = Connection::data(v(0), v(1));
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0))
            .create_vertex(v(1))
            .connect(edge)
            .disconnect(edge)
            .destroy_vertex(v(1));

        db.apply(&diff).unwrap();

        assert_eq!(db.edge_count(), 0);
        assert!(db.contains_vertex(v(0)));
        assert!(!db.contains_vertex(v(1)));
    }

    #[test]
    fn capacity_error_leaves_database_untouched() {
        let mut db = ConnectivityDatabase::new(2);
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0)).create_vertex(v(1)).create_vertex(v(2));

        let err = db.apply(&diff).unwrap_err();

        assert_eq!(
            err,
            ScheduleError::Capacity(CapacityError {
                required: 3,
                capacity: 2
            })
        );
        assert_eq!(db.vertex_count(), 0);
        assert_eq!(db.version(), 0);
    }

    #[test]
    fn inconsistent_diff_is_rejected_before_mutation() {
        let mut db = ConnectivityDatabase::new(8);
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(0))
            .disconnect(Connection::data(v(0), v(0)));

        let err = db.apply(&diff).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::InconsistentDiff(InconsistentDiffError::UnknownConnection(_))
        ));
        assert!(!db.contains_vertex(v(0)));
    }

    #[test]
    fn destroying_a_connected_vertex_is_rejected() {
        let mut db = ConnectivityDatabase::new(8);
        let mut setup = StructuralDiff::new();
        setup
            .create_vertex(v(0))
            .create_vertex(v(1))
            .connect(Connection::data(v(0), v(1)));
        db.apply(&setup).unwrap();

        let mut diff = StructuralDiff::new();
        diff.destroy_vertex(v(1));
        let err = db.apply(&diff).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::InconsistentDiff(InconsistentDiffError::VertexHasEdges {
                vertex: v(1),
                edges: 1
            })
        );
        assert_eq!(db.version(), 1);
    }

    #[test]
    fn duplicate_creation_is_rejected() {
        let mut db = ConnectivityDatabase::new(8);
        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(3)).create_vertex(v(3));
        assert_eq!(
            db.apply(&diff).unwrap_err(),
            ScheduleError::InconsistentDiff(InconsistentDiffError::VertexExists(v(3)))
        );
    }

    #[test]
    fn data_commands_are_forwarded_without_version_bump() {
        let mut db = ConnectivityDatabase::new(8);
        let mut setup = StructuralDiff::new();
        setup.create_vertex(v(0));
        db.apply(&setup).unwrap();

        let mut diff = StructuralDiff::new();
        diff.resize_buffer(v(0), OutputPortId(1), 32)
            .observe_value(v(0), OutputPortId(1), true)
            .resize_array(v(0), InputPortId(0), 4);

        let applied = db.apply(&diff).unwrap();

        assert!(!applied.structural);
        assert_eq!(db.version(), 1);
        let kinds: Vec<_> = applied
            .data_commands
            .iter()
            .map(|command| match command {
                DataCommand::ResizeBuffer(_) => "buffer",
                DataCommand::ResizeArray(_) => "array",
                DataCommand::ObserveValue(_) => "observe",
            })
            .collect();
        assert_eq!(kinds, vec!["buffer", "observe", "array"]);
    }

    #[test]
    fn parallel_edges_disconnect_one_at_a_time() {
        let mut db = ConnectivityDatabase::new(8);
        let edge = Connection::data(v(0), v(1)).with_flags(TraversalFlags::MESSAGE);
        let mut setup = StructuralDiff::new();
        setup
            .create_vertex(v(0))
            .create_vertex(v(1))
            .connect(edge)
            .connect(edge);
        db.apply(&setup).unwrap();

        let mut diff = StructuralDiff::new();
        diff.disconnect(edge).disconnect(edge).disconnect(edge);
        assert!(db.apply(&diff).is_err());
        assert_eq!(db.edge_count(), 2);

        diff.clear();
        diff.disconnect(edge);
        db.apply(&diff).unwrap();
        assert_eq!(db.edge_count(), 1);
    }

    #[test]
    fn commands_resolve_side_tables() {
        let mut diff = StructuralDiff::new();
        let edge = Connection::data(v(1), v(2));
        diff.connect(edge).create_vertex(v(9)).disconnect(edge);

        let commands: Vec<_> = diff.commands().collect();
        assert_eq!(
            commands,
            vec![
                DiffCommand::Connect(&edge),
                DiffCommand::CreateVertex(v(9)),
                DiffCommand::Disconnect(&edge),
            ]
        );
        assert_eq!(diff.created_count(), 1);
        assert!(diff.is_structural());
    }
}
