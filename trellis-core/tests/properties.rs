//! Property Tests for the Topology Cache
//!
//! Random mutation sequences are replayed against the connectivity database
//! and the incremental cache, and checked against a from-scratch rebuild and
//! an independent acyclicity oracle.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use proptest::sample::Index;

use trellis_core::graph::{Connection, ConnectivityDatabase, StructuralDiff, TraversalFlags, VertexHandle};
use trellis_core::topology::{Group, OrderingAlgorithm, TopologyCache};

const VERTICES: u32 = 24;
const MASK: TraversalFlags = TraversalFlags::ORDERING;

fn v(index: u32) -> VertexHandle {
    VertexHandle::new(index)
}

#[derive(Debug, Clone)]
enum Op {
    Create(u32),
    Connect(u32, u32, bool),
    Disconnect(Index),
    Destroy(u32),
    Flush,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..VERTICES).prop_map(Op::Create),
        6 => (0..VERTICES, 0..VERTICES, prop::bool::weighted(0.15))
            .prop_map(|(from, to, signal)| Op::Connect(from, to, signal)),
        2 => any::<Index>().prop_map(Op::Disconnect),
        1 => (0..VERTICES).prop_map(Op::Destroy),
        2 => Just(Op::Flush),
    ]
}

fn algorithm() -> impl Strategy<Value = OrderingAlgorithm> {
    prop_oneof![
        Just(OrderingAlgorithm::LocalDepthFirst),
        Just(OrderingAlgorithm::GlobalBreadthFirst),
    ]
}

/// Group content keyed by membership, ignoring ids.
type Summary = BTreeMap<Vec<VertexHandle>, (Vec<VertexHandle>, Vec<VertexHandle>, Vec<VertexHandle>, bool)>;

fn summarize(cache: &TopologyCache) -> Summary {
    cache
        .groups()
        .map(|group| {
            (
                group.members().to_vec(),
                (
                    group.order().to_vec(),
                    group.roots().to_vec(),
                    group.leaves().to_vec(),
                    group.is_cyclic(),
                ),
            )
        })
        .collect()
}

/// Peel vertices with no remaining in-edge; anything left sits on or
/// behind a cycle.
fn has_cycle(db: &ConnectivityDatabase, members: &[VertexHandle]) -> bool {
    let mut remaining: BTreeSet<VertexHandle> = members.iter().copied().collect();
    loop {
        let free: Vec<VertexHandle> = remaining
            .iter()
            .copied()
            .filter(|&vertex| {
                db.edges_into(vertex, None)
                    .matching(MASK)
                    .all(|(_, connection)| !remaining.contains(&connection.source))
            })
            .collect();
        if free.is_empty() {
            return !remaining.is_empty();
        }
        for vertex in free {
            remaining.remove(&vertex);
        }
    }
}

fn check_topology(db: &ConnectivityDatabase, cache: &TopologyCache) -> Result<(), TestCaseError> {
    prop_assert!(cache.is_current(db));
    prop_assert!(db.validate_invariants().is_ok());

    let mut covered = 0;
    let mut acyclic = 0;
    for group in cache.groups() {
        covered += group.len();
        for &vertex in group.members() {
            prop_assert_eq!(cache.group_of(vertex), Some(group.id()));
        }
        prop_assert_eq!(group.is_cyclic(), has_cycle(db, group.members()));

        if group.is_cyclic() {
            prop_assert!(group.order().is_empty());
            continue;
        }
        acyclic += group.len();

        let mut sorted = group.order().to_vec();
        sorted.sort();
        prop_assert_eq!(&sorted, &group.members().to_vec());

        let position = |vertex: VertexHandle| group.order().iter().position(|&x| x == vertex);
        for &vertex in group.members() {
            for (_, connection) in db.edges_out_of(vertex, None).matching(MASK) {
                prop_assert!(position(connection.source) < position(connection.destination));
            }
        }
    }
    prop_assert_eq!(covered, db.vertex_count());
    prop_assert_eq!(cache.global_order().len(), acyclic);

    let global = cache.global_order();
    for (index, &vertex) in global.iter().enumerate() {
        for (_, connection) in db.edges_out_of(vertex, None).matching(MASK) {
            let later = global[index + 1..].contains(&connection.destination);
            prop_assert!(later, "{} is not after {}", connection.destination, vertex);
        }
    }
    Ok(())
}

struct Replay {
    db: ConnectivityDatabase,
    cache: TopologyCache,
    algorithm: OrderingAlgorithm,
    diff: StructuralDiff,
    alive: BTreeSet<u32>,
    edges: Vec<Connection>,
}

impl Replay {
    fn new(algorithm: OrderingAlgorithm) -> Self {
        Self {
            db: ConnectivityDatabase::new(VERTICES as usize),
            cache: TopologyCache::new(algorithm, MASK).with_partial_rebuild_fraction(1.0),
            algorithm,
            diff: StructuralDiff::new(),
            alive: BTreeSet::new(),
            edges: Vec::new(),
        }
    }

    fn step(&mut self, op: &Op) -> Result<(), TestCaseError> {
        match *op {
            Op::Create(index) => {
                if self.alive.insert(index) {
                    self.diff.create_vertex(v(index));
                }
            }
            Op::Connect(from, to, signal) => {
                if self.alive.contains(&from) && self.alive.contains(&to) {
                    let flags = if signal { TraversalFlags::SIGNAL } else { TraversalFlags::DATA };
                    let edge = Connection::data(v(from), v(to)).with_flags(flags);
                    self.edges.push(edge);
                    self.diff.connect(edge);
                }
            }
            Op::Disconnect(index) => {
                if !self.edges.is_empty() {
                    let edge = self.edges.swap_remove(index.index(self.edges.len()));
                    self.diff.disconnect(edge);
                }
            }
            Op::Destroy(index) => {
                if self.alive.remove(&index) {
                    let vertex = v(index);
                    let (incident, kept): (Vec<Connection>, Vec<Connection>) = self
                        .edges
                        .drain(..)
                        .partition(|edge| edge.source == vertex || edge.destination == vertex);
                    for edge in incident {
                        self.diff.disconnect(edge);
                    }
                    self.edges = kept;
                    self.diff.destroy_vertex(vertex);
                }
            }
            Op::Flush => self.flush()?,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TestCaseError> {
        let applied = self.db.apply(&self.diff);
        prop_assert!(applied.is_ok(), "{:?}", applied);
        self.diff.clear();

        let changes = self.db.take_changes();
        self.cache.rebuild(&self.db, &changes);
        check_topology(&self.db, &self.cache)?;

        let mut fresh = TopologyCache::new(self.algorithm, MASK);
        fresh.rebuild_full(&self.db);
        prop_assert_eq!(summarize(&self.cache), summarize(&fresh));
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    /// Incremental rebuilds agree with a from-scratch rebuild for arbitrary
    /// out-of-order creation, connection and destruction sequences.
    #[test]
    fn incremental_matches_full_rebuild(
        algorithm in algorithm(),
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let mut replay = Replay::new(algorithm);
        for op in &ops {
            replay.step(op)?;
        }
        replay.flush()?;
    }

    /// Adding an edge and removing it again restores every group, ids
    /// included.
    #[test]
    fn edge_round_trip_is_idempotent(
        algorithm in algorithm(),
        edges in prop::collection::vec((0..VERTICES, 0..VERTICES), 0..40),
        extra in (0..VERTICES, 0..VERTICES),
    ) {
        let mut replay = Replay::new(algorithm);
        for index in 0..VERTICES {
            replay.step(&Op::Create(index))?;
        }
        for &(from, to) in &edges {
            replay.step(&Op::Connect(from, to, false))?;
        }
        replay.flush()?;
        let before: Vec<Group> = replay.cache.groups().cloned().collect();

        let edge = Connection::data(v(extra.0), v(extra.1));
        let mut diff = StructuralDiff::new();
        diff.connect(edge);
        replay.db.apply(&diff).unwrap();
        let changes = replay.db.take_changes();
        replay.cache.rebuild(&replay.db, &changes);

        diff.clear();
        diff.disconnect(edge);
        replay.db.apply(&diff).unwrap();
        let changes = replay.db.take_changes();
        replay.cache.rebuild(&replay.db, &changes);

        let after: Vec<Group> = replay.cache.groups().cloned().collect();
        prop_assert_eq!(after, before);
        check_topology(&replay.db, &replay.cache)?;
    }

    /// A change confined to one island leaves every other island untouched.
    #[test]
    fn rebuild_is_local_to_the_changed_island(
        left in prop::collection::vec((0..12u32, 0..12u32), 0..20),
        change in (0..12u32, 0..12u32),
    ) {
        let mut replay = Replay::new(OrderingAlgorithm::LocalDepthFirst);
        for index in 0..VERTICES {
            replay.step(&Op::Create(index))?;
        }
        for &(from, to) in &left {
            replay.step(&Op::Connect(from, to, false))?;
        }
        // A chain over the upper half, never touched again.
        for index in 12..VERTICES - 1 {
            replay.step(&Op::Connect(index, index + 1, false))?;
        }
        replay.flush()?;

        let isolated = replay.cache.group_of(v(12)).unwrap();
        let snapshot = replay.cache.group(isolated).unwrap().clone();

        replay.step(&Op::Connect(change.0, change.1, false))?;
        replay.step(&Op::Flush)?;

        prop_assert_eq!(replay.cache.group(isolated), Some(&snapshot));
    }
}
