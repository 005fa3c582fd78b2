//! Component Ordering
//!
//! Pure functions over the current adjacency: partitioning seed vertices into
//! connected components and ordering a single component.
//!
//! # Algorithms
//!
//! - [`OrderingAlgorithm::LocalDepthFirst`]: iterative depth-first search
//!   from the roots, emitting vertices in reverse finish order. A successor
//!   that is still on the current path is a back edge and aborts with the
//!   path segment as the cycle.
//! - [`OrderingAlgorithm::GlobalBreadthFirst`]: Kahn's algorithm, one level
//!   at a time. Vertices whose in-degree never reaches zero lie on or behind
//!   a cycle; one concrete cycle is traced back through them.
//!
//! Successors are visited in ascending handle order, so results never depend
//! on edge insertion order.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::{ConnectivityDatabase, TraversalFlags, VertexHandle};

/// How each island is ordered and how island orders are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingAlgorithm {
    /// Per-island depth-first order; the global order concatenates islands
    /// by ascending group id.
    #[default]
    LocalDepthFirst,
    /// Per-island breadth-first levels; the global order is level-major
    /// across all islands.
    GlobalBreadthFirst,
}

/// Result of ordering one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OrderedComponent {
    pub(crate) members: Vec<VertexHandle>,
    pub(crate) order: Vec<VertexHandle>,
    pub(crate) level_starts: SmallVec<[u32; 8]>,
    pub(crate) roots: SmallVec<[VertexHandle; 4]>,
    pub(crate) leaves: SmallVec<[VertexHandle; 4]>,
    /// Vertices on a detected cycle, in edge direction.
    pub(crate) cycle: Option<Vec<VertexHandle>>,
}

/// Split `seeds` into connected components under `mask`, ignoring direction.
///
/// Components come back sorted by their smallest member, each with members
/// in ascending order. Vertices reached from a seed are included even if
/// they were not seeds themselves.
pub(crate) fn connected_components(
    database: &ConnectivityDatabase,
    seeds: &[VertexHandle],
    mask: TraversalFlags,
) -> Vec<Vec<VertexHandle>> {
    let mut assigned: HashSet<VertexHandle> = HashSet::with_capacity(seeds.len());
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    let mut sorted: Vec<VertexHandle> = seeds
        .iter()
        .copied()
        .filter(|&vertex| database.contains_vertex(vertex))
        .collect();
    sorted.sort_unstable();
    sorted.dedup();

    for seed in sorted {
        if !assigned.insert(seed) {
            continue;
        }
        let mut component = vec![seed];
        queue.push_back(seed);

        while let Some(vertex) = queue.pop_front() {
            let downstream = database.edges_out_of(vertex, None).matching(mask).map(|(_, c)| c.destination);
            let upstream = database.edges_into(vertex, None).matching(mask).map(|(_, c)| c.source);
            for neighbor in downstream.chain(upstream) {
                if assigned.insert(neighbor) {
                    component.push(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    components
}

/// Order one connected component.
pub(crate) fn order_component(
    database: &ConnectivityDatabase,
    members: Vec<VertexHandle>,
    mask: TraversalFlags,
    algorithm: OrderingAlgorithm,
) -> OrderedComponent {
    debug_assert!(members.windows(2).all(|pair| pair[0] < pair[1]));

    let ordered = match algorithm {
        OrderingAlgorithm::LocalDepthFirst => depth_first(database, &members, mask)
            .map(|order| (order, SmallVec::from_slice(&[0]))),
        OrderingAlgorithm::GlobalBreadthFirst => breadth_first(database, &members, mask),
    };

    match ordered {
        Ok((order, level_starts)) => {
            let roots = members
                .iter()
                .copied()
                .filter(|&vertex| database.in_degree(vertex, mask) == 0)
                .collect();
            let leaves = members
                .iter()
                .copied()
                .filter(|&vertex| database.out_degree(vertex, mask) == 0)
                .collect();
            OrderedComponent {
                members,
                order,
                level_starts,
                roots,
                leaves,
                cycle: None,
            }
        }
        Err(cycle) => OrderedComponent {
            members,
            order: Vec::new(),
            level_starts: SmallVec::new(),
            roots: SmallVec::new(),
            leaves: SmallVec::new(),
            cycle: Some(cycle),
        },
    }
}

fn successors(database: &ConnectivityDatabase, vertex: VertexHandle, mask: TraversalFlags) -> SmallVec<[VertexHandle; 8]> {
    let mut next: SmallVec<[VertexHandle; 8]> = database
        .edges_out_of(vertex, None)
        .matching(mask)
        .map(|(_, connection)| connection.destination)
        .collect();
    next.sort_unstable();
    next.dedup();
    next
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Finished,
}

struct Frame {
    local: usize,
    successors: SmallVec<[VertexHandle; 8]>,
    cursor: usize,
}

fn depth_first(
    database: &ConnectivityDatabase,
    members: &[VertexHandle],
    mask: TraversalFlags,
) -> Result<Vec<VertexHandle>, Vec<VertexHandle>> {
    let local = |vertex: VertexHandle| members.binary_search(&vertex).ok();
    let mut marks = vec![Mark::Unvisited; members.len()];
    let mut finished = Vec::with_capacity(members.len());
    let mut stack: Vec<Frame> = Vec::new();

    // Roots first so the order starts at sources; the remaining members only
    // matter when a cycle leaves no root to start from.
    let roots = members
        .iter()
        .copied()
        .filter(|&vertex| database.in_degree(vertex, mask) == 0);

    for start in roots.chain(members.iter().copied()) {
        let Some(index) = local(start) else { continue };
        if marks[index] != Mark::Unvisited {
            continue;
        }
        marks[index] = Mark::OnPath;
        stack.push(Frame {
            local: index,
            successors: successors(database, start, mask),
            cursor: 0,
        });

        loop {
            let Some(frame) = stack.last_mut() else { break };
            let step = frame.successors.get(frame.cursor).copied();
            frame.cursor += 1;

            match step {
                Some(next) => {
                    let Some(next_index) = local(next) else {
                        debug_assert!(false, "{next} reached outside its component");
                        continue;
                    };
                    match marks[next_index] {
                        Mark::Unvisited => {
                            marks[next_index] = Mark::OnPath;
                            stack.push(Frame {
                                local: next_index,
                                successors: successors(database, next, mask),
                                cursor: 0,
                            });
                        }
                        Mark::OnPath => {
                            let begin = stack
                                .iter()
                                .position(|frame| frame.local == next_index)
                                .unwrap_or(0);
                            return Err(stack[begin..].iter().map(|frame| members[frame.local]).collect());
                        }
                        Mark::Finished => {}
                    }
                }
                None => {
                    if let Some(done) = stack.pop() {
                        marks[done.local] = Mark::Finished;
                        finished.push(members[done.local]);
                    }
                }
            }
        }
    }

    finished.reverse();
    Ok(finished)
}

type Levels = (Vec<VertexHandle>, SmallVec<[u32; 8]>);

fn breadth_first(
    database: &ConnectivityDatabase,
    members: &[VertexHandle],
    mask: TraversalFlags,
) -> Result<Levels, Vec<VertexHandle>> {
    let local = |vertex: VertexHandle| members.binary_search(&vertex).ok();
    let mut remaining: Vec<usize> = members
        .iter()
        .map(|&vertex| database.in_degree(vertex, mask))
        .collect();

    let mut level: Vec<VertexHandle> = members
        .iter()
        .zip(&remaining)
        .filter(|(_, &degree)| degree == 0)
        .map(|(&vertex, _)| vertex)
        .collect();

    let mut order = Vec::with_capacity(members.len());
    let mut level_starts = SmallVec::new();

    while !level.is_empty() {
        level_starts.push(order.len() as u32);
        let mut next = Vec::new();
        for &vertex in &level {
            for (_, connection) in database.edges_out_of(vertex, None).matching(mask) {
                let Some(index) = local(connection.destination) else { continue };
                remaining[index] -= 1;
                if remaining[index] == 0 {
                    next.push(connection.destination);
                }
            }
        }
        order.extend_from_slice(&level);
        next.sort_unstable();
        level = next;
    }

    if order.len() < members.len() {
        return Err(trace_cycle(database, members, &remaining, mask));
    }
    Ok((order, level_starts))
}

/// Walk predecessors through vertices Kahn could not release until one
/// repeats. Every such vertex has at least one unreleased predecessor.
fn trace_cycle(
    database: &ConnectivityDatabase,
    members: &[VertexHandle],
    remaining: &[usize],
    mask: TraversalFlags,
) -> Vec<VertexHandle> {
    let stuck = |vertex: VertexHandle| {
        members
            .binary_search(&vertex)
            .map_or(false, |index| remaining[index] > 0)
    };

    let Some(mut current) = members.iter().copied().find(|&vertex| stuck(vertex)) else {
        return Vec::new();
    };

    let mut path: Vec<VertexHandle> = Vec::new();
    let mut seen: HashMap<VertexHandle, usize> = HashMap::new();

    loop {
        if let Some(&begin) = seen.get(&current) {
            let mut cycle = path.split_off(begin);
            cycle.reverse();
            return cycle;
        }
        seen.insert(current, path.len());
        path.push(current);

        let predecessor = database
            .edges_into(current, None)
            .matching(mask)
            .map(|(_, connection)| connection.source)
            .filter(|&source| stuck(source))
            .min();

        match predecessor {
            Some(previous) => current = previous,
            None => {
                debug_assert!(false, "{current} is stuck without a stuck predecessor");
                path.reverse();
                return path;
            }
        }
    }
}
