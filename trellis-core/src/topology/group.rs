//! Groups
//!
//! A group (island) is a maximal connected subgraph under the traversal
//! mask. Each group carries its cached execution order and the root and leaf
//! sets the fence scheduler needs.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::VertexHandle;

/// Stable identifier of a group.
///
/// Ids are recycled through a LIFO free list, so a released id may name an
/// unrelated group after a later rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    /// Wrap a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Index into the group table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A connected component with its cached order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub(crate) id: GroupId,

    /// Members in ascending handle order.
    pub(crate) members: Vec<VertexHandle>,

    /// Topological order. Empty if the group is cyclic.
    pub(crate) order: Vec<VertexHandle>,

    /// Start offsets of each breadth-first level within `order`.
    /// A depth-first order is a single level.
    pub(crate) level_starts: SmallVec<[u32; 8]>,

    pub(crate) roots: SmallVec<[VertexHandle; 4]>,
    pub(crate) leaves: SmallVec<[VertexHandle; 4]>,
    pub(crate) cyclic: bool,
}

impl Group {
    /// Group id.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Members in ascending handle order.
    pub fn members(&self) -> &[VertexHandle] {
        &self.members
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check membership.
    pub fn contains(&self, vertex: VertexHandle) -> bool {
        self.members.binary_search(&vertex).is_ok()
    }

    /// Cached execution order. Empty for cyclic groups.
    pub fn order(&self) -> &[VertexHandle] {
        &self.order
    }

    /// Members with no incoming traversal edge.
    pub fn roots(&self) -> &[VertexHandle] {
        &self.roots
    }

    /// Members with no outgoing traversal edge.
    pub fn leaves(&self) -> &[VertexHandle] {
        &self.leaves
    }

    /// True if ordering found a cycle.
    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Number of levels in the cached order.
    pub fn level_count(&self) -> usize {
        self.level_starts.len()
    }

    /// Slice of the order belonging to `level`, or empty past the last one.
    pub fn level(&self, level: usize) -> &[VertexHandle] {
        let Some(&start) = self.level_starts.get(level) else {
            return &[];
        };
        let end = self
            .level_starts
            .get(level + 1)
            .map_or(self.order.len(), |&end| end as usize);
        &self.order[start as usize..end]
    }
}

/// Slot table of groups with a LIFO id free list.
#[derive(Debug, Clone, Default)]
pub(crate) struct GroupTable {
    slots: Vec<Option<Group>>,
    free: Vec<GroupId>,
    live: usize,
}

impl GroupTable {
    pub(crate) fn get(&self, id: GroupId) -> Option<&Group> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Reserve an id, reusing the most recently released one first.
    pub(crate) fn allocate(&mut self) -> GroupId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        self.slots.push(None);
        GroupId::new((self.slots.len() - 1) as u32)
    }

    /// Remove a group and put its id on the free list.
    pub(crate) fn release(&mut self, id: GroupId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.take().is_some() {
                self.live -= 1;
            }
            self.free.push(id);
        }
    }

    /// Take a specific released id back off the free list.
    pub(crate) fn claim(&mut self, id: GroupId) -> bool {
        match self.free.iter().position(|&free| free == id) {
            Some(position) => {
                self.free.remove(position);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_free(&self, id: GroupId) -> bool {
        self.free.contains(&id)
    }

    /// Store a group under its (allocated or surviving) id.
    pub(crate) fn install(&mut self, group: Group) {
        let index = group.id.index();
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        if self.slots[index].replace(group).is_none() {
            self.live += 1;
        }
    }

    /// Live groups by ascending id.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Group> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn slots(&self) -> &[Option<Group>] {
        &self.slots
    }
}
