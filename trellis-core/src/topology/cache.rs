//! Incremental Topology Cache
//!
//! The cache holds island membership and execution orders for the current
//! graph, recomputing only what a change set disturbed.
//!
//! # Pass
//!
//! ```text
//! Stale -> (Full Rebuild | Partial Group Rebuild) -> Aligned -> Published
//! ```
//!
//! 1. A cache whose version equals the database version is skipped.
//! 2. A full rebuild runs when nothing was built yet, when the change set
//!    does not chain onto the built version, or when the dirty region is
//!    larger than the configured fraction of live vertices.
//! 3. Otherwise the previous groups of every changed vertex are dirtied.
//!    Their live members plus the changed vertices are split into connected
//!    components, which are ordered in parallel.
//! 4. Alignment hands surviving group ids back to the new components and
//!    recycles the rest before any fresh id is allocated.
//! 5. The global order is republished from the group table.
//!
//! # Alignment
//!
//! An old id survives into a component iff every member it contributed
//! landed in that one component. On a merge the smallest surviving id wins.
//! Dirty ids that do not survive are released in ascending order to the
//! LIFO free list, then components without a survivor allocate ids in
//! ascending component order.
//!
//! A merged group remembers the ids it absorbed and the members each one
//! held. When it splits again, every half that still holds exactly one such
//! ancestor gets that id back, so a connect followed by the matching
//! disconnect restores the previous groups unchanged.

use std::collections::HashMap;

use indexmap::IndexMap;
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::{CycleError, ScheduleError};
use crate::graph::{ConnectivityDatabase, TopologyChanges, TraversalFlags, VertexHandle};

use super::group::{Group, GroupId, GroupTable};
use super::ordering::{connected_components, order_component, OrderedComponent, OrderingAlgorithm};
use super::walker::{GroupWalker, RootCacheWalker};

/// Default share of live vertices above which a rebuild goes full.
pub const DEFAULT_PARTIAL_REBUILD_FRACTION: f64 = 0.5;

/// How the last rebuild was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebuildMode {
    /// The cache was already current.
    Skipped,
    /// Every live vertex was reordered.
    Full,
    /// Only dirty groups were reordered.
    Partial,
}

/// Outcome of [`TopologyCache::rebuild`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// How the pass was performed.
    pub mode: RebuildMode,

    /// Database version the cache now reflects.
    pub version: u64,

    /// Groups installed by this pass, surviving or fresh.
    pub recomputed: Vec<GroupId>,

    /// Ids returned to the free list.
    pub released: Vec<GroupId>,

    /// Number of vertices whose ordering was recomputed.
    pub vertices_visited: usize,

    /// Cycles found in recomputed groups.
    pub cycles: Vec<CycleError>,
}

impl RebuildReport {
    fn skipped(version: u64) -> Self {
        Self {
            mode: RebuildMode::Skipped,
            version,
            recomputed: Vec::new(),
            released: Vec::new(),
            vertices_visited: 0,
            cycles: Vec::new(),
        }
    }

    /// True if any recomputed group is cyclic.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Turn recorded cycles into an error.
    pub fn into_result(self) -> Result<Self, ScheduleError> {
        if self.cycles.is_empty() {
            Ok(self)
        } else {
            Err(ScheduleError::Cycles(self.cycles))
        }
    }
}

/// Dirty region of a partial rebuild.
struct RebuildPlan {
    /// Live vertices to reorder, ascending.
    seeds: Vec<VertexHandle>,
    /// Groups that lose their cached state, ascending.
    dirty_groups: Vec<GroupId>,
}

/// An id absorbed by a merge, with the members it held at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ancestor {
    id: GroupId,
    members: Vec<VertexHandle>,
}

/// Identities handed to the components of one rebuild.
struct Alignment {
    /// Id kept by each component, if any.
    survivors: Vec<Option<GroupId>>,
    /// Released ids taken back by split halves.
    reclaimed: Vec<GroupId>,
    /// Merge ancestry of each component. Empty unless it spans two or more.
    lineages: Vec<Vec<Ancestor>>,
}

/// Cached island decomposition and execution orders.
#[derive(Debug, Clone)]
pub struct TopologyCache {
    algorithm: OrderingAlgorithm,
    mask: TraversalFlags,
    partial_rebuild_fraction: f64,

    groups: GroupTable,

    /// Group of each vertex, indexed by vertex handle.
    membership: Vec<Option<GroupId>>,

    /// Ancestry of groups formed by merges.
    lineage: IndexMap<GroupId, Vec<Ancestor>>,

    global_order: Vec<VertexHandle>,

    /// Database version the content reflects. `None` until the first build.
    built_version: Option<u64>,
}

impl TopologyCache {
    /// Create an empty cache.
    pub fn new(algorithm: OrderingAlgorithm, mask: TraversalFlags) -> Self {
        Self {
            algorithm,
            mask,
            partial_rebuild_fraction: DEFAULT_PARTIAL_REBUILD_FRACTION,
            groups: GroupTable::default(),
            membership: Vec::new(),
            lineage: IndexMap::new(),
            global_order: Vec::new(),
            built_version: None,
        }
    }

    /// Create an empty cache from configuration.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.ordering, config.traversal_mask)
            .with_partial_rebuild_fraction(config.partial_rebuild_fraction)
    }

    /// Set the dirty-region share above which rebuilds go full.
    ///
    /// `1.0` or more always rebuilds partially when a chained change set is
    /// available. `0.0` always rebuilds fully.
    pub fn with_partial_rebuild_fraction(mut self, fraction: f64) -> Self {
        self.partial_rebuild_fraction = fraction.max(0.0);
        self
    }

    /// Ordering algorithm in use.
    pub fn algorithm(&self) -> OrderingAlgorithm {
        self.algorithm
    }

    /// Traversal mask in use.
    pub fn mask(&self) -> TraversalFlags {
        self.mask
    }

    /// Version the cache was built against, if any.
    pub fn version(&self) -> Option<u64> {
        self.built_version
    }

    /// True if the cache reflects the database's current version.
    pub fn is_current(&self, database: &ConnectivityDatabase) -> bool {
        self.built_version == Some(database.version())
    }

    /// Fail with [`ScheduleError::StaleTopology`] unless current.
    pub fn ensure_current(&self, database: &ConnectivityDatabase) -> Result<(), ScheduleError> {
        if self.is_current(database) {
            Ok(())
        } else {
            Err(ScheduleError::StaleTopology {
                cache: self.built_version.unwrap_or_default(),
                database: database.version(),
            })
        }
    }

    /// Group a vertex belongs to.
    pub fn group_of(&self, vertex: VertexHandle) -> Option<GroupId> {
        self.membership.get(vertex.index()).copied().flatten()
    }

    /// Look up a group.
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Groups by ascending id.
    pub fn groups(&self) -> GroupWalker<'_> {
        GroupWalker::new(self.groups.slots())
    }

    /// Root vertices of every group.
    pub fn root_cache(&self) -> RootCacheWalker<'_> {
        RootCacheWalker::new(self.groups())
    }

    /// Groups excluded from execution because they contain a cycle.
    pub fn cyclic_groups(&self) -> impl Iterator<Item = &Group> + '_ {
        self.groups().filter(|group| group.is_cyclic())
    }

    /// Whole-graph execution order over every acyclic group.
    pub fn global_order(&self) -> &[VertexHandle] {
        &self.global_order
    }

    /// Bring the cache up to the database's version.
    ///
    /// `changes` is an incrementality hint: it is only used if its base
    /// version equals the version the cache was last built against.
    pub fn rebuild(&mut self, database: &ConnectivityDatabase, changes: &TopologyChanges) -> RebuildReport {
        let version = database.version();
        if self.built_version == Some(version) {
            trace!(version, "topology cache already current");
            return RebuildReport::skipped(version);
        }

        let plan = match self.built_version {
            None => None,
            Some(built) if changes.base_version() != built || changes.version() != version => {
                debug!(
                    built,
                    base = changes.base_version(),
                    version,
                    "change set does not chain onto the cache"
                );
                None
            }
            Some(_) => self.plan_partial(database, changes),
        };

        match plan {
            Some(plan) => self.recompute(database, plan, changes.destroyed(), RebuildMode::Partial),
            None => self.rebuild_full(database),
        }
    }

    /// Reorder every live vertex, aligning against all previous groups.
    pub fn rebuild_full(&mut self, database: &ConnectivityDatabase) -> RebuildReport {
        let plan = RebuildPlan {
            seeds: database.vertices().collect(),
            dirty_groups: self.groups.iter().map(Group::id).collect(),
        };
        self.recompute(database, plan, &[], RebuildMode::Full)
    }

    fn plan_partial(&self, database: &ConnectivityDatabase, changes: &TopologyChanges) -> Option<RebuildPlan> {
        let changed = changes.touched().iter().chain(changes.created());

        let mut dirty_groups: Vec<GroupId> = changed
            .clone()
            .chain(changes.destroyed())
            .filter_map(|&vertex| self.group_of(vertex))
            .collect();
        dirty_groups.sort_unstable();
        dirty_groups.dedup();

        let mut seeds: Vec<VertexHandle> = changed.copied().collect();
        for &id in &dirty_groups {
            if let Some(group) = self.groups.get(id) {
                seeds.extend_from_slice(group.members());
            }
        }
        seeds.retain(|&vertex| database.contains_vertex(vertex));
        seeds.sort_unstable();
        seeds.dedup();

        let limit = self.partial_rebuild_fraction * database.vertex_count() as f64;
        if seeds.len() as f64 > limit {
            debug!(
                dirty = seeds.len(),
                live = database.vertex_count(),
                "dirty region too large for a partial rebuild"
            );
            return None;
        }

        Some(RebuildPlan { seeds, dirty_groups })
    }

    fn recompute(
        &mut self,
        database: &ConnectivityDatabase,
        plan: RebuildPlan,
        destroyed: &[VertexHandle],
        mode: RebuildMode,
    ) -> RebuildReport {
        let RebuildPlan { seeds, dirty_groups } = plan;
        let algorithm = self.algorithm;
        let mask = self.mask;

        let components = connected_components(database, &seeds, mask);
        debug_assert_eq!(
            components.iter().map(Vec::len).sum::<usize>(),
            seeds.len(),
            "dirty region is not closed under adjacency"
        );

        let ordered: Vec<OrderedComponent> = if mode == RebuildMode::Partial && components.len() > 1 {
            components
                .into_par_iter()
                .map(|members| order_component(database, members, mask, algorithm))
                .collect()
        } else {
            components
                .into_iter()
                .map(|members| order_component(database, members, mask, algorithm))
                .collect()
        };

        let Alignment {
            survivors,
            reclaimed,
            lineages,
        } = self.align(&ordered, &dirty_groups);
        let released: Vec<GroupId> = dirty_groups
            .iter()
            .copied()
            .filter(|id| !survivors.contains(&Some(*id)))
            .collect();

        // Forget every dirty membership before installing the new groups.
        match mode {
            RebuildMode::Full => self.membership.clear(),
            _ => {
                for &id in &dirty_groups {
                    if let Some(group) = self.groups.get(id) {
                        for &vertex in group.members() {
                            self.membership[vertex.index()] = None;
                        }
                    }
                }
                for &vertex in destroyed {
                    if let Some(slot) = self.membership.get_mut(vertex.index()) {
                        *slot = None;
                    }
                }
            }
        }
        for &id in &released {
            self.groups.release(id);
        }
        for &id in &dirty_groups {
            self.lineage.swap_remove(&id);
        }
        for &id in &reclaimed {
            let claimed = self.groups.claim(id);
            debug_assert!(claimed, "reclaimed {id} was not on the free list");
        }

        let mut recomputed = Vec::with_capacity(ordered.len());
        let mut cycles = Vec::new();
        for ((component, survivor), lineage) in ordered.into_iter().zip(survivors).zip(lineages) {
            let id = survivor.unwrap_or_else(|| self.groups.allocate());
            let group = self.install(id, component, &mut cycles);
            if !lineage.is_empty() {
                self.lineage.insert(id, lineage);
            }
            recomputed.push(group);
        }

        self.publish_global_order();
        self.built_version = Some(database.version());

        for cycle in &cycles {
            warn!(group = %cycle.group, vertices = cycle.vertices.len(), "cycle excluded from execution");
        }
        debug!(
            ?mode,
            version = database.version(),
            vertices = seeds.len(),
            recomputed = recomputed.len(),
            released = released.len(),
            reclaimed = reclaimed.len(),
            groups = self.groups.len(),
            "topology rebuilt"
        );

        RebuildReport {
            mode,
            version: database.version(),
            recomputed,
            released,
            vertices_visited: seeds.len(),
            cycles,
        }
    }

    /// Pick the surviving id of every component, if any.
    fn align(&self, ordered: &[OrderedComponent], dirty_groups: &[GroupId]) -> Alignment {
        let mut contributions: IndexMap<GroupId, SmallVec<[usize; 2]>> = IndexMap::new();
        let mut component_of: HashMap<VertexHandle, usize> = HashMap::new();
        for (index, component) in ordered.iter().enumerate() {
            for &vertex in &component.members {
                component_of.insert(vertex, index);
                let Some(previous) = self.group_of(vertex) else { continue };
                if dirty_groups.binary_search(&previous).is_err() {
                    continue;
                }
                let targets = contributions.entry(previous).or_default();
                if targets.last() != Some(&index) {
                    targets.push(index);
                }
            }
        }

        let mut survivors: Vec<Option<GroupId>> = vec![None; ordered.len()];
        for (&previous, targets) in &contributions {
            if let [only] = targets.as_slice() {
                let slot = &mut survivors[*only];
                if slot.map_or(true, |current| previous < current) {
                    *slot = Some(previous);
                }
            }
        }

        // Split halves take back the ids their merge absorbed.
        let mut reclaimed = Vec::new();
        for (&previous, targets) in &contributions {
            if targets.len() < 2 {
                continue;
            }
            let Some(ancestors) = self.lineage.get(&previous) else { continue };
            for ancestor in ancestors {
                let Some(index) = sole_component(&ancestor.members, &component_of) else { continue };
                if survivors[index].is_some() || survivors.contains(&Some(ancestor.id)) {
                    continue;
                }
                if ancestor.id != previous {
                    if !self.groups.is_free(ancestor.id) || reclaimed.contains(&ancestor.id) {
                        continue;
                    }
                    reclaimed.push(ancestor.id);
                }
                survivors[index] = Some(ancestor.id);
            }
        }

        let mut lineages: Vec<Vec<Ancestor>> = vec![Vec::new(); ordered.len()];
        for &previous in contributions.keys() {
            let inherited = match self.lineage.get(&previous) {
                Some(ancestors) => ancestors.clone(),
                None => vec![Ancestor {
                    id: previous,
                    members: self.groups.get(previous).map(|group| group.members().to_vec()).unwrap_or_default(),
                }],
            };
            for ancestor in inherited {
                if let Some(index) = sole_component(&ancestor.members, &component_of) {
                    lineages[index].push(ancestor);
                }
            }
        }
        for lineage in &mut lineages {
            if lineage.len() < 2 {
                lineage.clear();
            }
        }

        Alignment {
            survivors,
            reclaimed,
            lineages,
        }
    }

    fn install(&mut self, id: GroupId, component: OrderedComponent, cycles: &mut Vec<CycleError>) -> GroupId {
        let OrderedComponent {
            members,
            order,
            level_starts,
            roots,
            leaves,
            cycle,
        } = component;

        if let Some(last) = members.last() {
            if last.index() >= self.membership.len() {
                self.membership.resize(last.index() + 1, None);
            }
        }
        for &vertex in &members {
            self.membership[vertex.index()] = Some(id);
        }

        let cyclic = cycle.is_some();
        if let Some(vertices) = cycle {
            cycles.push(CycleError { group: id, vertices });
        }

        self.groups.install(Group {
            id,
            members,
            order,
            level_starts,
            roots,
            leaves,
            cyclic,
        });
        id
    }

    fn publish_global_order(&mut self) {
        self.global_order.clear();
        match self.algorithm {
            OrderingAlgorithm::LocalDepthFirst => {
                for group in self.groups.iter() {
                    self.global_order.extend_from_slice(group.order());
                }
            }
            OrderingAlgorithm::GlobalBreadthFirst => {
                let depth = self.groups.iter().map(Group::level_count).max().unwrap_or(0);
                for level in 0..depth {
                    for group in self.groups.iter() {
                        self.global_order.extend_from_slice(group.level(level));
                    }
                }
            }
        }
    }
}

/// The one component holding every live vertex of `members`.
fn sole_component(members: &[VertexHandle], component_of: &HashMap<VertexHandle, usize>) -> Option<usize> {
    let mut found = None;
    for vertex in members {
        let Some(&index) = component_of.get(vertex) else { continue };
        match found {
            None => found = Some(index),
            Some(current) if current != index => return None,
            Some(_) => {}
        }
    }
    found
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new(OrderingAlgorithm::default(), TraversalFlags::ORDERING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, StructuralDiff};

    fn v(index: u32) -> VertexHandle {
        VertexHandle::new(index)
    }

    struct Fixture {
        db: ConnectivityDatabase,
        cache: TopologyCache,
    }

    impl Fixture {
        fn new(algorithm: OrderingAlgorithm) -> Self {
            Self {
                db: ConnectivityDatabase::new(1024),
                cache: TopologyCache::new(algorithm, TraversalFlags::ORDERING)
                    .with_partial_rebuild_fraction(1.0),
            }
        }

        fn apply(&mut self, build: impl FnOnce(&mut StructuralDiff)) -> RebuildReport {
            let mut diff = StructuralDiff::new();
            build(&mut diff);
            self.db.apply(&diff).unwrap();
            let changes = self.db.take_changes();
            self.cache.rebuild(&self.db, &changes)
        }

        fn chain(&mut self, vertices: &[u32]) -> RebuildReport {
            self.apply(|diff| {
                for &index in vertices {
                    diff.create_vertex(v(index));
                }
                for pair in vertices.windows(2) {
                    diff.connect(Connection::data(v(pair[0]), v(pair[1])));
                }
            })
        }

        fn group_of(&self, index: u32) -> &Group {
            let id = self.cache.group_of(v(index)).unwrap();
            self.cache.group(id).unwrap()
        }
    }

    #[test]
    fn first_build_is_full() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        let report = fx.chain(&[0, 1, 2]);

        assert_eq!(report.mode, RebuildMode::Full);
        assert_eq!(report.recomputed, vec![GroupId::new(0)]);
        let group = fx.group_of(0);
        assert_eq!(group.order(), &[v(0), v(1), v(2)]);
        assert_eq!(group.roots(), &[v(0)]);
        assert_eq!(group.leaves(), &[v(2)]);
        assert!(fx.cache.is_current(&fx.db));
    }

    #[test]
    fn unchanged_version_is_skipped() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1]);
        let report = fx.apply(|diff| {
            diff.resize_buffer(v(0), Default::default(), 8);
        });
        assert_eq!(report.mode, RebuildMode::Skipped);
    }

    #[test]
    fn untouched_group_keeps_identity_and_is_not_revisited() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1, 2]);
        fx.chain(&[10, 11, 12]);
        let first = fx.cache.group_of(v(0)).unwrap();
        let second = fx.cache.group_of(v(10)).unwrap();

        let report = fx.apply(|diff| {
            diff.create_vertex(v(13));
            diff.connect(Connection::data(v(12), v(13)));
        });

        assert_eq!(report.mode, RebuildMode::Partial);
        assert_eq!(report.vertices_visited, 4);
        assert_eq!(report.recomputed, vec![second]);
        assert_eq!(fx.cache.group_of(v(0)), Some(first));
        assert_eq!(fx.group_of(10).order(), &[v(10), v(11), v(12), v(13)]);
    }

    #[test]
    fn merge_keeps_the_smallest_identity() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.apply(|diff| {
            for index in 0..4 {
                diff.create_vertex(v(index));
            }
            diff.connect(Connection::data(v(0), v(1)));
            diff.connect(Connection::data(v(2), v(3)));
        });
        assert_eq!(fx.cache.group_count(), 2);

        let report = fx.apply(|diff| {
            diff.connect(Connection::data(v(1), v(2)));
        });

        assert_eq!(report.recomputed, vec![GroupId::new(0)]);
        assert_eq!(report.released, vec![GroupId::new(1)]);
        assert_eq!(fx.cache.group_count(), 1);
        assert_eq!(fx.group_of(3).order(), &[v(0), v(1), v(2), v(3)]);
    }

    #[test]
    fn split_reuses_released_ids_before_fresh_ones() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1, 2, 3]);
        fx.chain(&[8, 9]);
        assert_eq!(fx.cache.group_of(v(8)), Some(GroupId::new(1)));

        // Cutting the middle edge splits group 0 in two; neither half holds
        // every old member, so 0 is released and handed out again.
        let report = fx.apply(|diff| {
            diff.disconnect(Connection::data(v(1), v(2)));
        });

        assert_eq!(report.released, vec![GroupId::new(0)]);
        assert_eq!(fx.cache.group_of(v(0)), Some(GroupId::new(0)));
        assert_eq!(fx.cache.group_of(v(2)), Some(GroupId::new(2)));
        assert_eq!(fx.cache.group_of(v(8)), Some(GroupId::new(1)));
        assert_eq!(fx.group_of(2).order(), &[v(2), v(3)]);
    }

    #[test]
    fn split_after_merge_restores_both_identities() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[5, 6]);
        fx.chain(&[1, 2]);
        assert_eq!(fx.cache.group_of(v(5)), Some(GroupId::new(0)));
        let before: Vec<Group> = fx.cache.groups().cloned().collect();

        fx.apply(|diff| {
            diff.connect(Connection::data(v(6), v(1)));
        });
        assert_eq!(fx.cache.group_count(), 1);
        assert_eq!(fx.cache.group_of(v(1)), Some(GroupId::new(0)));

        let report = fx.apply(|diff| {
            diff.disconnect(Connection::data(v(6), v(1)));
        });
        assert!(report.released.is_empty());
        let after: Vec<Group> = fx.cache.groups().cloned().collect();
        assert_eq!(after, before);

        // The reclaimed id left the free list.
        let report = fx.chain(&[9]);
        assert_eq!(report.recomputed, vec![GroupId::new(2)]);
    }

    #[test]
    fn ancestry_survives_growth_of_the_merged_group() {
        let mut fx = Fixture::new(OrderingAlgorithm::GlobalBreadthFirst);
        fx.chain(&[4, 5]);
        fx.chain(&[0, 1]);
        fx.apply(|diff| {
            diff.connect(Connection::data(v(5), v(0)));
        });
        fx.apply(|diff| {
            diff.create_vertex(v(7));
            diff.connect(Connection::data(v(7), v(4)));
        });

        fx.apply(|diff| {
            diff.disconnect(Connection::data(v(5), v(0)));
        });
        assert_eq!(fx.cache.group_of(v(7)), Some(GroupId::new(0)));
        assert_eq!(fx.cache.group_of(v(0)), Some(GroupId::new(1)));
        assert_eq!(fx.group_of(4).order(), &[v(7), v(4), v(5)]);
    }

    #[test]
    fn closing_a_cycle_reports_it_and_clears_the_order() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1, 2]);
        fx.chain(&[5, 6]);

        let report = fx.apply(|diff| {
            diff.connect(Connection::data(v(2), v(0)));
        });

        assert_eq!(report.cycles.len(), 1);
        let mut vertices = report.cycles[0].vertices.clone();
        vertices.sort();
        assert_eq!(vertices, vec![v(0), v(1), v(2)]);

        let group = fx.group_of(0);
        assert!(group.is_cyclic());
        assert!(group.order().is_empty());
        assert!(group.roots().is_empty());
        assert_eq!(fx.cache.global_order(), &[v(5), v(6)]);
        assert_eq!(fx.cache.cyclic_groups().count(), 1);

        // Breaking the cycle restores the group.
        let report = fx.apply(|diff| {
            diff.disconnect(Connection::data(v(2), v(0)));
        });
        assert!(!report.has_cycles());
        assert_eq!(fx.group_of(0).order(), &[v(0), v(1), v(2)]);
    }

    #[test]
    fn destroying_vertices_drops_their_group() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1]);
        fx.chain(&[4]);

        let report = fx.apply(|diff| {
            diff.disconnect(Connection::data(v(0), v(1)));
            diff.destroy_vertex(v(0));
            diff.destroy_vertex(v(1));
        });

        assert_eq!(report.released, vec![GroupId::new(0)]);
        assert_eq!(fx.cache.group_count(), 1);
        assert_eq!(fx.cache.group_of(v(0)), None);
        assert_eq!(fx.cache.global_order(), &[v(4)]);
    }

    #[test]
    fn unchained_changes_force_a_full_rebuild() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0, 1]);

        let mut diff = StructuralDiff::new();
        diff.create_vertex(v(2));
        fx.db.apply(&diff).unwrap();
        let _lost = fx.db.take_changes();

        let mut diff = StructuralDiff::new();
        diff.connect(Connection::data(v(1), v(2)));
        fx.db.apply(&diff).unwrap();
        let changes = fx.db.take_changes();

        let report = fx.cache.rebuild(&fx.db, &changes);
        assert_eq!(report.mode, RebuildMode::Full);
        assert_eq!(fx.group_of(2).order(), &[v(0), v(1), v(2)]);
        assert_eq!(fx.cache.group_of(v(0)), Some(GroupId::new(0)));
    }

    #[test]
    fn large_dirty_region_goes_full() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.cache = fx.cache.clone().with_partial_rebuild_fraction(0.25);
        fx.chain(&[0, 1, 2, 3]);
        fx.chain(&[10]);

        let report = fx.apply(|diff| {
            diff.create_vertex(v(4));
            diff.connect(Connection::data(v(3), v(4)));
        });
        assert_eq!(report.mode, RebuildMode::Full);
        assert_eq!(fx.cache.group_of(v(10)), Some(GroupId::new(1)));
    }

    #[test]
    fn breadth_first_global_order_is_level_major() {
        let mut fx = Fixture::new(OrderingAlgorithm::GlobalBreadthFirst);
        fx.chain(&[0, 1, 2]);
        fx.chain(&[5, 6]);

        assert_eq!(fx.cache.global_order(), &[v(0), v(5), v(1), v(6), v(2)]);
    }

    #[test]
    fn stale_cache_is_detected() {
        let mut fx = Fixture::new(OrderingAlgorithm::LocalDepthFirst);
        fx.chain(&[0]);
        fx.db.register_vertex(v(1)).unwrap();

        assert_eq!(
            fx.cache.ensure_current(&fx.db),
            Err(ScheduleError::StaleTopology {
                cache: 1,
                database: 2
            })
        );
    }
}
