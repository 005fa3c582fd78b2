//! Walkers over the cached groups.

use std::iter::FusedIterator;
use std::slice;

use crate::graph::VertexHandle;

use super::group::{Group, GroupId};

/// Iterates live groups by ascending id.
#[derive(Debug, Clone)]
pub struct GroupWalker<'a> {
    slots: slice::Iter<'a, Option<Group>>,
}

impl<'a> GroupWalker<'a> {
    pub(crate) fn new(slots: &'a [Option<Group>]) -> Self {
        Self { slots: slots.iter() }
    }
}

impl<'a> Iterator for GroupWalker<'a> {
    type Item = &'a Group;

    fn next(&mut self) -> Option<Self::Item> {
        self.slots.by_ref().find_map(Option::as_ref)
    }
}

impl FusedIterator for GroupWalker<'_> {}

/// Iterates the root vertices of every group, group by group.
///
/// Cyclic groups have no roots and contribute nothing.
#[derive(Debug, Clone)]
pub struct RootCacheWalker<'a> {
    groups: GroupWalker<'a>,
    current: Option<(GroupId, slice::Iter<'a, VertexHandle>)>,
}

impl<'a> RootCacheWalker<'a> {
    pub(crate) fn new(groups: GroupWalker<'a>) -> Self {
        Self {
            groups,
            current: None,
        }
    }
}

impl<'a> Iterator for RootCacheWalker<'a> {
    type Item = (GroupId, VertexHandle);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((id, roots)) = self.current.as_mut() {
                if let Some(&root) = roots.next() {
                    return Some((*id, root));
                }
            }
            let group = self.groups.next()?;
            self.current = Some((group.id(), group.roots().iter()));
        }
    }
}

impl FusedIterator for RootCacheWalker<'_> {}
