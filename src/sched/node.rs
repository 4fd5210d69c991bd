//! Scheduler node storage.
//!
//! Nodes of an instance live in a [`NodeArena`] slot equal to the table
//! index of their owner thread, so a thread has at most one node per
//! instance and lookups need no search.

use alloc::vec::Vec;

use crate::chain::{ChainArena, ChainLinks, NodeIndex};
use crate::errors::{fatal, InternalError};
use crate::thread::ThreadId;

/// A node that can be linked into chains.
pub trait Linked {
    fn links(&self) -> &ChainLinks;
    fn links_mut(&mut self) -> &mut ChainLinks;
}

/// Arena of scheduler nodes indexed by owner thread.
#[derive(Debug)]
pub struct NodeArena<N> {
    slots: Vec<Option<N>>,
}

impl<N> NodeArena<N> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn insert(&mut self, thread: ThreadId, node: N) {
        let index = thread.index();
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let slot = &mut self.slots[index];
        if slot.is_some() {
            fatal(InternalError::NodeExists(thread));
        }
        *slot = Some(node);
    }

    pub fn remove(&mut self, thread: ThreadId) -> Option<N> {
        self.slots.get_mut(thread.index())?.take()
    }

    pub fn get(&self, thread: ThreadId) -> Option<&N> {
        self.slots.get(thread.index())?.as_ref()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.get(thread).is_some()
    }

    /// The node in slot `index`; a missing node is fatal.
    pub fn node(&self, index: NodeIndex) -> &N {
        match self.slots.get(index) {
            Some(Some(node)) => node,
            _ => fatal(InternalError::NodeMissing(ThreadId::from_index(index))),
        }
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut N {
        match self.slots.get_mut(index) {
            Some(Some(node)) => node,
            _ => fatal(InternalError::NodeMissing(ThreadId::from_index(index))),
        }
    }

    /// Iterate over `(index, node)` of all present nodes.
    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &N)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|node| (index, node)))
    }
}

impl<N: Linked> ChainArena for NodeArena<N> {
    fn links(&self, index: NodeIndex) -> &ChainLinks {
        self.node(index).links()
    }

    fn links_mut(&mut self, index: NodeIndex) -> &mut ChainLinks {
        self.node_mut(index).links_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct TestNode {
        links: ChainLinks,
    }

    impl Linked for TestNode {
        fn links(&self) -> &ChainLinks {
            &self.links
        }

        fn links_mut(&mut self) -> &mut ChainLinks {
            &mut self.links
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = NodeArena::with_capacity(2);
        let thread = ThreadId::from_index(5);
        arena.insert(thread, TestNode::default());
        assert!(arena.contains(thread));
        assert!(!arena.node(thread.index()).links().is_on_chain());
        assert_eq!(arena.iter().count(), 1);
        assert!(arena.remove(thread).is_some());
        assert!(arena.get(thread).is_none());
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn test_double_insert_is_fatal() {
        let mut arena = NodeArena::with_capacity(1);
        arena.insert(ThreadId::from_index(0), TestNode::default());
        arena.insert(ThreadId::from_index(0), TestNode::default());
    }
}
