//! Index-linked doubly linked chains.
//!
//! A [`Chain`] only stores its head, tail and length. The links of its
//! members live in an arena implementing [`ChainArena`], addressed by
//! [`NodeIndex`]. This keeps nodes owned by one arena while several chains
//! (a Scheduled chain, one ready chain per priority) thread through them,
//! and extraction from any position stays O(1).

/// Index of a chain member inside its arena.
pub type NodeIndex = usize;

/// Link fields embedded in every chain member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainLinks {
    prev: Option<NodeIndex>,
    next: Option<NodeIndex>,
    on_chain: bool,
}

impl ChainLinks {
    /// Links of a node that is on no chain.
    pub const fn off_chain() -> Self {
        Self {
            prev: None,
            next: None,
            on_chain: false,
        }
    }

    /// Whether the node is currently a member of some chain.
    pub fn is_on_chain(&self) -> bool {
        self.on_chain
    }
}

/// Storage that hands out the links of chain members.
pub trait ChainArena {
    fn links(&self, index: NodeIndex) -> &ChainLinks;
    fn links_mut(&mut self, index: NodeIndex) -> &mut ChainLinks;
}

impl ChainArena for alloc::vec::Vec<ChainLinks> {
    fn links(&self, index: NodeIndex) -> &ChainLinks {
        &self[index]
    }

    fn links_mut(&mut self, index: NodeIndex) -> &mut ChainLinks {
        &mut self[index]
    }
}

/// Head of a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain {
    head: Option<NodeIndex>,
    tail: Option<NodeIndex>,
    len: usize,
}

impl Chain {
    /// Create an empty chain.
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first(&self) -> Option<NodeIndex> {
        self.head
    }

    pub fn last(&self) -> Option<NodeIndex> {
        self.tail
    }

    pub fn next<A: ChainArena + ?Sized>(&self, arena: &A, index: NodeIndex) -> Option<NodeIndex> {
        arena.links(index).next
    }

    pub fn prev<A: ChainArena + ?Sized>(&self, arena: &A, index: NodeIndex) -> Option<NodeIndex> {
        arena.links(index).prev
    }

    /// Append `index` at the tail.
    pub fn append<A: ChainArena + ?Sized>(&mut self, arena: &mut A, index: NodeIndex) {
        let tail = self.tail;
        self.insert_after(arena, tail, index);
    }

    /// Prepend `index` at the head.
    pub fn prepend<A: ChainArena + ?Sized>(&mut self, arena: &mut A, index: NodeIndex) {
        self.insert_after(arena, None, index);
    }

    /// Insert `index` after `after`, or at the head if `after` is `None`.
    pub fn insert_after<A: ChainArena + ?Sized>(
        &mut self,
        arena: &mut A,
        after: Option<NodeIndex>,
        index: NodeIndex,
    ) {
        debug_assert!(!arena.links(index).on_chain, "node {} already on a chain", index);

        let next = match after {
            Some(prev) => arena.links(prev).next,
            None => self.head,
        };

        *arena.links_mut(index) = ChainLinks {
            prev: after,
            next,
            on_chain: true,
        };

        match after {
            Some(prev) => arena.links_mut(prev).next = Some(index),
            None => self.head = Some(index),
        }
        match next {
            Some(next) => arena.links_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }

        self.len += 1;
    }

    /// Unlink `index` from this chain.
    pub fn extract<A: ChainArena + ?Sized>(&mut self, arena: &mut A, index: NodeIndex) {
        let links = *arena.links(index);
        debug_assert!(links.on_chain, "node {} is not on a chain", index);

        match links.prev {
            Some(prev) => arena.links_mut(prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => arena.links_mut(next).prev = links.prev,
            None => self.tail = links.prev,
        }

        *arena.links_mut(index) = ChainLinks::off_chain();
        self.len -= 1;
    }

    /// Remove and return the head.
    pub fn get_first<A: ChainArena + ?Sized>(&mut self, arena: &mut A) -> Option<NodeIndex> {
        let first = self.head?;
        self.extract(arena, first);
        Some(first)
    }

    /// Insert `index` before the first member `next` for which
    /// `less_equal(arena, next)` holds, or at the tail if there is none.
    ///
    /// The order function carries the key of the inserted node; it decides
    /// whether equal keys go before (`<=`) or after (`<`) existing members.
    pub fn insert_ordered<A, F>(&mut self, arena: &mut A, index: NodeIndex, mut less_equal: F)
    where
        A: ChainArena + ?Sized,
        F: FnMut(&A, NodeIndex) -> bool,
    {
        let mut after = None;
        let mut cursor = self.head;

        while let Some(next) = cursor {
            if less_equal(&*arena, next) {
                break;
            }
            after = Some(next);
            cursor = arena.links(next).next;
        }

        self.insert_after(arena, after, index);
    }

    /// Iterate over the members from head to tail.
    pub fn iter<'a, A: ChainArena + ?Sized>(&self, arena: &'a A) -> ChainIter<'a, A> {
        ChainIter {
            arena,
            cursor: self.head,
        }
    }
}

/// Iterator over the members of a [`Chain`].
pub struct ChainIter<'a, A: ChainArena + ?Sized> {
    arena: &'a A,
    cursor: Option<NodeIndex>,
}

impl<'a, A: ChainArena + ?Sized> Iterator for ChainIter<'a, A> {
    type Item = NodeIndex;

    fn next(&mut self) -> Option<NodeIndex> {
        let current = self.cursor?;
        self.cursor = self.arena.links(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn arena(n: usize) -> Vec<ChainLinks> {
        vec![ChainLinks::off_chain(); n]
    }

    fn members(chain: &Chain, arena: &Vec<ChainLinks>) -> Vec<NodeIndex> {
        chain.iter(arena).collect()
    }

    #[test]
    fn test_append_prepend_extract() {
        let mut links = arena(4);
        let mut chain = Chain::new();
        assert!(chain.is_empty());

        chain.append(&mut links, 1);
        chain.append(&mut links, 2);
        chain.prepend(&mut links, 0);
        chain.append(&mut links, 3);
        assert_eq!(members(&chain, &links), vec![0, 1, 2, 3]);
        assert_eq!(chain.len(), 4);

        chain.extract(&mut links, 2);
        assert_eq!(members(&chain, &links), vec![0, 1, 3]);
        assert!(!links[2].is_on_chain());

        chain.extract(&mut links, 0);
        chain.extract(&mut links, 3);
        assert_eq!(chain.first(), Some(1));
        assert_eq!(chain.last(), Some(1));

        assert_eq!(chain.get_first(&mut links), Some(1));
        assert!(chain.is_empty());
        assert_eq!(chain.get_first(&mut links), None);
    }

    #[test]
    fn test_insert_ordered_keeps_arrival_order_for_equal_keys() {
        let keys = [5u32, 3, 5, 3, 7];
        let mut links = arena(keys.len());
        let mut chain = Chain::new();

        for (index, key) in keys.iter().enumerate() {
            // Append semantics: strictly less goes first.
            chain.insert_ordered(&mut links, index, |_, next| *key < keys[next]);
        }

        assert_eq!(members(&chain, &links), vec![1, 3, 0, 2, 4]);
    }

    #[test]
    fn test_insert_ordered_prepend_semantics() {
        let keys = [5u32, 5, 5];
        let mut links = arena(keys.len());
        let mut chain = Chain::new();

        for (index, key) in keys.iter().enumerate() {
            chain.insert_ordered(&mut links, index, |_, next| *key <= keys[next]);
        }

        assert_eq!(members(&chain, &links), vec![2, 1, 0]);
    }

    #[test]
    fn test_prev_next_navigation() {
        let mut links = arena(3);
        let mut chain = Chain::new();
        for i in 0..3 {
            chain.append(&mut links, i);
        }
        assert_eq!(chain.next(&links, 0), Some(1));
        assert_eq!(chain.prev(&links, 0), None);
        assert_eq!(chain.prev(&links, 2), Some(1));
        assert_eq!(chain.next(&links, 2), None);
    }
}
