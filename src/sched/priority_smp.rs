//! Fixed priority SMP scheduler.
//!
//! Ready nodes are kept in one FIFO chain per priority level. A bitmap of
//! the non-empty levels finds the most important ready node in constant time.

use alloc::vec::Vec;

use super::node::NodeArena;
use super::smp::{SmpNode, SmpReadyQueue, SmpScheduler};
use super::SchedulerEnv;
use crate::chain::{Chain, NodeIndex};
use crate::config::SchedulerPolicy;
use crate::errors::{fatal, InternalError};
use crate::priority::{Priority, PriorityBitmap, PriorityLevel};

/// Per-level ready chains of a priority SMP instance.
#[derive(Debug)]
pub struct PriorityReadyQueues {
    bitmap: PriorityBitmap,
    chains: Vec<Chain>,
}

impl PriorityReadyQueues {
    pub fn new(maximum_priority: PriorityLevel) -> Self {
        let levels = maximum_priority as usize + 1;
        Self {
            bitmap: PriorityBitmap::new(),
            chains: (0..levels).map(|_| Chain::new()).collect(),
        }
    }

    fn level_of(&self, nodes: &NodeArena<SmpNode>, node: NodeIndex) -> usize {
        nodes.node(node).ready_queue()
    }

    fn idle_level(&self) -> usize {
        self.chains.len() - 1
    }
}

impl SmpReadyQueue for PriorityReadyQueues {
    fn has_ready(&self) -> bool {
        !self.bitmap.is_empty()
    }

    fn highest_ready(&self, _nodes: &NodeArena<SmpNode>) -> Option<NodeIndex> {
        let level = self.bitmap.highest()?;
        self.chains[level as usize].first()
    }

    fn insert_ready(
        &mut self,
        nodes: &mut NodeArena<SmpNode>,
        node: NodeIndex,
        insert_priority: Priority,
    ) {
        let level = self.level_of(nodes, node);
        let chain = &mut self.chains[level];
        if insert_priority.is_append() {
            chain.append(nodes, node);
        } else {
            chain.prepend(nodes, node);
        }
        self.bitmap.add(level as PriorityLevel);
    }

    fn extract_from_ready(&mut self, nodes: &mut NodeArena<SmpNode>, node: NodeIndex) {
        let level = self.level_of(nodes, node);
        let chain = &mut self.chains[level];
        chain.extract(nodes, node);
        if chain.is_empty() {
            self.bitmap.remove(level as PriorityLevel);
        }
    }

    fn update_priority(&mut self, nodes: &mut NodeArena<SmpNode>, node: NodeIndex, priority: Priority) {
        let level = (priority.level() as usize).min(self.idle_level());
        nodes.node_mut(node).set_priority(priority, level);
    }

    /// The idle level only holds idle threads; take its last node.
    fn get_idle(&mut self, nodes: &mut NodeArena<SmpNode>) -> Option<NodeIndex> {
        let level = self.idle_level();
        let idle = self.chains[level].last()?;
        self.extract_from_ready(nodes, idle);
        Some(idle)
    }

    fn ready_nodes(&self, nodes: &NodeArena<SmpNode>) -> Vec<NodeIndex> {
        self.chains
            .iter()
            .flat_map(|chain| chain.iter(nodes))
            .collect()
    }

    /// Last scheduled node; among several nodes sharing the lowest priority
    /// the one on the lowest numbered processor.
    fn lowest_scheduled(
        &self,
        nodes: &NodeArena<SmpNode>,
        scheduled: &Chain,
        env: &SchedulerEnv<'_>,
    ) -> NodeIndex {
        let last = scheduled
            .last()
            .unwrap_or_else(|| fatal(InternalError::NoScheduledNode));
        let lowest_priority = nodes.node(last).priority();
        let cpu_of = |node: NodeIndex| env.thread(nodes.node(node).owner()).cpu();

        let mut lowest = last;
        let mut lowest_cpu = cpu_of(last);
        let mut cursor = scheduled.prev(nodes, last);

        while let Some(node) = cursor {
            if nodes.node(node).priority() != lowest_priority {
                break;
            }
            let cpu = cpu_of(node);
            if cpu < lowest_cpu {
                lowest = node;
                lowest_cpu = cpu;
            }
            cursor = scheduled.prev(nodes, node);
        }

        lowest
    }
}

/// Priority SMP scheduler instance.
pub type PrioritySmpScheduler = SmpScheduler<PriorityReadyQueues>;

impl SmpScheduler<PriorityReadyQueues> {
    /// Create an instance for threads with table index below `capacity`.
    pub fn new(maximum_priority: PriorityLevel, capacity: usize) -> Self {
        Self::with_ready_queue(
            SchedulerPolicy::PrioritySmp,
            maximum_priority,
            capacity,
            PriorityReadyQueues::new(maximum_priority),
        )
    }
}
