//! Waiter storage of a non-empty thread queue.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use super::Waiter;
use crate::priority::Priority;
use crate::sched::SchedulerId;
use crate::thread::ThreadId;

/// Heads of a thread queue, one variant per discipline family.
#[derive(Debug)]
pub enum ThreadQueueHeads {
    Fifo(FifoHeads),
    Priority(PriorityHeads),
}

impl ThreadQueueHeads {
    pub fn len(&self) -> usize {
        match self {
            ThreadQueueHeads::Fifo(heads) => heads.len(),
            ThreadQueueHeads::Priority(heads) => heads.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        match self {
            ThreadQueueHeads::Fifo(heads) => heads.contains(thread),
            ThreadQueueHeads::Priority(heads) => heads.contains(thread),
        }
    }

    pub fn waiters(&self) -> Vec<ThreadId> {
        match self {
            ThreadQueueHeads::Fifo(heads) => heads.waiters.iter().copied().collect(),
            ThreadQueueHeads::Priority(heads) => heads.waiters(),
        }
    }
}

/// Waiters in arrival order.
#[derive(Debug, Default)]
pub struct FifoHeads {
    waiters: VecDeque<ThreadId>,
}

impl FifoHeads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.waiters.contains(&thread)
    }

    pub fn push(&mut self, thread: ThreadId) {
        self.waiters.push_back(thread);
    }

    pub fn first(&self) -> Option<ThreadId> {
        self.waiters.front().copied()
    }

    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.waiters.iter().position(|&waiting| waiting == thread) {
            Some(position) => {
                self.waiters.remove(position);
                true
            }
            None => false,
        }
    }
}

/// Waiters of one scheduler instance, by priority then arrival.
#[derive(Debug)]
struct SchedulerQueue {
    scheduler: SchedulerId,
    waiters: BTreeMap<(Priority, u64), ThreadId>,
}

/// Position of a waiter in [`PriorityHeads`].
#[derive(Debug, Clone, Copy)]
struct Position {
    scheduler: SchedulerId,
    key: (Priority, u64),
}

/// Priority ordered waiters with one queue per home scheduler.
///
/// Taking a waiter out of a scheduler queue moves that queue behind the
/// others, so on surrender waiters of different schedulers take turns.
#[derive(Debug, Default)]
pub struct PriorityHeads {
    queues: VecDeque<SchedulerQueue>,
    positions: BTreeMap<ThreadId, Position>,
    sequence: u64,
}

impl PriorityHeads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.positions.contains_key(&thread)
    }

    /// Insert behind waiters of the same scheduler and priority.
    pub fn enqueue(&mut self, waiter: Waiter) {
        let key = (waiter.priority.purify(), self.sequence);
        self.sequence += 1;

        let queue = match self
            .queues
            .iter_mut()
            .position(|queue| queue.scheduler == waiter.scheduler)
        {
            Some(index) => &mut self.queues[index],
            None => {
                self.queues.push_back(SchedulerQueue {
                    scheduler: waiter.scheduler,
                    waiters: BTreeMap::new(),
                });
                let last = self.queues.len() - 1;
                &mut self.queues[last]
            }
        };
        queue.waiters.insert(key, waiter.thread);

        self.positions.insert(
            waiter.thread,
            Position {
                scheduler: waiter.scheduler,
                key,
            },
        );
    }

    /// Remove `thread`; returns the scheduler queue it was in.
    ///
    /// The scheduler queue of `thread` moves behind the others if it still
    /// has waiters and is dropped otherwise.
    pub fn extract(&mut self, thread: ThreadId) -> Option<SchedulerId> {
        let position = self.positions.remove(&thread)?;
        let index = self
            .queues
            .iter()
            .position(|queue| queue.scheduler == position.scheduler)?;

        let mut queue = self.queues.remove(index)?;
        queue.waiters.remove(&position.key);
        if !queue.waiters.is_empty() {
            self.queues.push_back(queue);
        }
        Some(position.scheduler)
    }

    /// Re-sort a waiter after a priority change.
    ///
    /// The order of the scheduler queues stays as it is.
    pub fn change_priority(&mut self, waiter: Waiter) {
        let position = match self.positions.get_mut(&waiter.thread) {
            Some(position) => position,
            None => return,
        };
        let scheduler = position.scheduler;
        let queue = match self.queues.iter_mut().find(|queue| queue.scheduler == scheduler)
        {
            Some(queue) => queue,
            None => return,
        };

        let key = (waiter.priority.purify(), self.sequence);
        self.sequence += 1;
        queue.waiters.remove(&position.key);
        queue.waiters.insert(key, waiter.thread);
        position.key = key;
    }

    /// Most important waiter of the first scheduler queue.
    pub fn first(&self) -> Option<ThreadId> {
        let queue = self.queues.front()?;
        queue.waiters.values().next().copied()
    }

    /// Most important waiter priority of `scheduler`.
    pub fn minimum(&self, scheduler: SchedulerId) -> Option<Priority> {
        self.queues
            .iter()
            .find(|queue| queue.scheduler == scheduler)
            .and_then(|queue| queue.waiters.keys().next())
            .map(|&(priority, _)| priority)
    }

    pub fn schedulers(&self) -> Vec<SchedulerId> {
        self.queues.iter().map(|queue| queue.scheduler).collect()
    }

    pub fn waiters(&self) -> Vec<ThreadId> {
        self.queues
            .iter()
            .flat_map(|queue| queue.waiters.values().copied())
            .collect()
    }
}
