//! Thread queue disciplines.

use super::heads::{FifoHeads, PriorityHeads, ThreadQueueHeads};
use super::{PriorityAction, QueueContext, ThreadQueueQueue, Waiter};
use crate::errors::{fatal, InternalError};
use crate::thread::ThreadId;

/// Operations of a thread queue discipline.
///
/// All operations run with the queue lock held. `extract` and `surrender`
/// drop the heads when the last waiter leaves.
pub trait ThreadQueueOperations: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add a waiter.
    fn enqueue(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, context: &mut QueueContext);

    /// Remove a waiter from any position.
    fn extract(&self, queue: &mut ThreadQueueQueue, thread: ThreadId, context: &mut QueueContext);

    /// Remove and return the waiter that gets the object next.
    fn surrender(
        &self,
        queue: &mut ThreadQueueQueue,
        previous_owner: Option<ThreadId>,
        context: &mut QueueContext,
    ) -> Option<ThreadId>;

    /// The waiter `surrender` would return.
    fn first(&self, queue: &ThreadQueueQueue) -> Option<ThreadId>;

    /// The priority of a waiter changed.
    fn priority_actions(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, context: &mut QueueContext) {
        let _ = (queue, waiter, context);
    }
}

fn fifo_heads_mut(queue: &mut ThreadQueueQueue) -> &mut FifoHeads {
    if !matches!(queue.heads, Some(ThreadQueueHeads::Fifo(_))) {
        queue.heads = Some(ThreadQueueHeads::Fifo(FifoHeads::new()));
    }
    match queue.heads.as_mut() {
        Some(ThreadQueueHeads::Fifo(heads)) => heads,
        _ => unreachable!("FIFO heads were just installed"),
    }
}

fn priority_heads_mut(queue: &mut ThreadQueueQueue) -> &mut PriorityHeads {
    if !matches!(queue.heads, Some(ThreadQueueHeads::Priority(_))) {
        queue.heads = Some(ThreadQueueHeads::Priority(PriorityHeads::new()));
    }
    match queue.heads.as_mut() {
        Some(ThreadQueueHeads::Priority(heads)) => heads,
        _ => unreachable!("priority heads were just installed"),
    }
}

fn priority_heads(queue: &ThreadQueueQueue) -> Option<&PriorityHeads> {
    match queue.heads.as_ref() {
        Some(ThreadQueueHeads::Priority(heads)) => Some(heads),
        _ => None,
    }
}

/// First come, first served.
#[derive(Debug)]
pub struct FifoOperations;

pub static FIFO_OPERATIONS: FifoOperations = FifoOperations;

impl ThreadQueueOperations for FifoOperations {
    fn name(&self) -> &'static str {
        "FIFO"
    }

    fn enqueue(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, _context: &mut QueueContext) {
        fifo_heads_mut(queue).push(waiter.thread);
    }

    fn extract(&self, queue: &mut ThreadQueueQueue, thread: ThreadId, _context: &mut QueueContext) {
        let removed = match queue.heads.as_mut() {
            Some(ThreadQueueHeads::Fifo(heads)) => heads.remove(thread),
            _ => false,
        };
        if !removed {
            fatal(InternalError::NotEnqueued(thread));
        }
        queue.release_empty_heads();
    }

    fn surrender(
        &self,
        queue: &mut ThreadQueueQueue,
        _previous_owner: Option<ThreadId>,
        context: &mut QueueContext,
    ) -> Option<ThreadId> {
        let first = self.first(queue)?;
        self.extract(queue, first, context);
        Some(first)
    }

    fn first(&self, queue: &ThreadQueueQueue) -> Option<ThreadId> {
        match queue.heads.as_ref() {
            Some(ThreadQueueHeads::Fifo(heads)) => heads.first(),
            _ => None,
        }
    }
}

/// Most important waiter first, FIFO within a priority.
#[derive(Debug)]
pub struct PriorityOperations;

pub static PRIORITY_OPERATIONS: PriorityOperations = PriorityOperations;

impl PriorityOperations {
    fn extract_waiter(queue: &mut ThreadQueueQueue, thread: ThreadId) -> crate::sched::SchedulerId {
        let scheduler = match queue.heads.as_mut() {
            Some(ThreadQueueHeads::Priority(heads)) => heads.extract(thread),
            _ => None,
        };
        queue.release_empty_heads();
        scheduler.unwrap_or_else(|| fatal(InternalError::NotEnqueued(thread)))
    }

    fn surrender_first(queue: &mut ThreadQueueQueue) -> Option<ThreadId> {
        let heads = priority_heads_mut_existing(queue)?;
        let first = heads.first()?;
        heads.extract(first);
        queue.release_empty_heads();
        Some(first)
    }
}

fn priority_heads_mut_existing(queue: &mut ThreadQueueQueue) -> Option<&mut PriorityHeads> {
    match queue.heads.as_mut() {
        Some(ThreadQueueHeads::Priority(heads)) => Some(heads),
        _ => None,
    }
}

impl ThreadQueueOperations for PriorityOperations {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn enqueue(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, _context: &mut QueueContext) {
        priority_heads_mut(queue).enqueue(waiter);
    }

    fn extract(&self, queue: &mut ThreadQueueQueue, thread: ThreadId, _context: &mut QueueContext) {
        Self::extract_waiter(queue, thread);
    }

    fn surrender(
        &self,
        queue: &mut ThreadQueueQueue,
        _previous_owner: Option<ThreadId>,
        _context: &mut QueueContext,
    ) -> Option<ThreadId> {
        Self::surrender_first(queue)
    }

    fn first(&self, queue: &ThreadQueueQueue) -> Option<ThreadId> {
        priority_heads(queue)?.first()
    }

    fn priority_actions(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, _context: &mut QueueContext) {
        if let Some(heads) = priority_heads_mut_existing(queue) {
            heads.change_priority(waiter);
        }
    }
}

/// Priority discipline whose owner inherits the priorities of the waiters.
///
/// For each scheduler with waiters the owner inherits the most important
/// waiter priority. Waiters of a scheduler other than the owner's home
/// scheduler make the owner obtain a helping node there.
#[derive(Debug)]
pub struct PriorityInheritOperations;

pub static PRIORITY_INHERIT_OPERATIONS: PriorityInheritOperations = PriorityInheritOperations;

impl PriorityInheritOperations {
    fn inherit(queue: &ThreadQueueQueue, scheduler: crate::sched::SchedulerId, context: &mut QueueContext) {
        if let Some(owner) = queue.owner() {
            context.add_priority_action(PriorityAction {
                owner,
                queue: queue.id(),
                scheduler,
                priority: priority_heads(queue).and_then(|heads| heads.minimum(scheduler)),
            });
        }
    }
}

impl ThreadQueueOperations for PriorityInheritOperations {
    fn name(&self) -> &'static str {
        "priority inherit"
    }

    fn enqueue(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, context: &mut QueueContext) {
        priority_heads_mut(queue).enqueue(waiter);
        Self::inherit(queue, waiter.scheduler, context);
    }

    fn extract(&self, queue: &mut ThreadQueueQueue, thread: ThreadId, context: &mut QueueContext) {
        let scheduler = PriorityOperations::extract_waiter(queue, thread);
        Self::inherit(queue, scheduler, context);
    }

    fn surrender(
        &self,
        queue: &mut ThreadQueueQueue,
        previous_owner: Option<ThreadId>,
        context: &mut QueueContext,
    ) -> Option<ThreadId> {
        let schedulers = priority_heads(queue).map(PriorityHeads::schedulers).unwrap_or_default();

        if let Some(previous) = previous_owner.or(queue.owner()) {
            for &scheduler in &schedulers {
                context.add_priority_action(PriorityAction {
                    owner: previous,
                    queue: queue.id(),
                    scheduler,
                    priority: None,
                });
            }
        }

        let first = PriorityOperations::surrender_first(queue);
        queue.set_owner(first);

        if let Some(heads) = priority_heads(queue) {
            for scheduler in heads.schedulers() {
                Self::inherit(queue, scheduler, context);
            }
        }
        first
    }

    fn first(&self, queue: &ThreadQueueQueue) -> Option<ThreadId> {
        priority_heads(queue)?.first()
    }

    fn priority_actions(&self, queue: &mut ThreadQueueQueue, waiter: Waiter, context: &mut QueueContext) {
        if let Some(heads) = priority_heads_mut_existing(queue) {
            heads.change_priority(waiter);
            Self::inherit(queue, waiter.scheduler, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use crate::sched::SchedulerId;
    use crate::threadq::ThreadQueue;

    fn waiter(index: usize, scheduler: usize, level: u32) -> Waiter {
        Waiter {
            thread: ThreadId::from_index(index),
            scheduler: SchedulerId::new(scheduler),
            priority: Priority::from_level(level),
        }
    }

    #[test]
    fn test_fifo_surrender_order_and_heads_lifecycle() {
        let tq = ThreadQueue::new("FIFO", &FIFO_OPERATIONS);
        let mut queue = tq.lock();
        let mut context = QueueContext::new();
        assert!(queue.heads().is_none());

        for index in [4, 2, 7] {
            FIFO_OPERATIONS.enqueue(&mut queue, waiter(index, 0, 1), &mut context);
        }
        assert_eq!(queue.len(), 3);

        FIFO_OPERATIONS.extract(&mut queue, ThreadId::from_index(2), &mut context);
        assert_eq!(
            FIFO_OPERATIONS.surrender(&mut queue, None, &mut context),
            Some(ThreadId::from_index(4))
        );
        assert_eq!(
            FIFO_OPERATIONS.surrender(&mut queue, None, &mut context),
            Some(ThreadId::from_index(7))
        );
        assert!(queue.heads().is_none());
        assert_eq!(FIFO_OPERATIONS.surrender(&mut queue, None, &mut context), None);
        assert!(context.priority_actions().is_empty());
    }

    #[test]
    fn test_priority_surrender_order() {
        let tq = ThreadQueue::new("PRIO", &PRIORITY_OPERATIONS);
        let mut queue = tq.lock();
        let mut context = QueueContext::new();

        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(0, 0, 7), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(1, 0, 2), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(2, 0, 7), &mut context);
        assert_eq!(PRIORITY_OPERATIONS.first(&queue), Some(ThreadId::from_index(1)));

        let order: Vec<ThreadId> = core::iter::from_fn(|| {
            PRIORITY_OPERATIONS.surrender(&mut queue, None, &mut context)
        })
        .collect();
        assert_eq!(
            order,
            [ThreadId::from_index(1), ThreadId::from_index(0), ThreadId::from_index(2)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_surrender_serves_schedulers_in_turn() {
        let tq = ThreadQueue::new("PRIO", &PRIORITY_OPERATIONS);
        let mut queue = tq.lock();
        let mut context = QueueContext::new();

        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(0, 0, 3), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(1, 0, 4), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(2, 1, 9), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(3, 2, 9), &mut context);

        let order: Vec<usize> = core::iter::from_fn(|| {
            PRIORITY_OPERATIONS.surrender(&mut queue, None, &mut context)
        })
        .map(|id| id.index())
        .collect();
        assert_eq!(order, [0, 2, 3, 1]);
    }

    #[test]
    fn test_priority_extract_moves_scheduler_queue_back() {
        let tq = ThreadQueue::new("PRIO", &PRIORITY_OPERATIONS);
        let mut queue = tq.lock();
        let mut context = QueueContext::new();

        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(0, 0, 1), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(1, 0, 2), &mut context);
        PRIORITY_OPERATIONS.enqueue(&mut queue, waiter(2, 1, 9), &mut context);

        PRIORITY_OPERATIONS.extract(&mut queue, ThreadId::from_index(0), &mut context);
        assert_eq!(PRIORITY_OPERATIONS.first(&queue), Some(ThreadId::from_index(2)));
    }

    #[test]
    fn test_inherit_actions_follow_waiters() {
        let tq = ThreadQueue::new("MTX", &PRIORITY_INHERIT_OPERATIONS);
        let mut queue = tq.lock();
        let mut context = QueueContext::new();
        let owner = ThreadId::from_index(9);
        queue.set_owner(Some(owner));

        PRIORITY_INHERIT_OPERATIONS.enqueue(&mut queue, waiter(0, 0, 5), &mut context);
        PRIORITY_INHERIT_OPERATIONS.enqueue(&mut queue, waiter(1, 1, 3), &mut context);
        let actions = context.take_priority_actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].scheduler, SchedulerId::new(1));
        assert_eq!(actions[1].priority, Some(Priority::from_level(3)));

        PRIORITY_INHERIT_OPERATIONS.extract(&mut queue, ThreadId::from_index(1), &mut context);
        let actions = context.take_priority_actions();
        assert_eq!(actions[0].owner, owner);
        assert_eq!(actions[0].priority, None);

        let new_owner = PRIORITY_INHERIT_OPERATIONS.surrender(&mut queue, Some(owner), &mut context);
        assert_eq!(new_owner, Some(ThreadId::from_index(0)));
        assert_eq!(queue.owner(), new_owner);
        let actions = context.take_priority_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].owner, owner);
        assert_eq!(actions[0].priority, None);
    }
}
