//! Thread queues.
//!
//! A thread queue holds the threads waiting for an object. Its discipline
//! ([`ThreadQueueOperations`]) decides the order in which waiters leave the
//! queue. The heads holding the waiters only exist while the queue is not
//! empty.
//!
//! The queue operations run with the queue lock held and never call into the
//! schedulers. Priority changes they cause (priority inheritance) are
//! recorded in a [`QueueContext`] and carried out by the caller once the
//! queue lock is released.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use portable_atomic::{AtomicUsize, Ordering};

use crate::priority::Priority;
use crate::sched::SchedulerId;
use crate::thread::ThreadId;

pub mod flush;
pub mod heads;
pub mod ops;

pub use flush::{flush_default_filter, flush_status_object_was_deleted, flush_status_unavailable};
pub use heads::{FifoHeads, PriorityHeads, ThreadQueueHeads};
pub use ops::{
    FifoOperations, PriorityInheritOperations, PriorityOperations, ThreadQueueOperations,
    FIFO_OPERATIONS, PRIORITY_INHERIT_OPERATIONS, PRIORITY_OPERATIONS,
};

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(1);

/// Identifier of a thread queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(usize);

impl QueueId {
    fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread as seen by a queue discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub thread: ThreadId,
    /// Home scheduler of the thread
    pub scheduler: SchedulerId,
    /// Priority in the home scheduler
    pub priority: Priority,
}

/// Inheritance change for the owner of a queue.
///
/// `priority` is the most important priority of the waiters of `scheduler`
/// in `queue`, `None` once there are none left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityAction {
    pub owner: ThreadId,
    pub queue: QueueId,
    pub scheduler: SchedulerId,
    pub priority: Option<Priority>,
}

/// Deferred work of a thread queue operation.
#[derive(Debug, Default)]
pub struct QueueContext {
    actions: Vec<PriorityAction>,
}

impl QueueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_priority_action(&mut self, action: PriorityAction) {
        self.actions.push(action);
    }

    pub fn priority_actions(&self) -> &[PriorityAction] {
        &self.actions
    }

    pub fn take_priority_actions(&mut self) -> Vec<PriorityAction> {
        core::mem::take(&mut self.actions)
    }
}

/// State of a thread queue protected by the queue lock.
#[derive(Debug)]
pub struct ThreadQueueQueue {
    id: QueueId,
    pub(crate) heads: Option<ThreadQueueHeads>,
    owner: Option<ThreadId>,
}

impl ThreadQueueQueue {
    fn new(id: QueueId) -> Self {
        Self {
            id,
            heads: None,
            owner: None,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn heads(&self) -> Option<&ThreadQueueHeads> {
        self.heads.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_none()
    }

    pub fn len(&self) -> usize {
        self.heads.as_ref().map_or(0, ThreadQueueHeads::len)
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.heads
            .as_ref()
            .map_or(false, |heads| heads.contains(thread))
    }

    /// Waiters in the order the discipline would dequeue them.
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.heads
            .as_ref()
            .map_or_else(Vec::new, ThreadQueueHeads::waiters)
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<ThreadId>) {
        self.owner = owner;
    }

    /// Drop the heads once the last waiter is gone.
    pub(crate) fn release_empty_heads(&mut self) {
        if self.heads.as_ref().map_or(false, ThreadQueueHeads::is_empty) {
            self.heads = None;
        }
    }
}

/// A thread queue with its discipline.
pub struct ThreadQueue {
    name: &'static str,
    operations: &'static dyn ThreadQueueOperations,
    queue: spin::Mutex<ThreadQueueQueue>,
}

impl ThreadQueue {
    pub fn new(name: &'static str, operations: &'static dyn ThreadQueueOperations) -> Arc<Self> {
        Arc::new(Self {
            name,
            operations,
            queue: spin::Mutex::new(ThreadQueueQueue::new(QueueId::next())),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn operations(&self) -> &'static dyn ThreadQueueOperations {
        self.operations
    }

    pub fn id(&self) -> QueueId {
        self.queue.lock().id()
    }

    /// Acquire the queue lock.
    pub fn lock(&self) -> spin::MutexGuard<'_, ThreadQueueQueue> {
        self.queue.lock()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn waiters(&self) -> Vec<ThreadId> {
        self.queue.lock().waiters()
    }

    pub fn first(&self) -> Option<ThreadId> {
        let queue = self.queue.lock();
        self.operations.first(&queue)
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.queue.lock().owner()
    }
}

impl fmt::Debug for ThreadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadQueue")
            .field("name", &self.name)
            .field("discipline", &self.operations.name())
            .finish()
    }
}
