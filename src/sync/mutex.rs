//! Mutex with priority inheritance.

use alloc::sync::Arc;

use super::{Obtained, Timeout};
use crate::errors::{Result, Status};
use crate::kernel::System;
use crate::thread::ThreadId;
use crate::threadq::{ThreadQueue, PRIORITY_INHERIT_OPERATIONS};

/// Binary mutex whose owner inherits the priorities of its waiters.
///
/// Waiters of the owner's home scheduler raise the owner's priority there.
/// Waiters of other schedulers give the owner a helping node in their
/// scheduler so it can run on their processors.
#[derive(Debug)]
pub struct InheritanceMutex {
    queue: Arc<ThreadQueue>,
}

impl InheritanceMutex {
    pub fn new(name: &'static str) -> Self {
        Self {
            queue: ThreadQueue::new(name, &PRIORITY_INHERIT_OPERATIONS),
        }
    }

    pub fn name(&self) -> &'static str {
        self.queue.name()
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.queue.owner()
    }

    pub fn queue(&self) -> &Arc<ThreadQueue> {
        &self.queue
    }

    /// Obtain the mutex for `thread`; nested obtains are not supported.
    pub fn obtain(&self, system: &System, thread: ThreadId, timeout: Timeout) -> Result<Obtained> {
        let mut guard = self.queue.lock();
        match guard.owner() {
            None => {
                guard.set_owner(Some(thread));
                Ok(Obtained::Acquired)
            }
            Some(owner) if owner == thread => Err(Status::Unsatisfied.into()),
            Some(_) if timeout == Timeout::NoWait => Err(Status::Unsatisfied.into()),
            Some(_) => {
                system.enqueue_critical(&self.queue, guard, thread, timeout.interval(system.ticks()))?;
                Ok(Obtained::Waiting)
            }
        }
    }

    /// Release the mutex held by `thread`.
    ///
    /// Ownership passes to the first waiter, which is returned. The
    /// priorities `thread` inherited through this mutex are withdrawn.
    pub fn release(&self, system: &System, thread: ThreadId) -> Result<Option<ThreadId>> {
        let mut guard = self.queue.lock();
        if guard.owner() != Some(thread) {
            return Err(Status::NotOwner.into());
        }
        if guard.is_empty() {
            guard.set_owner(None);
            return Ok(None);
        }
        Ok(system.surrender_critical(&self.queue, guard, Some(thread)))
    }
}
