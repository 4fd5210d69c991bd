//! Bulk release of thread queue waiters.
//!
//! Flushing extracts waiters under the queue lock and unblocks them in one
//! batch afterwards, with thread dispatching disabled, so the processor is
//! dispatched at most once for the whole batch.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{QueueContext, ThreadQueue, ThreadQueueQueue};
use crate::errors::Status;
use crate::kernel::System;
use crate::thread::ThreadControl;

/// Release every waiter with its return code untouched.
pub fn flush_default_filter(_thread: &ThreadControl, _context: &mut QueueContext) -> bool {
    true
}

/// Release every waiter with [`Status::Unavailable`].
pub fn flush_status_unavailable(thread: &ThreadControl, _context: &mut QueueContext) -> bool {
    thread.set_wait_return_code(Status::Unavailable);
    true
}

/// Release every waiter with [`Status::ObjectWasDeleted`].
pub fn flush_status_object_was_deleted(thread: &ThreadControl, _context: &mut QueueContext) -> bool {
    thread.set_wait_return_code(Status::ObjectWasDeleted);
    true
}

impl System {
    /// Release the waiters of `queue` in discipline order.
    ///
    /// `filter` sees each waiter before it is extracted; returning `false`
    /// stops the flush and leaves that waiter and all behind it on the
    /// queue.
    ///
    /// # Returns
    ///
    /// The number of released threads.
    pub fn flush<F>(&self, queue: &ThreadQueue, filter: F) -> usize
    where
        F: FnMut(&ThreadControl, &mut QueueContext) -> bool,
    {
        let guard = queue.lock();
        self.flush_critical(queue, guard, filter)
    }

    /// Flush with the queue lock already held.
    pub fn flush_critical<F>(
        &self,
        queue: &ThreadQueue,
        mut guard: spin::MutexGuard<'_, ThreadQueueQueue>,
        mut filter: F,
    ) -> usize
    where
        F: FnMut(&ThreadControl, &mut QueueContext) -> bool,
    {
        let operations = queue.operations();
        let mut context = QueueContext::new();
        let mut unblock: Vec<Arc<ThreadControl>> = Vec::new();

        while let Some(first) = operations.first(&guard) {
            let thread = match self.threads().get(first) {
                Some(thread) => thread,
                None => break,
            };
            if !filter(&thread, &mut context) {
                break;
            }

            operations.extract(&mut guard, first, &mut context);
            thread.wait_info().queue = None;
            unblock.push(thread);
        }

        if unblock.is_empty() {
            return 0;
        }

        let dispatch = self.dispatch_disable();
        drop(guard);

        for thread in &unblock {
            thread.wait_info().deadline = None;
            self.unblock_thread(thread);
        }
        self.apply_priority_actions(&mut context);
        drop(dispatch);

        log::debug!("{}: flushed {} waiters", queue.name(), unblock.len());
        unblock.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::thread::{ThreadAttributes, ThreadId, ThreadSchedulerState};
    use crate::threadq::{FIFO_OPERATIONS, PRIORITY_OPERATIONS};

    fn waiting_threads(system: &System, queue: &Arc<ThreadQueue>, priorities: &[u32]) -> Vec<ThreadId> {
        priorities
            .iter()
            .map(|&priority| {
                let id = ThreadAttributes::new()
                    .priority(priority)
                    .start(system)
                    .unwrap();
                system.enqueue(queue, id, None).unwrap();
                id
            })
            .collect()
    }

    #[test]
    fn test_flush_releases_all_waiters() {
        let system = System::new(SystemConfig::single_scheduler(1)).unwrap();
        let queue = ThreadQueue::new("SEMA", &FIFO_OPERATIONS);
        let waiters = waiting_threads(&system, &queue, &[7, 3, 9]);

        assert_eq!(system.flush(&queue, flush_status_object_was_deleted), 3);
        assert!(queue.is_empty());
        for id in waiters {
            let thread = system.thread(id).unwrap();
            assert_eq!(thread.wait_return_code(), Status::ObjectWasDeleted);
            assert!(!thread.is_waiting());
            assert_ne!(thread.state(), ThreadSchedulerState::Blocked);
        }
        system.verify().unwrap();
    }

    #[test]
    fn test_flush_stops_at_rejected_waiter() {
        let system = System::new(SystemConfig::single_scheduler(2)).unwrap();
        let queue = ThreadQueue::new("PRIO", &PRIORITY_OPERATIONS);
        let waiters = waiting_threads(&system, &queue, &[4, 2, 6, 8]);

        // Priority order is 2, 4, 6, 8; stop at priority 6.
        let flushed = system.flush(&queue, |thread, _| thread.current_priority().level() < 6);
        assert_eq!(flushed, 2);
        assert_eq!(queue.waiters(), [waiters[2], waiters[3]]);
        assert_eq!(system.thread(waiters[1]).unwrap().wait_return_code(), Status::Successful);
        system.verify().unwrap();
    }

    #[test]
    fn test_flush_empty_queue() {
        let system = System::new(SystemConfig::single_scheduler(1)).unwrap();
        let queue = ThreadQueue::new("EMPTY", &FIFO_OPERATIONS);
        assert_eq!(system.flush(&queue, flush_default_filter), 0);
    }

    #[test]
    fn test_flush_dispatches_once_after_batch() {
        let system = System::new(SystemConfig::single_scheduler(1)).unwrap();
        let queue = ThreadQueue::new("SEMA", &FIFO_OPERATIONS);
        let waiters = waiting_threads(&system, &queue, &[5, 1, 3]);

        system.flush(&queue, flush_status_unavailable);
        assert_eq!(system.executing(crate::percpu::CpuIndex::new(0)).unwrap(), Some(waiters[1]));
        assert_eq!(system.thread(waiters[0]).unwrap().wait_return_code(), Status::Unavailable);
    }
}
