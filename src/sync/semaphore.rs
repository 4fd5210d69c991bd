//! Counting semaphore.

use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicU32, Ordering};

use super::{Obtained, Timeout};
use crate::errors::{Result, Status};
use crate::kernel::System;
use crate::thread::ThreadId;
use crate::threadq::{
    flush_status_object_was_deleted, flush_status_unavailable, ThreadQueue, FIFO_OPERATIONS,
    PRIORITY_OPERATIONS,
};

/// Order in which waiting threads obtain the semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreDiscipline {
    Fifo,
    Priority,
}

/// Counting semaphore with a thread queue for its waiters.
///
/// The count only changes with the queue lock held, so a release either
/// hands the semaphore to a waiter or increments the count.
#[derive(Debug)]
pub struct Semaphore {
    queue: Arc<ThreadQueue>,
    count: AtomicU32,
}

impl Semaphore {
    pub fn new(name: &'static str, initial: u32, discipline: SemaphoreDiscipline) -> Self {
        let queue = match discipline {
            SemaphoreDiscipline::Fifo => ThreadQueue::new(name, &FIFO_OPERATIONS),
            SemaphoreDiscipline::Priority => ThreadQueue::new(name, &PRIORITY_OPERATIONS),
        };
        Self {
            queue,
            count: AtomicU32::new(initial),
        }
    }

    pub fn name(&self) -> &'static str {
        self.queue.name()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &Arc<ThreadQueue> {
        &self.queue
    }

    pub fn waiters(&self) -> Vec<ThreadId> {
        self.queue.waiters()
    }

    /// Obtain the semaphore for `thread`.
    pub fn obtain(&self, system: &System, thread: ThreadId, timeout: Timeout) -> Result<Obtained> {
        let guard = self.queue.lock();
        let count = self.count.load(Ordering::Acquire);
        if count > 0 {
            self.count.store(count - 1, Ordering::Release);
            return Ok(Obtained::Acquired);
        }
        if timeout == Timeout::NoWait {
            return Err(Status::Unsatisfied.into());
        }

        system.enqueue_critical(&self.queue, guard, thread, timeout.interval(system.ticks()))?;
        Ok(Obtained::Waiting)
    }

    /// Release the semaphore.
    ///
    /// Returns the waiter that obtained it, if any.
    pub fn release(&self, system: &System) -> Option<ThreadId> {
        let guard = self.queue.lock();
        if guard.is_empty() {
            self.count.fetch_add(1, Ordering::AcqRel);
            return None;
        }
        system.surrender_critical(&self.queue, guard, None)
    }

    /// Release all waiters with [`Status::Unavailable`].
    pub fn flush(&self, system: &System) -> usize {
        system.flush(&self.queue, flush_status_unavailable)
    }

    /// Release all waiters with [`Status::ObjectWasDeleted`].
    ///
    /// Returns the number of waiters, non-zero if the semaphore was in use.
    pub fn delete(self, system: &System) -> usize {
        let flushed = system.flush(&self.queue, flush_status_object_was_deleted);
        if flushed > 0 {
            log::warn!("semaphore {} deleted with {} waiters", self.name(), flushed);
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::thread::ThreadAttributes;

    fn system() -> System {
        System::new(SystemConfig::single_scheduler(2)).unwrap()
    }

    #[test]
    fn test_obtain_and_release_count() {
        let system = system();
        let a = ThreadAttributes::new().start(&system).unwrap();
        let sem = Semaphore::new("SEM", 1, SemaphoreDiscipline::Fifo);

        assert_eq!(sem.obtain(&system, a, Timeout::Forever).unwrap(), Obtained::Acquired);
        assert_eq!(sem.count(), 0);
        assert_eq!(
            sem.obtain(&system, a, Timeout::NoWait),
            Err(Status::Unsatisfied.into())
        );
        assert_eq!(sem.release(&system), None);
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_release_hands_over_in_priority_order() {
        let system = system();
        let sem = Semaphore::new("SEM", 0, SemaphoreDiscipline::Priority);
        let low = ThreadAttributes::new().priority(20).start(&system).unwrap();
        let high = ThreadAttributes::new().priority(10).start(&system).unwrap();

        assert_eq!(sem.obtain(&system, low, Timeout::Forever).unwrap(), Obtained::Waiting);
        assert_eq!(sem.obtain(&system, high, Timeout::Forever).unwrap(), Obtained::Waiting);

        assert_eq!(sem.release(&system), Some(high));
        assert_eq!(sem.count(), 0);
        assert_eq!(system.thread(high).unwrap().wait_return_code(), Status::Successful);
        assert_eq!(sem.waiters(), [low]);
        system.verify().unwrap();
    }

    #[test]
    fn test_timeout_removes_waiter() {
        let system = system();
        let sem = Semaphore::new("SEM", 0, SemaphoreDiscipline::Fifo);
        let a = ThreadAttributes::new().start(&system).unwrap();

        sem.obtain(&system, a, Timeout::Ticks(2)).unwrap();
        assert_eq!(system.clock_tick(), 0);
        assert_eq!(system.clock_tick(), 1);

        let thread = system.thread(a).unwrap();
        assert_eq!(thread.wait_return_code(), Status::Timeout);
        assert!(sem.waiters().is_empty());
        assert_eq!(sem.release(&system), None);
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn test_millisecond_timeout_uses_tick_frequency() {
        let system = System::new(SystemConfig::single_scheduler(1).ticks_per_second(100)).unwrap();
        let sem = Semaphore::new("SEM", 0, SemaphoreDiscipline::Fifo);
        let a = ThreadAttributes::new().start(&system).unwrap();

        sem.obtain(&system, a, Timeout::Millis(15)).unwrap();
        assert_eq!(system.clock_tick(), 0);
        assert_eq!(sem.waiters(), [a]);
        assert_eq!(system.clock_tick(), 1);
        assert_eq!(system.thread(a).unwrap().wait_return_code(), Status::Timeout);
    }

    #[test]
    fn test_delete_reports_waiters() {
        let system = system();
        let sem = Semaphore::new("SEM", 0, SemaphoreDiscipline::Fifo);
        for _ in 0..3 {
            let id = ThreadAttributes::new().start(&system).unwrap();
            sem.obtain(&system, id, Timeout::Forever).unwrap();
        }
        let waiters = sem.waiters();

        assert_eq!(sem.delete(&system), 3);
        for id in waiters {
            assert_eq!(system.thread(id).unwrap().wait_return_code(), Status::ObjectWasDeleted);
        }
        system.verify().unwrap();
    }
}
