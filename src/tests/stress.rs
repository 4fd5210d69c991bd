//! Stress tests for concurrency and high-load scenarios.

#[cfg(test)]
mod stress_tests {
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use crate::percpu::CpuIndex;
    use crate::sched::SchedulerId;
    use crate::smp::{SmpBarrierControl, SmpBarrierState};
    use crate::sync::{Obtained, Semaphore, SemaphoreDiscipline, Timeout};
    use crate::tests::helpers::*;
    use crate::thread::{ThreadAttributes, ThreadSchedulerState};
    use crate::threadq::{flush_default_filter, ThreadQueue, FIFO_OPERATIONS, PRIORITY_INHERIT_OPERATIONS};

    const PROCESSORS: usize = 4;
    const ITERATIONS: usize = 200;

    #[test]
    fn test_concurrent_block_unblock() {
        let system = Arc::new(priority_system(PROCESSORS));
        let barrier = Arc::new(SmpBarrierControl::new());

        let handles: Vec<_> = (0..PROCESSORS)
            .map(|index| {
                let system = Arc::clone(&system);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut state = SmpBarrierState::new();
                    let threads: Vec<_> = (0..3)
                        .map(|k| {
                            ThreadAttributes::new()
                                .priority(10 + (index * 3 + k) as u32)
                                .start(&system)
                                .unwrap()
                        })
                        .collect();
                    barrier.wait(&mut state, PROCESSORS as u32);

                    for iteration in 0..ITERATIONS {
                        let id = threads[iteration % threads.len()];
                        system.block(id).unwrap();
                        system
                            .set_priority(id, 1 + ((iteration * 7 + index) % 100) as u32)
                            .unwrap();
                        system.unblock(id).unwrap();
                        system.yield_thread(id).unwrap();
                        system.dispatch(CpuIndex::new(index)).unwrap();
                    }

                    barrier.wait(&mut state, PROCESSORS as u32);
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("processor thread panicked");
        }

        system.dispatch_all();
        assert_consistent(&system);
        assert_eq!(system.scheduled(SchedulerId::new(0)).unwrap().len(), PROCESSORS);
        assert_eq!(system.threads().len(), PROCESSORS + PROCESSORS * 3);
    }

    #[test]
    fn test_concurrent_semaphore_handover() {
        const HOLDERS: u32 = 2;

        let system = Arc::new(priority_system(PROCESSORS));
        let sem = Arc::new(Semaphore::new("SEM", HOLDERS, SemaphoreDiscipline::Fifo));
        let inside = Arc::new(AtomicUsize::new(0));
        let acquired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PROCESSORS)
            .map(|_| {
                let system = Arc::clone(&system);
                let sem = Arc::clone(&sem);
                let inside = Arc::clone(&inside);
                let acquired = Arc::clone(&acquired);
                thread::spawn(move || {
                    let id = ThreadAttributes::new().priority(50).start(&system).unwrap();
                    let control = system.thread(id).unwrap();

                    for _ in 0..ITERATIONS {
                        if sem.obtain(&system, id, Timeout::Forever).unwrap() == Obtained::Waiting {
                            // Another holder hands the semaphore over.
                            while control.state() == ThreadSchedulerState::Blocked {
                                thread::yield_now();
                            }
                        }

                        let holders = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        assert!(holders <= HOLDERS as usize);
                        acquired.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);

                        sem.release(&system);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("semaphore user panicked");
        }

        assert_eq!(acquired.load(Ordering::SeqCst), PROCESSORS * ITERATIONS);
        assert_eq!(sem.count(), HOLDERS);
        assert!(sem.waiters().is_empty());
        assert_consistent(&system);
    }

    /// Runs `f` on a helper thread and fails if it does not finish in time.
    fn within_deadline<T, F>(f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(f());
        });
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("thread queue operation did not complete")
    }

    #[test]
    fn test_enqueue_and_flush_complete() {
        let flushed = within_deadline(|| {
            let system = priority_system(2);
            let queue = ThreadQueue::new("WAIT", &FIFO_OPERATIONS);
            for priority in [5, 6, 7] {
                let id = ThreadAttributes::new().priority(priority).start(&system).unwrap();
                system.enqueue(&queue, id, Some(10)).unwrap();
            }
            let flushed = system.flush(&queue, flush_default_filter);
            assert_consistent(&system);
            flushed
        });
        assert_eq!(flushed, 3);
    }

    #[test]
    fn test_inheritance_enqueue_and_surrender_complete() {
        let owner = within_deadline(|| {
            let system = priority_system(1);
            let queue = ThreadQueue::new("MTX", &PRIORITY_INHERIT_OPERATIONS);
            let owner = ThreadAttributes::new().priority(20).start(&system).unwrap();
            let waiter = ThreadAttributes::new().priority(10).start(&system).unwrap();
            queue.lock().set_owner(Some(owner));

            system.enqueue(&queue, waiter, None).unwrap();
            let next = system.surrender(&queue, Some(owner));
            assert_consistent(&system);
            next == Some(waiter)
        });
        assert!(owner);
    }

    #[test]
    fn test_barrier_many_rounds() {
        const ROUNDS: usize = 1000;

        let control = Arc::new(SmpBarrierControl::new());
        let masters = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PROCESSORS)
            .map(|_| {
                let control = Arc::clone(&control);
                let masters = Arc::clone(&masters);
                thread::spawn(move || {
                    let mut state = SmpBarrierState::new();
                    for _ in 0..ROUNDS {
                        if control.wait(&mut state, PROCESSORS as u32) {
                            masters.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("barrier participant panicked");
        }

        assert_eq!(masters.load(Ordering::SeqCst), ROUNDS);
        assert_eq!(control.arrived(), 0);
    }
}
