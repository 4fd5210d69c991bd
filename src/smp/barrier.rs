//! Sense-reversing SMP barrier.
//!
//! Every participant keeps a local [`SmpBarrierState`]. On each wait it
//! flips its local sense and increments the shared arrival counter. The last
//! arriver resets the counter and publishes its sense, which releases every
//! participant still spinning on the shared sense. The control is ready for
//! the next round as soon as the release store happens, so no participant
//! has to reset it.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Padding structure to prevent false sharing.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheLinePadded<T> {
    pub value: T,
}

impl<T> CacheLinePadded<T> {
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

/// Shared state of one barrier.
///
/// Statically initializable; reused for any number of rounds.
#[derive(Debug, Default)]
pub struct SmpBarrierControl {
    value: CacheLinePadded<AtomicU32>,
    sense: CacheLinePadded<AtomicBool>,
}

/// Per-participant barrier state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmpBarrierState {
    sense: bool,
}

impl SmpBarrierState {
    /// Fresh state matching a fresh [`SmpBarrierControl`].
    pub const fn new() -> Self {
        Self { sense: false }
    }

    /// Reset to the initial sense.
    pub fn initialize(&mut self) {
        self.sense = false;
    }
}

impl SmpBarrierControl {
    pub const fn new() -> Self {
        Self {
            value: CacheLinePadded::new(AtomicU32::new(0)),
            sense: CacheLinePadded::new(AtomicBool::new(false)),
        }
    }

    /// Wait until `count` participants arrived.
    ///
    /// Returns `true` for exactly one participant per round, the one that
    /// performed the release.
    pub fn wait(&self, state: &mut SmpBarrierState, count: u32) -> bool {
        debug_assert!(count > 0, "barrier needs at least one participant");

        let sense = !state.sense;
        state.sense = sense;

        let previous = self.value.get().fetch_add(1, Ordering::AcqRel);

        if previous + 1 == count {
            self.value.get().store(0, Ordering::Relaxed);
            self.sense.get().store(sense, Ordering::Release);
            log::trace!("barrier released {} participants", count);
            true
        } else {
            while self.sense.get().load(Ordering::Acquire) != sense {
                core::hint::spin_loop();
            }
            false
        }
    }

    /// Number of participants that arrived in the current round.
    pub fn arrived(&self) -> u32 {
        self.value.get().load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    #[test]
    fn test_single_participant_releases_immediately() {
        let control = SmpBarrierControl::new();
        let mut state = SmpBarrierState::new();
        state.initialize();

        assert!(control.wait(&mut state, 1));
        assert_eq!(control.arrived(), 0);
        // Reusable without reinitialization.
        assert!(control.wait(&mut state, 1));
    }

    #[test]
    fn test_round_trip_all_arrive_before_anyone_leaves() {
        const PARTICIPANTS: usize = 4;
        const ROUNDS: usize = 50;

        let control = Arc::new(SmpBarrierControl::new());
        let arrivals = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PARTICIPANTS)
            .map(|_| {
                let control = Arc::clone(&control);
                let arrivals = Arc::clone(&arrivals);
                let releases = Arc::clone(&releases);
                thread::spawn(move || {
                    let mut state = SmpBarrierState::new();
                    for round in 0..ROUNDS {
                        arrivals.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        if control.wait(&mut state, PARTICIPANTS as u32) {
                            releases.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                        let seen = arrivals.load(std::sync::atomic::Ordering::SeqCst);
                        assert!(seen >= (round + 1) * PARTICIPANTS);
                        // Keep the next round from starting before everyone checked.
                        control.wait(&mut state, PARTICIPANTS as u32);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("barrier participant panicked");
        }

        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), ROUNDS);
        assert_eq!(control.arrived(), 0);
    }

    #[test]
    fn test_static_control() {
        static CONTROL: SmpBarrierControl = SmpBarrierControl::new();
        let mut state = SmpBarrierState::new();
        assert!(CONTROL.wait(&mut state, 1));
    }
}
