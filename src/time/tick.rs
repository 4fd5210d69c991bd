//! Tick counting and watchdog deadlines.

use portable_atomic::{AtomicU64, Ordering};

/// Monotonic clock tick counter.
///
/// Incremented once per clock tick; all watchdog deadlines are absolute
/// tick values of this counter.
pub struct TickCounter {
    /// Number of ticks since system start
    ticks: AtomicU64,
    /// Tick frequency in Hz
    frequency: u32,
}

impl TickCounter {
    /// Create a new tick counter with the given frequency.
    pub const fn new(frequency: u32) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency,
        }
    }

    /// Advance the counter by one tick and return the new tick count.
    pub fn increment(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Get the current tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Get the tick frequency in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Convert milliseconds to ticks, rounding up.
    pub fn millis_to_ticks(&self, millis: u64) -> u64 {
        let scaled = millis.saturating_mul(u64::from(self.frequency));
        scaled / 1000 + u64::from(scaled % 1000 != 0)
    }

    /// Deadline `interval` ticks from now.
    ///
    /// An interval of zero still waits for the next tick.
    pub fn deadline_after(&self, interval: u64) -> Deadline {
        Deadline(self.ticks().saturating_add(interval.max(1)))
    }
}

/// Absolute watchdog expiry in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u64);

impl Deadline {
    pub const fn at(tick: u64) -> Self {
        Self(tick)
    }

    pub const fn tick(self) -> u64 {
        self.0
    }

    /// Whether the watchdog has fired at tick count `now`.
    pub fn is_expired(self, now: u64) -> bool {
        now >= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        let counter = TickCounter::new(100);
        let deadline = counter.deadline_after(2);
        assert_eq!(deadline.tick(), 2);
        assert!(!deadline.is_expired(counter.increment()));
        assert!(deadline.is_expired(counter.increment()));
        assert_eq!(counter.frequency(), 100);
    }

    #[test]
    fn test_millis_round_up_to_ticks() {
        let counter = TickCounter::new(100);
        assert_eq!(counter.millis_to_ticks(0), 0);
        assert_eq!(counter.millis_to_ticks(10), 1);
        assert_eq!(counter.millis_to_ticks(11), 2);
        assert_eq!(TickCounter::new(1000).millis_to_ticks(250), 250);
    }

    #[test]
    fn test_zero_interval_waits_one_tick() {
        let counter = TickCounter::new(1000);
        let deadline = counter.deadline_after(0);
        assert!(!deadline.is_expired(counter.ticks()));
        assert!(deadline.is_expired(counter.increment()));
    }
}
