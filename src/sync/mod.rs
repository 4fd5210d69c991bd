//! Object managers built on thread queues.
//!
//! Obtaining an unavailable object enqueues the calling thread and blocks
//! it. The thread learns the outcome of the wait from its wait return code
//! once it is unblocked again.

pub mod mutex;
pub mod semaphore;

pub use mutex::InheritanceMutex;
pub use semaphore::{Semaphore, SemaphoreDiscipline};

use crate::time::TickCounter;

/// How long an obtain operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Fail with [`Status::Unsatisfied`](crate::errors::Status::Unsatisfied)
    /// instead of waiting
    NoWait,
    Forever,
    /// Clock ticks until the wait ends with a timeout status
    Ticks(u64),
    /// Milliseconds, converted with the configured tick frequency
    Millis(u64),
}

impl Timeout {
    pub(crate) fn interval(self, ticks: &TickCounter) -> Option<u64> {
        match self {
            Timeout::Ticks(interval) => Some(interval),
            Timeout::Millis(millis) => Some(ticks.millis_to_ticks(millis)),
            Timeout::NoWait | Timeout::Forever => None,
        }
    }
}

/// Result of an obtain operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obtained {
    /// The object was available
    Acquired,
    /// The thread waits on the object's thread queue
    Waiting,
}
