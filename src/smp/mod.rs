//! Cross-processor synchronization primitives.

pub mod barrier;

pub use barrier::{CacheLinePadded, SmpBarrierControl, SmpBarrierState};
