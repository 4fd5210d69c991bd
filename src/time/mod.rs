//! Watchdog time base.
//!
//! Thread queue waits may carry a timeout in clock ticks. The tick counter
//! is advanced by [`System::clock_tick`](crate::kernel::System::clock_tick),
//! which then fires every expired watchdog.

pub mod tick;

pub use tick::{Deadline, TickCounter};

/// Default clock tick frequency in Hz.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 1000;
