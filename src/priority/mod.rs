//! Scheduler priority encoding.
//!
//! Priority levels follow the real-time convention: a lower number is more
//! important, level 0 is the pseudo-ISR priority. Inside the schedulers a
//! level is carried as a [`Priority`], which maps the level to an even value
//! and uses the lowest bit as the *append* flag of insert operations. An
//! insert priority with the flag set sorts behind nodes of the same level,
//! one without it sorts in front of them.

pub mod bitmap;

pub use bitmap::PriorityBitmap;

/// User visible priority level (0 = most important).
pub type PriorityLevel = u32;

/// Default maximum priority level of a scheduler instance.
pub const DEFAULT_MAXIMUM_PRIORITY: PriorityLevel = 255;

/// Encoded scheduler priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u64);

impl Priority {
    /// Priority of interrupt level work; never preempted.
    pub const PSEUDO_ISR: Priority = Priority(0);

    const APPEND_FLAG: u64 = 1;

    /// Map a priority level to its scheduler encoding.
    pub const fn from_level(level: PriorityLevel) -> Self {
        Priority((level as u64) << 1)
    }

    /// The priority level this value encodes.
    pub const fn level(self) -> PriorityLevel {
        (self.0 >> 1) as PriorityLevel
    }

    /// Clear the append flag.
    pub const fn purify(self) -> Self {
        Priority(self.0 & !Self::APPEND_FLAG)
    }

    /// Set the append flag.
    pub const fn append(self) -> Self {
        Priority(self.0 | Self::APPEND_FLAG)
    }

    pub const fn is_append(self) -> bool {
        self.0 & Self::APPEND_FLAG != 0
    }

    /// Insert priority for an enqueue operation.
    pub const fn for_insert(self, prepend: bool) -> Self {
        if prepend {
            self.purify()
        } else {
            self.append()
        }
    }

    /// Raw encoded value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_append() {
            write!(f, "{}+", self.level())
        } else {
            write!(f, "{}", self.level())
        }
    }
}

/// Insert order shared by the schedulers: `insert_priority <= node_priority`.
///
/// With the append flag set this is a strict "more important than" test on
/// levels, without it equal levels also qualify.
#[inline]
pub fn priority_less_equal(insert_priority: Priority, node_priority: Priority) -> bool {
    insert_priority <= node_priority
}
