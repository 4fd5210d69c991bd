#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

//! SMP scheduler core with thread queues.
//!
//! This library models the scheduling core of a real-time kernel running on
//! several processors: scheduler instances that own processors and decide
//! which thread runs where, thread queues that order waiting threads, and
//! the synchronization primitives layered on top of them.
//!
//! # Features
//!
//! - Generic SMP scheduler state machine with a constant time priority
//!   ready queue (`PrioritySmpScheduler`)
//! - Uniprocessor priority scheduler with non-preemptible threads
//!   (`SimpleScheduler`)
//! - Several scheduler instances partitioning the processors, with helping
//!   nodes so a mutex owner can run on the processors of its waiters
//! - FIFO, priority and priority inheritance thread queues with batched flush
//! - Sense-reversing SMP barrier
//!
//! # Quick Start
//!
//! ```ignore
//! use smp_score::{SystemConfig, System, ThreadAttributes, Semaphore, SemaphoreDiscipline, Timeout};
//!
//! let system = System::new(SystemConfig::single_scheduler(4))?;
//! let worker = ThreadAttributes::new().name("WORK").priority(10).start(&system)?;
//!
//! let sem = Semaphore::new("SEM", 0, SemaphoreDiscipline::Priority);
//! sem.obtain(&system, worker, Timeout::Forever)?;
//! sem.release(&system);
//! system.dispatch_all();
//! ```
//!
//! # Architecture
//!
//! - [`System`] owns the per-processor controls, the thread table and the
//!   scheduler instances and is the entry point of every operation
//! - [`sched`] holds the scheduler implementations behind the
//!   [`Scheduler`] trait
//! - [`threadq`] holds thread queues and their disciplines
//! - [`sync`] builds semaphores and mutexes from thread queues
//!
//! Heir selection is decoupled from context switching: schedulers only
//! update the heir of a processor, [`System::dispatch`] makes it the
//! executing thread.

extern crate alloc;

// Core modules
pub mod chain;
pub mod config;
pub mod errors;
pub mod kernel;
pub mod percpu;
pub mod priority;
pub mod sched;
pub mod smp;
pub mod sync;
pub mod thread;
pub mod threadq;
pub mod time;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// System
pub use config::{SchedulerConfig, SchedulerPolicy, SystemConfig};
pub use kernel::{DispatchDisableGuard, SchedulerControl, System};
pub use percpu::{CpuIndex, PerCpu};

// Scheduler
pub use priority::{Priority, PriorityLevel};
pub use sched::{NodeState, PrioritySmpScheduler, Scheduler, SchedulerId, SimpleScheduler};

// Threads
pub use thread::{ThreadAttributes, ThreadControl, ThreadId, ThreadSchedulerState};

// Thread queues and objects
pub use sync::{InheritanceMutex, Obtained, Semaphore, SemaphoreDiscipline, Timeout};
pub use threadq::{QueueContext, ThreadQueue, ThreadQueueOperations};

// SMP
pub use smp::{SmpBarrierControl, SmpBarrierState};

// Errors
pub use errors::{ConfigError, Error, Result, Status, ThreadError};
