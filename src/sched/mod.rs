//! Scheduler implementations.
//!
//! A system runs one or more scheduler instances, each owning a set of
//! processors. Every instance implements [`Scheduler`]; the SMP core in
//! [`smp`] carries the processor allocation logic for instances that own
//! several processors, [`simple`] is the uniprocessor policy.

pub mod env;
pub mod node;
pub mod priority_smp;
pub mod simple;
pub mod smp;
pub mod trait_def;

pub use env::SchedulerEnv;
pub use priority_smp::{PriorityReadyQueues, PrioritySmpScheduler};
pub use simple::SimpleScheduler;
pub use smp::{SmpNode, SmpReadyQueue, SmpScheduler};
pub use trait_def::{NodeState, Scheduler, SchedulerId};

use alloc::boxed::Box;

use crate::config::{SchedulerConfig, SchedulerPolicy};

/// Create the instance described by `config` for a thread table of
/// `capacity` entries.
pub fn create(config: &SchedulerConfig, capacity: usize) -> Box<dyn Scheduler> {
    match config.policy {
        SchedulerPolicy::PrioritySmp => {
            Box::new(PrioritySmpScheduler::new(config.maximum_priority, capacity))
        }
        SchedulerPolicy::Simple => Box::new(SimpleScheduler::new(config.maximum_priority, capacity)),
    }
}
