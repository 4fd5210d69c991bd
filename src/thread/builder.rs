use alloc::string::String;

use super::ThreadId;
use crate::errors::Result;
use crate::kernel::System;
use crate::priority::PriorityLevel;
use crate::sched::SchedulerId;

/// Default priority level of application threads.
pub const DEFAULT_PRIORITY: PriorityLevel = 128;

/// Attributes of a thread to create.
///
/// ```ignore
/// let id = ThreadAttributes::new()
///     .name("WORK")
///     .priority(5)
///     .scheduler(SchedulerId::new(1))
///     .create(&system)?;
/// ```
#[derive(Debug, Clone)]
pub struct ThreadAttributes {
    pub(crate) name: Option<String>,
    pub(crate) priority: PriorityLevel,
    pub(crate) scheduler: SchedulerId,
    pub(crate) preemptible: bool,
}

impl ThreadAttributes {
    pub fn new() -> Self {
        Self {
            name: None,
            priority: DEFAULT_PRIORITY,
            scheduler: SchedulerId::new(0),
            preemptible: true,
        }
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: PriorityLevel) -> Self {
        self.priority = priority;
        self
    }

    /// Home scheduler instance of the thread.
    pub fn scheduler(mut self, scheduler: SchedulerId) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Only consulted by the uniprocessor scheduler.
    pub fn preemptible(mut self, preemptible: bool) -> Self {
        self.preemptible = preemptible;
        self
    }

    /// Create the thread in the dormant state.
    pub fn create(self, system: &System) -> Result<ThreadId> {
        system.create_thread(self)
    }

    /// Create the thread and make it ready.
    pub fn start(self, system: &System) -> Result<ThreadId> {
        let id = system.create_thread(self)?;
        system.start_thread(id)?;
        Ok(id)
    }
}

impl Default for ThreadAttributes {
    fn default() -> Self {
        Self::new()
    }
}
