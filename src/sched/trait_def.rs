//! Scheduler trait definition.

use alloc::vec::Vec;
use core::fmt;

use super::SchedulerEnv;
use crate::config::SchedulerPolicy;
use crate::percpu::CpuIndex;
use crate::priority::{Priority, PriorityLevel};
use crate::thread::{ThreadId, ThreadSchedulerState};

/// Index of a scheduler instance in the system's scheduler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulerId(usize);

impl SchedulerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a scheduler node inside its scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Neither scheduled nor ready; the node owns no processor
    Blocked,
    /// The node owns a processor
    Scheduled,
    /// The node waits in the ready set for a processor
    Ready,
}

/// Operations of a scheduler instance.
///
/// Every thread has one node in its home scheduler and may have helping
/// nodes in further instances. A node is addressed by the identifier of its
/// owner thread. All operations run with the instance lock held; the
/// [`SchedulerEnv`] gives access to threads and processors.
///
/// Operations whose preconditions are violated terminate through
/// [`fatal`](crate::errors::fatal) rather than returning an error.
pub trait Scheduler: Send {
    fn policy(&self) -> SchedulerPolicy;

    /// Lowest priority level, used by the idle threads.
    fn maximum_priority(&self) -> PriorityLevel;

    /// Number of processors owned by this instance.
    fn processor_count(&self) -> usize;

    /// Create the node of `thread` in the Blocked state.
    fn node_initialize(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId, priority: Priority);

    /// Remove the node of `thread`. The node must be Blocked.
    fn node_destroy(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId);

    /// Take a thread out of scheduling.
    ///
    /// If the node owned a processor, the processor goes to the most
    /// important ready node whose owner can use it.
    fn block(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId);

    /// Make a blocked thread eligible again.
    fn unblock(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId);

    /// Change the priority of the node of `thread`.
    ///
    /// `prepend` places the node in front of nodes of equal priority,
    /// otherwise behind them.
    fn update_priority(
        &mut self,
        env: &SchedulerEnv<'_>,
        thread: ThreadId,
        priority: Priority,
        prepend: bool,
    );

    /// Move the node of `thread` behind all nodes of equal priority.
    fn yield_now(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId);

    /// Try to obtain a processor for a ready thread through its node here.
    ///
    /// Returns `true` if the thread got a processor and no further instance
    /// needs to be asked.
    fn ask_for_help(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) -> bool;

    /// Drop a stale ready node of a thread that got a processor elsewhere.
    fn reconsider_help_request(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId);

    /// Withdraw the node of `thread`; a scheduled thread changes to `next_state`.
    fn withdraw_node(
        &mut self,
        env: &SchedulerEnv<'_>,
        thread: ThreadId,
        next_state: ThreadSchedulerState,
    );

    /// Place an idle thread on a processor during system start.
    fn start_idle(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId, cpu: CpuIndex);

    /// Take over a processor whose idle thread is `idle`.
    fn add_processor(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId);

    /// Give up `cpu`; returns the idle thread left running on it.
    fn remove_processor(&mut self, env: &SchedulerEnv<'_>, cpu: CpuIndex) -> ThreadId;

    fn node_state(&self, thread: ThreadId) -> Option<NodeState>;

    fn node_priority(&self, thread: ThreadId) -> Option<Priority>;

    /// Owners of the scheduled nodes, most important first.
    fn scheduled(&self) -> Vec<ThreadId>;

    /// Owners of the ready nodes in selection order.
    fn ready(&self) -> Vec<ThreadId>;

    /// Check the structural invariants of the instance.
    fn verify(&self) -> Result<(), &'static str> {
        Ok(())
    }
}
