//! Thread control blocks and the thread table.
//!
//! A thread is seen by the scheduler core only through its scheduler state,
//! the processor it is assigned to, its priorities and its wait information.
//! Everything else a kernel keeps per thread (stacks, registers, ...) is out
//! of scope.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroUsize;

use crate::errors::Status;
use crate::percpu::CpuIndex;
use crate::priority::Priority;
use crate::sched::SchedulerId;
use crate::threadq::{QueueId, ThreadQueue};
use crate::time::Deadline;

pub mod builder;

pub use builder::ThreadAttributes;

/// Thread identifier.
///
/// Identifiers map one-to-one onto slots of the [`ThreadTable`]; a slot
/// freed by thread deletion hands its identifier to the next thread created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroUsize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ThreadId {
    /// Identifier of the thread table slot `index`.
    pub fn from_index(index: usize) -> Self {
        Self(NonZeroUsize::new(index.wrapping_add(1)).unwrap_or(NonZeroUsize::MIN))
    }

    /// Get the raw ID value.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Slot of the thread in the table. Scheduler nodes use the same index.
    pub fn index(self) -> usize {
        self.0.get() - 1
    }
}

/// Scheduler state of a thread.
///
/// This is the thread's view. Each of its scheduler nodes carries a node
/// state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSchedulerState {
    /// Not eligible to run
    Blocked,
    /// Eligible to run, but not assigned to a processor
    Ready,
    /// Assigned to a processor through one of its nodes
    Scheduled,
}

/// Priority a thread inherits from the waiters of a queue it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritedPriority {
    pub queue: QueueId,
    pub scheduler: SchedulerId,
    pub priority: Priority,
}

/// Scheduler related part of a thread control block.
#[derive(Debug)]
pub struct ThreadSchedulerInfo {
    pub state: ThreadSchedulerState,
    /// Processor the thread is assigned to or last ran on
    pub cpu: Option<CpuIndex>,
    /// `None` only for idle threads parked on a processor no scheduler owns
    pub home: Option<SchedulerId>,
    /// Priority set by the application
    pub real_priority: Priority,
    /// Priority of the home node: the real priority or an inherited one
    pub current_priority: Priority,
    /// Schedulers in which the thread has a helping node
    pub helping: Vec<SchedulerId>,
    /// Processor whose help list holds this thread
    pub ask_for_help_cpu: Option<CpuIndex>,
    pub preemptible: bool,
    pub started: bool,
    pub inherited: Vec<InheritedPriority>,
}

impl ThreadSchedulerInfo {
    /// Highest priority inherited in `scheduler`.
    pub fn inherited_priority(&self, scheduler: SchedulerId) -> Option<Priority> {
        self.inherited
            .iter()
            .filter(|inherited| inherited.scheduler == scheduler)
            .map(|inherited| inherited.priority)
            .min()
    }

    /// Home node priority derived from the real priority and inheritance.
    pub fn effective_priority(&self) -> Priority {
        let inherited = self.home.and_then(|home| self.inherited_priority(home));
        match inherited {
            Some(priority) if priority < self.real_priority => priority,
            _ => self.real_priority,
        }
    }

    pub fn has_helping_nodes(&self) -> bool {
        !self.helping.is_empty()
    }
}

/// Wait information of a thread.
#[derive(Debug)]
pub struct WaitInfo {
    pub return_code: Status,
    /// Queue the thread is enqueued on
    pub queue: Option<Arc<ThreadQueue>>,
    /// Watchdog expiry in ticks
    pub deadline: Option<Deadline>,
}

impl WaitInfo {
    const fn new() -> Self {
        Self {
            return_code: Status::Successful,
            queue: None,
            deadline: None,
        }
    }
}

/// Thread control block.
pub struct ThreadControl {
    id: ThreadId,
    name: String,
    is_idle: bool,
    scheduler: spin::Mutex<ThreadSchedulerInfo>,
    wait: spin::Mutex<WaitInfo>,
}

impl ThreadControl {
    pub(crate) fn new(
        id: ThreadId,
        name: String,
        is_idle: bool,
        home: Option<SchedulerId>,
        priority: Priority,
        preemptible: bool,
    ) -> Self {
        let priority = priority.purify();
        Self {
            id,
            name,
            is_idle,
            scheduler: spin::Mutex::new(ThreadSchedulerInfo {
                state: ThreadSchedulerState::Blocked,
                cpu: None,
                home,
                real_priority: priority,
                current_priority: priority,
                helping: Vec::new(),
                ask_for_help_cpu: None,
                preemptible,
                started: false,
                inherited: Vec::new(),
            }),
            wait: spin::Mutex::new(WaitInfo::new()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    /// Lock the scheduler information.
    ///
    /// Lock order: scheduler instance, then thread, then processor.
    pub fn scheduler_info(&self) -> spin::MutexGuard<'_, ThreadSchedulerInfo> {
        self.scheduler.lock()
    }

    /// Lock the wait information.
    ///
    /// Taken after the lock of the queue the thread waits on.
    pub fn wait_info(&self) -> spin::MutexGuard<'_, WaitInfo> {
        self.wait.lock()
    }

    pub fn state(&self) -> ThreadSchedulerState {
        self.scheduler.lock().state
    }

    pub fn cpu(&self) -> Option<CpuIndex> {
        self.scheduler.lock().cpu
    }

    pub(crate) fn set_cpu(&self, cpu: CpuIndex) {
        self.scheduler.lock().cpu = Some(cpu);
    }

    pub fn home_scheduler(&self) -> Option<SchedulerId> {
        self.scheduler.lock().home
    }

    pub fn real_priority(&self) -> Priority {
        self.scheduler.lock().real_priority
    }

    pub fn current_priority(&self) -> Priority {
        self.scheduler.lock().current_priority
    }

    pub fn is_preemptible(&self) -> bool {
        self.scheduler.lock().preemptible
    }

    pub fn helping_schedulers(&self) -> Vec<SchedulerId> {
        self.scheduler.lock().helping.clone()
    }

    pub fn wait_return_code(&self) -> Status {
        self.wait.lock().return_code
    }

    pub fn set_wait_return_code(&self, status: Status) {
        self.wait.lock().return_code = status;
    }

    /// Whether the thread is enqueued on a thread queue.
    pub fn is_waiting(&self) -> bool {
        self.wait.lock().queue.is_some()
    }
}

impl fmt::Debug for ThreadControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControl")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_idle", &self.is_idle)
            .finish()
    }
}

/// Fixed capacity table of thread control blocks.
pub struct ThreadTable {
    slots: Box<[spin::Mutex<Option<Arc<ThreadControl>>>]>,
}

impl ThreadTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| spin::Mutex::new(None)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Place a new thread into the first free slot.
    pub fn allocate<F>(&self, make: F) -> Option<Arc<ThreadControl>>
    where
        F: FnOnce(ThreadId) -> ThreadControl,
    {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.is_none() {
                let thread = Arc::new(make(ThreadId::from_index(index)));
                *slot = Some(thread.clone());
                return Some(thread);
            }
        }
        None
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<ThreadControl>> {
        self.slots.get(id.index())?.lock().clone()
    }

    pub fn free(&self, id: ThreadId) -> Option<Arc<ThreadControl>> {
        self.slots.get(id.index())?.lock().take()
    }

    /// Snapshot of all live threads in identifier order.
    pub fn threads(&self) -> Vec<Arc<ThreadControl>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.lock().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use alloc::string::ToString;

    fn make(id: ThreadId) -> ThreadControl {
        ThreadControl::new(
            id,
            "TEST".to_string(),
            false,
            Some(SchedulerId::new(0)),
            Priority::from_level(10),
            true,
        )
    }

    #[test]
    fn test_thread_id_index_round_trip() {
        let id = ThreadId::from_index(4);
        assert_eq!(id.get(), 5);
        assert_eq!(id.index(), 4);
        assert_eq!(id.to_string(), "5");
    }

    #[test]
    fn test_table_reuses_freed_slots() {
        let table = ThreadTable::new(2);
        let a = table.allocate(make).unwrap();
        let b = table.allocate(make).unwrap();
        assert!(table.allocate(make).is_none());
        assert_eq!(table.len(), 2);

        table.free(a.id()).unwrap();
        let c = table.allocate(make).unwrap();
        assert_eq!(c.id(), a.id());
        assert_ne!(c.id(), b.id());
        assert!(table.get(ThreadId::from_index(9)).is_none());
    }

    #[test]
    fn test_effective_priority_takes_home_inheritance_only() {
        let table = ThreadTable::new(1);
        let thread = table.allocate(make).unwrap();
        let mut info = thread.scheduler_info();
        assert_eq!(info.effective_priority(), Priority::from_level(10));

        info.inherited.push(InheritedPriority {
            queue: QueueId::from_raw(1),
            scheduler: SchedulerId::new(1),
            priority: Priority::from_level(2),
        });
        assert_eq!(info.effective_priority(), Priority::from_level(10));

        info.inherited.push(InheritedPriority {
            queue: QueueId::from_raw(2),
            scheduler: SchedulerId::new(0),
            priority: Priority::from_level(4),
        });
        assert_eq!(info.effective_priority(), Priority::from_level(4));
        assert_eq!(info.inherited_priority(SchedulerId::new(1)), Some(Priority::from_level(2)));
    }
}
