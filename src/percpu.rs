//! Per-processor control.
//!
//! Each processor has a heir (the thread it should run next), the thread it
//! is executing, a dispatch-necessary flag and the list of threads that
//! asked for help on it. Schedulers only ever change the heir and raise the
//! flag; [`System::dispatch`](crate::kernel::System::dispatch) makes the heir
//! the executing thread.

use alloc::collections::VecDeque;
use core::fmt;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::sched::SchedulerId;
use crate::thread::ThreadId;

/// Processor index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuIndex(usize);

impl CpuIndex {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for CpuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a processor protected by its lock.
#[derive(Debug, Default)]
struct PerCpuState {
    scheduler: Option<SchedulerId>,
    heir: Option<ThreadId>,
    executing: Option<ThreadId>,
    idle: Option<ThreadId>,
    threads_in_need_for_help: VecDeque<ThreadId>,
}

/// Control block of one processor.
pub struct PerCpu {
    index: CpuIndex,
    dispatch_necessary: AtomicBool,
    dispatch_disable_level: AtomicU32,
    state: spin::Mutex<PerCpuState>,
}

impl PerCpu {
    pub fn new(index: CpuIndex) -> Self {
        Self {
            index,
            dispatch_necessary: AtomicBool::new(false),
            dispatch_disable_level: AtomicU32::new(0),
            state: spin::Mutex::new(PerCpuState::default()),
        }
    }

    pub fn index(&self) -> CpuIndex {
        self.index
    }

    /// Scheduler instance owning this processor, if any.
    pub fn scheduler(&self) -> Option<SchedulerId> {
        self.state.lock().scheduler
    }

    pub fn set_scheduler(&self, scheduler: Option<SchedulerId>) {
        self.state.lock().scheduler = scheduler;
    }

    pub fn heir(&self) -> Option<ThreadId> {
        self.state.lock().heir
    }

    pub fn executing(&self) -> Option<ThreadId> {
        self.state.lock().executing
    }

    /// Idle thread currently bound to this processor.
    pub fn idle(&self) -> Option<ThreadId> {
        self.state.lock().idle
    }

    pub fn set_idle(&self, idle: Option<ThreadId>) {
        self.state.lock().idle = idle;
    }

    /// Set the heir and raise the dispatch-necessary flag.
    ///
    /// Returns `false` if `heir` already was the heir.
    pub fn update_heir(&self, heir: ThreadId) -> bool {
        let mut state = self.state.lock();
        if state.heir == Some(heir) {
            return false;
        }
        state.heir = Some(heir);
        drop(state);
        self.dispatch_necessary.store(true, Ordering::Release);
        true
    }

    /// Bring-up: make `thread` both heir and executing.
    pub fn set_heir_and_executing(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        state.heir = Some(thread);
        state.executing = Some(thread);
    }

    /// Make the heir the executing thread; returns `(previous, new)`.
    pub(crate) fn switch_to_heir(&self) -> (Option<ThreadId>, Option<ThreadId>) {
        let mut state = self.state.lock();
        let previous = state.executing;
        state.executing = state.heir;
        (previous, state.executing)
    }

    pub fn is_dispatch_necessary(&self) -> bool {
        self.dispatch_necessary.load(Ordering::Acquire)
    }

    pub fn set_dispatch_necessary(&self) {
        self.dispatch_necessary.store(true, Ordering::Release);
    }

    pub(crate) fn take_dispatch_necessary(&self) -> bool {
        self.dispatch_necessary.swap(false, Ordering::AcqRel)
    }

    pub fn dispatch_disable_level(&self) -> u32 {
        self.dispatch_disable_level.load(Ordering::Acquire)
    }

    pub(crate) fn disable_dispatch(&self) -> u32 {
        self.dispatch_disable_level.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn enable_dispatch(&self) -> u32 {
        let previous = self.dispatch_disable_level.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unbalanced thread dispatch enable");
        previous - 1
    }

    /// Queue a help request of `thread` on this processor.
    pub(crate) fn push_help_request(&self, thread: ThreadId) {
        self.state.lock().threads_in_need_for_help.push_back(thread);
        self.dispatch_necessary.store(true, Ordering::Release);
    }

    pub(crate) fn remove_help_request(&self, thread: ThreadId) {
        self.state
            .lock()
            .threads_in_need_for_help
            .retain(|&waiting| waiting != thread);
    }

    pub(crate) fn pop_help_request(&self) -> Option<ThreadId> {
        self.state.lock().threads_in_need_for_help.pop_front()
    }

    /// Threads currently waiting for help on this processor.
    pub fn help_requests(&self) -> alloc::vec::Vec<ThreadId> {
        self.state.lock().threads_in_need_for_help.iter().copied().collect()
    }
}

impl fmt::Debug for PerCpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PerCpu")
            .field("index", &self.index)
            .field("scheduler", &state.scheduler)
            .field("heir", &state.heir)
            .field("executing", &state.executing)
            .field("dispatch_necessary", &self.is_dispatch_necessary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_heir_raises_dispatch_flag() {
        let cpu = PerCpu::new(CpuIndex::new(0));
        let a = ThreadId::from_index(0);
        let b = ThreadId::from_index(1);

        cpu.set_heir_and_executing(a);
        assert!(!cpu.is_dispatch_necessary());
        assert!(!cpu.update_heir(a));

        assert!(cpu.update_heir(b));
        assert!(cpu.is_dispatch_necessary());
        assert_eq!(cpu.executing(), Some(a));

        assert!(cpu.take_dispatch_necessary());
        assert_eq!(cpu.switch_to_heir(), (Some(a), Some(b)));
        assert!(!cpu.is_dispatch_necessary());
    }

    #[test]
    fn test_help_requests_fifo() {
        let cpu = PerCpu::new(CpuIndex::new(1));
        let a = ThreadId::from_index(3);
        let b = ThreadId::from_index(4);

        cpu.push_help_request(a);
        cpu.push_help_request(b);
        assert_eq!(cpu.help_requests(), alloc::vec![a, b]);

        cpu.remove_help_request(a);
        assert_eq!(cpu.pop_help_request(), Some(b));
        assert_eq!(cpu.pop_help_request(), None);
    }

    #[test]
    fn test_dispatch_disable_nesting() {
        let cpu = PerCpu::new(CpuIndex::new(0));
        assert_eq!(cpu.disable_dispatch(), 1);
        assert_eq!(cpu.disable_dispatch(), 2);
        assert_eq!(cpu.enable_dispatch(), 1);
        assert_eq!(cpu.enable_dispatch(), 0);
    }
}
