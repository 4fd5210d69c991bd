//! What a scheduler instance may touch outside of its own data.

use alloc::sync::Arc;

use super::SchedulerId;
use crate::errors::{fatal, InternalError};
use crate::percpu::{CpuIndex, PerCpu};
use crate::priority::Priority;
use crate::thread::{ThreadControl, ThreadId, ThreadSchedulerInfo, ThreadTable};

/// Environment of a scheduler operation.
///
/// Built by the system for each call into a scheduler instance.
pub struct SchedulerEnv<'a> {
    threads: &'a ThreadTable,
    cpus: &'a [PerCpu],
    cpu_self: CpuIndex,
    scheduler: SchedulerId,
}

impl<'a> SchedulerEnv<'a> {
    pub fn new(
        threads: &'a ThreadTable,
        cpus: &'a [PerCpu],
        cpu_self: CpuIndex,
        scheduler: SchedulerId,
    ) -> Self {
        Self {
            threads,
            cpus,
            cpu_self,
            scheduler,
        }
    }

    /// Instance the operation runs on.
    pub fn scheduler(&self) -> SchedulerId {
        self.scheduler
    }

    /// Processor executing the operation.
    pub fn cpu_self(&self) -> CpuIndex {
        self.cpu_self
    }

    pub fn thread(&self, id: ThreadId) -> Arc<ThreadControl> {
        self.threads
            .get(id)
            .unwrap_or_else(|| fatal(InternalError::ThreadMissing(id)))
    }

    pub fn cpu(&self, index: CpuIndex) -> &'a PerCpu {
        self.cpus
            .get(index.get())
            .unwrap_or_else(|| fatal(InternalError::ProcessorNotOwned(index)))
    }

    pub fn is_processor_owned(&self, index: CpuIndex) -> bool {
        self.cpu(index).scheduler() == Some(self.scheduler)
    }

    pub fn is_executing_on(&self, thread: ThreadId, index: CpuIndex) -> bool {
        self.cpu(index).executing() == Some(thread)
    }

    /// Make `heir` the heir of `cpu` and request a dispatch there.
    pub fn dispatch_update_heir(&self, cpu: CpuIndex, heir: ThreadId) {
        if self.cpu(cpu).update_heir(heir) {
            log::trace!("cpu {}: heir {}", cpu, heir);
        }
    }

    /// Heir update of a uniprocessor instance.
    ///
    /// The heir only changes if the current heir is preemptible or
    /// `force_dispatch` is set. Returns whether the heir changed.
    pub fn update_heir(&self, cpu: CpuIndex, new_heir: ThreadId, force_dispatch: bool) -> bool {
        let per_cpu = self.cpu(cpu);
        let heir = match per_cpu.heir() {
            Some(heir) => heir,
            None => {
                per_cpu.update_heir(new_heir);
                return true;
            }
        };
        if heir == new_heir {
            return false;
        }
        if force_dispatch || self.thread(heir).is_preemptible() {
            self.dispatch_update_heir(cpu, new_heir);
            true
        } else {
            false
        }
    }

    /// Queue a help request for `thread` on the executing processor.
    ///
    /// The caller holds the thread lock and passes the locked information.
    pub fn request_ask_for_help(&self, thread: ThreadId, info: &mut ThreadSchedulerInfo) {
        if info.ask_for_help_cpu.is_some() {
            return;
        }
        info.ask_for_help_cpu = Some(self.cpu_self);
        self.cpu(self.cpu_self).push_help_request(thread);
        log::trace!("thread {}: asks for help on cpu {}", thread, self.cpu_self);
    }

    /// Withdraw a pending help request of `thread`.
    pub fn cancel_ask_for_help(&self, thread: ThreadId, info: &mut ThreadSchedulerInfo) {
        if let Some(cpu) = info.ask_for_help_cpu.take() {
            self.cpu(cpu).remove_help_request(thread);
        }
    }

    /// Priority of `thread` as seen by the thread layer.
    pub fn thread_priority(&self, thread: ThreadId) -> Priority {
        self.thread(thread).current_priority()
    }
}
