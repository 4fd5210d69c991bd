//! Test helper utilities and common functionality.

use alloc::vec::Vec;

use crate::config::{SchedulerConfig, SystemConfig};
use crate::kernel::System;
use crate::percpu::CpuIndex;
use crate::priority::PriorityLevel;
use crate::sched::SchedulerId;
use crate::thread::{ThreadAttributes, ThreadId};

/// One priority SMP instance owning `cpus` processors.
pub(crate) fn priority_system(cpus: usize) -> System {
    System::new(SystemConfig::single_scheduler(cpus)).unwrap()
}

/// One simple scheduler on a single processor.
pub(crate) fn simple_system() -> System {
    let config = SystemConfig::new(1).scheduler(SchedulerConfig::simple("UNI").processor(0));
    System::new(config).unwrap()
}

/// Instance A owns processors 0 and 1, instance B owns processor 2.
pub(crate) fn partitioned_system() -> System {
    let config = SystemConfig::new(3)
        .scheduler(SchedulerConfig::priority_smp("A").processors([0, 1]))
        .scheduler(SchedulerConfig::priority_smp("B").processor(2));
    System::new(config).unwrap()
}

pub(crate) fn cpu(index: usize) -> CpuIndex {
    CpuIndex::new(index)
}

pub(crate) fn start(system: &System, priority: PriorityLevel) -> ThreadId {
    start_in(system, SchedulerId::new(0), priority)
}

pub(crate) fn start_in(system: &System, scheduler: SchedulerId, priority: PriorityLevel) -> ThreadId {
    ThreadAttributes::new()
        .priority(priority)
        .scheduler(scheduler)
        .start(system)
        .unwrap()
}

/// Ready threads of `scheduler` without the idle threads.
pub(crate) fn ready_threads(system: &System, scheduler: SchedulerId) -> Vec<ThreadId> {
    system
        .ready(scheduler)
        .unwrap()
        .into_iter()
        .filter(|&id| !system.thread(id).unwrap().is_idle())
        .collect()
}

pub(crate) fn heirs(system: &System) -> Vec<Option<ThreadId>> {
    system.cpus().iter().map(|per_cpu| per_cpu.heir()).collect()
}

pub(crate) fn assert_consistent(system: &System) {
    if let Err(error) = system.verify() {
        panic!("inconsistent system: {}\n{:#?}", error, system);
    }
}
