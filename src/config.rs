//! System and scheduler configuration.
//!
//! A system is configured once at start-up: the number of processors, the
//! size of the thread table and the scheduler instances with the processors
//! each of them owns. [`SystemConfig::validate`] rejects configurations the
//! core cannot run.

use alloc::string::String;
use alloc::vec::Vec;

use crate::errors::ConfigError;
use crate::percpu::CpuIndex;
use crate::priority::{PriorityBitmap, PriorityLevel, DEFAULT_MAXIMUM_PRIORITY};
use crate::sched::SchedulerId;
use crate::time::DEFAULT_TICKS_PER_SECOND;

/// Default number of thread control blocks.
pub const DEFAULT_MAXIMUM_THREADS: usize = 64;

/// Scheduling policy of a scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
    /// Fixed priority, one ready chain per level, any number of processors
    PrioritySmp,
    /// Fixed priority, single sorted ready chain, exactly one processor
    Simple,
}

impl SchedulerPolicy {
    pub fn name(self) -> &'static str {
        match self {
            SchedulerPolicy::PrioritySmp => "priority-smp",
            SchedulerPolicy::Simple => "simple",
        }
    }

    /// Most processors an instance of this policy can own.
    pub fn processor_limit(self) -> Option<usize> {
        match self {
            SchedulerPolicy::PrioritySmp => None,
            SchedulerPolicy::Simple => Some(1),
        }
    }
}

/// Configuration of one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub name: String,
    pub policy: SchedulerPolicy,
    /// Lowest priority level; reserved for the idle threads
    pub maximum_priority: PriorityLevel,
    /// Processors owned at start-up
    pub processors: Vec<CpuIndex>,
}

impl SchedulerConfig {
    pub fn new<T: Into<String>>(name: T, policy: SchedulerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            maximum_priority: DEFAULT_MAXIMUM_PRIORITY,
            processors: Vec::new(),
        }
    }

    pub fn priority_smp<T: Into<String>>(name: T) -> Self {
        Self::new(name, SchedulerPolicy::PrioritySmp)
    }

    pub fn simple<T: Into<String>>(name: T) -> Self {
        Self::new(name, SchedulerPolicy::Simple)
    }

    pub fn maximum_priority(mut self, maximum_priority: PriorityLevel) -> Self {
        self.maximum_priority = maximum_priority;
        self
    }

    pub fn processor(mut self, cpu: usize) -> Self {
        self.processors.push(CpuIndex::new(cpu));
        self
    }

    pub fn processors<I: IntoIterator<Item = usize>>(mut self, cpus: I) -> Self {
        self.processors.extend(cpus.into_iter().map(CpuIndex::new));
        self
    }
}

/// System configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub processor_count: usize,
    pub maximum_threads: usize,
    pub ticks_per_second: u32,
    pub schedulers: Vec<SchedulerConfig>,
}

impl SystemConfig {
    pub fn new(processor_count: usize) -> Self {
        Self {
            processor_count,
            maximum_threads: DEFAULT_MAXIMUM_THREADS,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            schedulers: Vec::new(),
        }
    }

    /// One priority SMP scheduler owning every processor.
    pub fn single_scheduler(processor_count: usize) -> Self {
        Self::new(processor_count)
            .scheduler(SchedulerConfig::priority_smp("PRIO").processors(0..processor_count))
    }

    pub fn maximum_threads(mut self, maximum_threads: usize) -> Self {
        self.maximum_threads = maximum_threads;
        self
    }

    pub fn ticks_per_second(mut self, ticks_per_second: u32) -> Self {
        self.ticks_per_second = ticks_per_second;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.schedulers.push(scheduler);
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor_count == 0 {
            return Err(ConfigError::NoProcessors);
        }
        if self.schedulers.is_empty() {
            return Err(ConfigError::NoSchedulers);
        }
        if self.ticks_per_second == 0 {
            return Err(ConfigError::InvalidTickFrequency);
        }
        // Every processor runs an idle thread, owned or not.
        if self.maximum_threads <= self.processor_count {
            return Err(ConfigError::ThreadTableTooSmall(self.maximum_threads));
        }

        let mut owned = alloc::vec![false; self.processor_count];
        for (index, scheduler) in self.schedulers.iter().enumerate() {
            let maximum = scheduler.maximum_priority as usize;
            if maximum == 0 || maximum >= PriorityBitmap::LEVELS {
                return Err(ConfigError::InvalidMaximumPriority(scheduler.maximum_priority));
            }

            if let Some(limit) = scheduler.policy.processor_limit() {
                if scheduler.processors.len() > limit {
                    return Err(ConfigError::TooManyProcessors {
                        scheduler: SchedulerId::new(index),
                        count: scheduler.processors.len(),
                    });
                }
            }

            for &cpu in &scheduler.processors {
                let slot = owned
                    .get_mut(cpu.get())
                    .ok_or(ConfigError::InvalidProcessor(cpu))?;
                if *slot {
                    return Err(ConfigError::ProcessorAssignedTwice(cpu));
                }
                *slot = true;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_scheduler_is_valid() {
        let config = SystemConfig::single_scheduler(4);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.schedulers[0].processors.len(), 4);
    }

    #[test]
    fn test_rejects_bad_processor_assignments() {
        let config = SystemConfig::new(2)
            .scheduler(SchedulerConfig::priority_smp("A").processors([0, 1]))
            .scheduler(SchedulerConfig::priority_smp("B").processor(1));
        assert_eq!(
            config.validate(),
            Err(ConfigError::ProcessorAssignedTwice(CpuIndex::new(1)))
        );

        let config = SystemConfig::new(2).scheduler(SchedulerConfig::priority_smp("A").processor(2));
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidProcessor(CpuIndex::new(2)))
        );
    }

    #[test]
    fn test_simple_policy_owns_one_processor() {
        let config = SystemConfig::new(2).scheduler(SchedulerConfig::simple("UNI").processors([0, 1]));
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyProcessors {
                scheduler: SchedulerId::new(0),
                count: 2
            })
        );
    }

    #[test]
    fn test_rejects_degenerate_values() {
        assert_eq!(SystemConfig::new(0).validate(), Err(ConfigError::NoProcessors));
        assert_eq!(SystemConfig::new(1).validate(), Err(ConfigError::NoSchedulers));
        assert_eq!(
            SystemConfig::single_scheduler(2).maximum_threads(2).validate(),
            Err(ConfigError::ThreadTableTooSmall(2))
        );
        assert_eq!(
            SystemConfig::single_scheduler(1).ticks_per_second(0).validate(),
            Err(ConfigError::InvalidTickFrequency)
        );

        let config = SystemConfig::new(1)
            .scheduler(SchedulerConfig::priority_smp("A").maximum_priority(256).processor(0));
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaximumPriority(256)));
    }
}
