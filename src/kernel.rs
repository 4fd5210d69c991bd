//! The system: threads, processors and scheduler instances.
//!
//! [`System`] is the thread layer around the scheduler instances. It owns
//! the thread table, the per-processor controls and the instances, and it
//! turns thread level requests (block, unblock, priority change, thread
//! queue waits) into calls of the home and helping schedulers of a thread.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use portable_atomic::{AtomicUsize, Ordering};

use crate::config::{SchedulerPolicy, SystemConfig};
use crate::errors::{fatal, ConfigError, InternalError, Result, Status, ThreadError};
use crate::percpu::{CpuIndex, PerCpu};
use crate::priority::{Priority, PriorityLevel, DEFAULT_MAXIMUM_PRIORITY};
use crate::sched::{self, NodeState, Scheduler, SchedulerEnv, SchedulerId};
use crate::thread::{
    InheritedPriority, ThreadAttributes, ThreadControl, ThreadId, ThreadSchedulerState, ThreadTable,
};
use crate::threadq::{PriorityAction, QueueContext, ThreadQueue, ThreadQueueQueue, Waiter};
use crate::time::TickCounter;

/// A scheduler instance and its lock.
pub struct SchedulerControl {
    id: SchedulerId,
    name: String,
    policy: SchedulerPolicy,
    maximum_priority: PriorityLevel,
    instance: spin::Mutex<Box<dyn Scheduler>>,
}

impl SchedulerControl {
    pub fn id(&self) -> SchedulerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    pub fn maximum_priority(&self) -> PriorityLevel {
        self.maximum_priority
    }
}

/// Main system handle.
///
/// All operations take `&self`; a `System` can be shared between host
/// threads that act as processors.
pub struct System {
    cpus: Box<[PerCpu]>,
    schedulers: Box<[SchedulerControl]>,
    threads: ThreadTable,
    ticks: TickCounter,
    /// Processor executing the current system call
    current_cpu: AtomicUsize,
}

/// Thread dispatching stays disabled on a processor while this guard lives.
///
/// Dropping the outermost guard dispatches if a dispatch became necessary.
pub struct DispatchDisableGuard<'a> {
    system: &'a System,
    cpu: CpuIndex,
}

impl Drop for DispatchDisableGuard<'_> {
    fn drop(&mut self) {
        if let Some(per_cpu) = self.system.cpus.get(self.cpu.get()) {
            if per_cpu.enable_dispatch() == 0 && per_cpu.is_dispatch_necessary() {
                let _ = self.system.dispatch(self.cpu);
            }
        }
    }
}

impl System {
    /// Create a system from a validated configuration.
    ///
    /// Every processor gets an idle thread. The idle threads of processors
    /// owned by a scheduler are started in that scheduler at its maximum
    /// priority and become heir and executing thread of their processor.
    pub fn new(config: SystemConfig) -> Result<Self> {
        config.validate()?;

        let cpus: Box<[PerCpu]> = (0..config.processor_count)
            .map(|index| PerCpu::new(CpuIndex::new(index)))
            .collect();
        let schedulers: Box<[SchedulerControl]> = config
            .schedulers
            .iter()
            .enumerate()
            .map(|(index, scheduler)| SchedulerControl {
                id: SchedulerId::new(index),
                name: scheduler.name.clone(),
                policy: scheduler.policy,
                maximum_priority: scheduler.maximum_priority,
                instance: spin::Mutex::new(sched::create(scheduler, config.maximum_threads)),
            })
            .collect();

        let system = Self {
            cpus,
            schedulers,
            threads: ThreadTable::new(config.maximum_threads),
            ticks: TickCounter::new(config.ticks_per_second),
            current_cpu: AtomicUsize::new(0),
        };

        for (index, scheduler) in config.schedulers.iter().enumerate() {
            for &cpu in &scheduler.processors {
                system.cpus[cpu.get()].set_scheduler(Some(SchedulerId::new(index)));
            }
        }

        for per_cpu in system.cpus.iter() {
            let cpu = per_cpu.index();
            let scheduler = per_cpu.scheduler();
            let level = match scheduler {
                Some(scheduler) => system.schedulers[scheduler.index()].maximum_priority,
                None => DEFAULT_MAXIMUM_PRIORITY,
            };
            let priority = Priority::from_level(level);

            let idle = system
                .threads
                .allocate(|id| {
                    ThreadControl::new(id, format!("IDLE{}", cpu), true, scheduler, priority, true)
                })
                .ok_or(ConfigError::ThreadTableTooSmall(config.maximum_threads))?;
            {
                let mut info = idle.scheduler_info();
                info.started = true;
                info.state = ThreadSchedulerState::Scheduled;
                info.cpu = Some(cpu);
            }
            per_cpu.set_idle(Some(idle.id()));
            per_cpu.set_heir_and_executing(idle.id());

            if let Some(scheduler) = scheduler {
                system.with_scheduler(scheduler, |instance, env| {
                    instance.node_initialize(env, idle.id(), priority);
                    instance.start_idle(env, idle.id(), cpu);
                });
            }
        }

        log::info!(
            "system: {} processors, {} scheduler instances, {} thread slots",
            system.cpus.len(),
            system.schedulers.len(),
            system.threads.capacity()
        );
        Ok(system)
    }

    /// Run `f` on the locked instance `scheduler`.
    ///
    /// `scheduler` must be a valid identifier.
    pub(crate) fn with_scheduler<R, F>(&self, scheduler: SchedulerId, f: F) -> R
    where
        F: FnOnce(&mut dyn Scheduler, &SchedulerEnv<'_>) -> R,
    {
        let control = &self.schedulers[scheduler.index()];
        let env = SchedulerEnv::new(&self.threads, &self.cpus, self.current_cpu(), scheduler);
        let mut instance = control.instance.lock();
        f(&mut **instance, &env)
    }

    // Accessors

    pub fn processor_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpus(&self) -> &[PerCpu] {
        &self.cpus
    }

    pub fn per_cpu(&self, cpu: CpuIndex) -> Result<&PerCpu> {
        self.cpus
            .get(cpu.get())
            .ok_or_else(|| ThreadError::InvalidCpu(cpu).into())
    }

    pub fn scheduler(&self, scheduler: SchedulerId) -> Result<&SchedulerControl> {
        self.schedulers
            .get(scheduler.index())
            .ok_or_else(|| ThreadError::InvalidScheduler(scheduler).into())
    }

    pub fn schedulers(&self) -> &[SchedulerControl] {
        &self.schedulers
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Result<Arc<ThreadControl>> {
        self.threads
            .get(id)
            .ok_or_else(|| ThreadError::InvalidId(id).into())
    }

    pub fn ticks(&self) -> &TickCounter {
        &self.ticks
    }

    /// Processor on which system calls are executed.
    pub fn current_cpu(&self) -> CpuIndex {
        CpuIndex::new(self.current_cpu.load(Ordering::Acquire))
    }

    /// Select the processor executing the following system calls.
    pub fn set_current_cpu(&self, cpu: CpuIndex) -> Result<()> {
        self.per_cpu(cpu)?;
        self.current_cpu.store(cpu.get(), Ordering::Release);
        Ok(())
    }

    pub fn heir(&self, cpu: CpuIndex) -> Result<Option<ThreadId>> {
        Ok(self.per_cpu(cpu)?.heir())
    }

    pub fn executing(&self, cpu: CpuIndex) -> Result<Option<ThreadId>> {
        Ok(self.per_cpu(cpu)?.executing())
    }

    pub fn thread_state(&self, id: ThreadId) -> Result<ThreadSchedulerState> {
        Ok(self.thread(id)?.state())
    }

    /// Number of processors owned by `scheduler`.
    pub fn scheduler_processor_count(&self, scheduler: SchedulerId) -> Result<usize> {
        self.scheduler(scheduler)?;
        Ok(self.with_scheduler(scheduler, |instance, _| instance.processor_count()))
    }

    /// Owners of the scheduled nodes of `scheduler`, most important first.
    pub fn scheduled(&self, scheduler: SchedulerId) -> Result<Vec<ThreadId>> {
        self.scheduler(scheduler)?;
        Ok(self.with_scheduler(scheduler, |instance, _| instance.scheduled()))
    }

    /// Owners of the ready nodes of `scheduler` in selection order.
    pub fn ready(&self, scheduler: SchedulerId) -> Result<Vec<ThreadId>> {
        self.scheduler(scheduler)?;
        Ok(self.with_scheduler(scheduler, |instance, _| instance.ready()))
    }

    pub fn node_state(&self, scheduler: SchedulerId, thread: ThreadId) -> Result<Option<NodeState>> {
        self.scheduler(scheduler)?;
        Ok(self.with_scheduler(scheduler, |instance, _| instance.node_state(thread)))
    }

    pub fn node_priority(&self, scheduler: SchedulerId, thread: ThreadId) -> Result<Option<Priority>> {
        self.scheduler(scheduler)?;
        Ok(self.with_scheduler(scheduler, |instance, _| instance.node_priority(thread)))
    }

    // Thread management

    /// Create a dormant thread.
    ///
    /// # Arguments
    ///
    /// * `attributes` - Name, priority, home scheduler and preemptibility
    ///
    /// # Returns
    ///
    /// The identifier of the new thread. Its home node is Blocked until the
    /// thread is started.
    pub fn create_thread(&self, attributes: ThreadAttributes) -> Result<ThreadId> {
        let home = attributes.scheduler;
        let control = self.scheduler(home)?;
        if attributes.priority >= control.maximum_priority {
            return Err(ThreadError::InvalidPriority(attributes.priority).into());
        }
        if self.scheduler_processor_count(home)? == 0 {
            return Err(ThreadError::InvalidScheduler(home).into());
        }

        let priority = Priority::from_level(attributes.priority);
        let name = attributes.name;
        let preemptible = attributes.preemptible;
        let thread = self
            .threads
            .allocate(|id| {
                let name = name.unwrap_or_else(|| format!("THREAD{}", id));
                ThreadControl::new(id, name, false, Some(home), priority, preemptible)
            })
            .ok_or(ThreadError::TooManyThreads)?;
        let id = thread.id();

        self.with_scheduler(home, |instance, env| instance.node_initialize(env, id, priority));
        log::debug!(
            "thread {} ({}): created in scheduler {} at priority {}",
            id,
            thread.name(),
            home,
            attributes.priority
        );
        Ok(id)
    }

    /// Make a dormant thread ready.
    pub fn start_thread(&self, id: ThreadId) -> Result<()> {
        let thread = self.application_thread(id)?;
        {
            let mut info = thread.scheduler_info();
            if info.started {
                return Err(ThreadError::AlreadyStarted(id).into());
            }
            info.started = true;
        }
        self.unblock_thread(&thread);
        log::debug!("thread {}: started", id);
        Ok(())
    }

    /// Block a thread.
    ///
    /// Blocking a thread that is already blocked is an internal error and
    /// terminates.
    pub fn block(&self, id: ThreadId) -> Result<()> {
        let thread = self.started_thread(id)?;
        self.block_thread(&thread);
        Ok(())
    }

    /// Unblock a thread blocked by [`System::block`].
    ///
    /// Threads waiting on a thread queue leave it through the queue
    /// operations instead. Unblocking a thread that is not blocked fails
    /// with [`ThreadError::WrongState`].
    pub fn unblock(&self, id: ThreadId) -> Result<()> {
        let thread = self.started_thread(id)?;
        if thread.is_waiting() || thread.state() != ThreadSchedulerState::Blocked {
            log::warn!("thread {}: unblock rejected, not blocked", id);
            return Err(ThreadError::WrongState(id).into());
        }
        self.unblock_thread(&thread);
        Ok(())
    }

    /// Set the real priority; the thread goes behind threads of equal
    /// priority. Returns the previous real priority.
    pub fn set_priority(&self, id: ThreadId, level: PriorityLevel) -> Result<PriorityLevel> {
        self.change_priority(id, level, false)
    }

    /// Set the real priority and place the thread in front of (`prepend`)
    /// or behind threads of equal priority.
    pub fn change_priority(
        &self,
        id: ThreadId,
        level: PriorityLevel,
        prepend: bool,
    ) -> Result<PriorityLevel> {
        let thread = self.application_thread(id)?;
        let home = self.home_of(&thread);
        if level >= self.scheduler(home)?.maximum_priority {
            return Err(ThreadError::InvalidPriority(level).into());
        }

        let previous = {
            let mut info = thread.scheduler_info();
            let previous = info.real_priority.level();
            info.real_priority = Priority::from_level(level);
            previous
        };

        let mut context = QueueContext::new();
        self.update_home_priority(&thread, prepend, true, &mut context);
        self.apply_priority_actions(&mut context);
        log::debug!("thread {}: priority {} -> {}", id, previous, level);
        Ok(previous)
    }

    /// Move a thread behind all threads of equal priority.
    pub fn yield_thread(&self, id: ThreadId) -> Result<()> {
        let thread = self.started_thread(id)?;
        let home = self.home_of(&thread);
        self.with_scheduler(home, |instance, env| instance.yield_now(env, id));
        Ok(())
    }

    /// Delete a thread.
    ///
    /// A waiting thread leaves its thread queue, a ready or scheduled thread
    /// is blocked first. Queues owned by the thread keep their waiters.
    pub fn delete_thread(&self, id: ThreadId) -> Result<()> {
        let thread = self.application_thread(id)?;

        self.extract_thread(&thread, None, false);
        if thread.state() != ThreadSchedulerState::Blocked {
            self.block_thread(&thread);
        }

        let (home, helping) = {
            let mut info = thread.scheduler_info();
            info.inherited.clear();
            (info.home, core::mem::take(&mut info.helping))
        };
        for scheduler in helping {
            self.with_scheduler(scheduler, |instance, env| instance.node_destroy(env, id));
        }
        if let Some(home) = home {
            self.with_scheduler(home, |instance, env| instance.node_destroy(env, id));
        }

        for per_cpu in self.cpus.iter() {
            if per_cpu.executing() == Some(id) {
                self.dispatch(per_cpu.index())?;
            }
        }

        self.threads.free(id);
        log::debug!("thread {}: deleted", id);
        Ok(())
    }

    fn application_thread(&self, id: ThreadId) -> Result<Arc<ThreadControl>> {
        let thread = self.thread(id)?;
        if thread.is_idle() {
            return Err(ThreadError::IdleThread(id).into());
        }
        Ok(thread)
    }

    fn started_thread(&self, id: ThreadId) -> Result<Arc<ThreadControl>> {
        let thread = self.application_thread(id)?;
        if !thread.scheduler_info().started {
            return Err(ThreadError::WrongState(id).into());
        }
        Ok(thread)
    }

    fn home_of(&self, thread: &ThreadControl) -> SchedulerId {
        thread
            .home_scheduler()
            .unwrap_or_else(|| fatal(InternalError::NodeMissing(thread.id())))
    }

    pub(crate) fn block_thread(&self, thread: &ThreadControl) {
        let id = thread.id();
        let home = self.home_of(thread);
        let helping = thread.helping_schedulers();

        self.with_scheduler(home, |instance, env| instance.block(env, id));
        for scheduler in helping {
            self.with_scheduler(scheduler, |instance, env| {
                instance.withdraw_node(env, id, ThreadSchedulerState::Blocked)
            });
        }
        log::trace!("thread {}: blocked", id);
    }

    pub(crate) fn unblock_thread(&self, thread: &ThreadControl) {
        let id = thread.id();
        let home = self.home_of(thread);
        self.with_scheduler(home, |instance, env| instance.unblock(env, id));
        log::trace!("thread {}: unblocked", id);
    }

    /// Ask the home and then the helping schedulers for a processor.
    fn thread_ask_for_help(&self, thread: &ThreadControl) -> bool {
        let id = thread.id();
        let (home, helping) = {
            let info = thread.scheduler_info();
            (info.home, info.helping.clone())
        };

        home.into_iter()
            .chain(helping)
            .any(|scheduler| self.with_scheduler(scheduler, |instance, env| instance.ask_for_help(env, id)))
    }

    // Priorities and inheritance

    /// Recompute the home priority of `thread` and pass it to its home
    /// scheduler. A waiting thread is re-sorted in its thread queue, which
    /// may add inheritance actions to `context`.
    fn update_home_priority(
        &self,
        thread: &ThreadControl,
        prepend: bool,
        force: bool,
        context: &mut QueueContext,
    ) {
        let id = thread.id();
        let (home, priority, changed) = {
            let mut info = thread.scheduler_info();
            let home = match info.home {
                Some(home) => home,
                None => return,
            };
            let priority = info.effective_priority();
            let changed = priority != info.current_priority;
            if !changed && !force {
                return;
            }
            info.current_priority = priority;
            (home, priority, changed)
        };

        self.with_scheduler(home, |instance, env| {
            instance.update_priority(env, id, priority, prepend)
        });

        if changed {
            self.requeue_waiter(thread, home, priority, context);
        }
    }

    fn requeue_waiter(
        &self,
        thread: &ThreadControl,
        scheduler: SchedulerId,
        priority: Priority,
        context: &mut QueueContext,
    ) {
        let queue = thread.wait_info().queue.clone();
        if let Some(queue) = queue {
            let mut guard = queue.lock();
            if guard.contains(thread.id()) {
                let waiter = Waiter {
                    thread: thread.id(),
                    scheduler,
                    priority,
                };
                queue.operations().priority_actions(&mut guard, waiter, context);
            }
        }
    }

    /// Carry out the inheritance changes collected by queue operations.
    ///
    /// A change may re-sort the owner in a queue it waits on and so produce
    /// further changes down the ownership chain.
    pub(crate) fn apply_priority_actions(&self, context: &mut QueueContext) {
        let mut pending = context.take_priority_actions();
        let mut depth = 0;

        while let Some(first) = pending.first() {
            depth += 1;
            if depth > self.threads.capacity() + 1 {
                fatal(InternalError::InheritanceLoop(first.owner));
            }

            let mut next = QueueContext::new();
            for action in pending {
                self.apply_inheritance(action, &mut next);
            }
            pending = next.take_priority_actions();
        }
    }

    fn apply_inheritance(&self, action: PriorityAction, context: &mut QueueContext) {
        let owner = match self.threads.get(action.owner) {
            Some(owner) => owner,
            None => return,
        };

        let home = {
            let mut info = owner.scheduler_info();
            info.inherited.retain(|inherited| {
                inherited.queue != action.queue || inherited.scheduler != action.scheduler
            });
            if let Some(priority) = action.priority {
                info.inherited.push(InheritedPriority {
                    queue: action.queue,
                    scheduler: action.scheduler,
                    priority,
                });
            }
            info.home
        };

        if home == Some(action.scheduler) {
            self.update_home_priority(&owner, false, false, context);
        } else {
            self.update_helping_node(&owner, action.scheduler);
        }
    }

    /// Create, update or remove the helping node of `thread` in `scheduler`
    /// according to the priority it inherits there.
    fn update_helping_node(&self, thread: &ThreadControl, scheduler: SchedulerId) {
        let id = thread.id();
        let (wanted, has_node, state) = {
            let info = thread.scheduler_info();
            (
                info.inherited_priority(scheduler),
                info.helping.contains(&scheduler),
                info.state,
            )
        };

        match (wanted, has_node) {
            (Some(priority), false) => {
                thread.scheduler_info().helping.push(scheduler);
                self.with_scheduler(scheduler, |instance, env| {
                    instance.node_initialize(env, id, priority);
                    instance.ask_for_help(env, id);
                });
                log::debug!("thread {}: helping node in scheduler {}", id, scheduler);
            }
            (Some(priority), true) => {
                self.with_scheduler(scheduler, |instance, env| {
                    instance.update_priority(env, id, priority, false)
                });
            }
            (None, true) => {
                let next_state = match state {
                    ThreadSchedulerState::Blocked => ThreadSchedulerState::Blocked,
                    _ => ThreadSchedulerState::Ready,
                };
                self.with_scheduler(scheduler, |instance, env| {
                    instance.withdraw_node(env, id, next_state);
                    instance.node_destroy(env, id);
                });
                thread.scheduler_info().helping.retain(|&helping| helping != scheduler);
                log::debug!("thread {}: helping node in scheduler {} removed", id, scheduler);

                if thread.state() == ThreadSchedulerState::Ready {
                    self.thread_ask_for_help(thread);
                }
            }
            (None, false) => {}
        }
    }

    // Thread dispatching

    /// Disable thread dispatching on the current processor.
    pub fn dispatch_disable(&self) -> DispatchDisableGuard<'_> {
        let cpu = self.current_cpu();
        if let Some(per_cpu) = self.cpus.get(cpu.get()) {
            per_cpu.disable_dispatch();
        }
        DispatchDisableGuard { system: self, cpu }
    }

    /// Perform a thread dispatch on `cpu`.
    ///
    /// Pending help requests of the processor are served first. Then the
    /// heir becomes the executing thread, repeated until no further
    /// dispatch is necessary.
    ///
    /// # Returns
    ///
    /// The executing thread after the dispatch.
    pub fn dispatch(&self, cpu: CpuIndex) -> Result<Option<ThreadId>> {
        let per_cpu = self.per_cpu(cpu)?;
        if per_cpu.dispatch_disable_level() > 0 {
            return Ok(per_cpu.executing());
        }

        loop {
            self.preemption_intervention(per_cpu);
            if !per_cpu.take_dispatch_necessary() {
                break;
            }

            let (previous, executing) = per_cpu.switch_to_heir();
            if previous != executing {
                log::debug!("cpu {}: switch {:?} -> {:?}", cpu, previous, executing);
                if let Some(executing) = executing.and_then(|id| self.threads.get(id)) {
                    self.reconsider_help_requests(&executing);
                }
            }
        }

        Ok(per_cpu.executing())
    }

    /// Dispatch every processor until no dispatch is pending.
    pub fn dispatch_all(&self) -> Vec<Option<ThreadId>> {
        for _ in 0..=self.cpus.len() {
            for per_cpu in self.cpus.iter() {
                let _ = self.dispatch(per_cpu.index());
            }
            if !self.cpus.iter().any(PerCpu::is_dispatch_necessary) {
                break;
            }
        }
        self.cpus.iter().map(PerCpu::executing).collect()
    }

    fn preemption_intervention(&self, per_cpu: &PerCpu) {
        while let Some(id) = per_cpu.pop_help_request() {
            let thread = match self.threads.get(id) {
                Some(thread) => thread,
                None => continue,
            };
            {
                let mut info = thread.scheduler_info();
                if info.ask_for_help_cpu == Some(per_cpu.index()) {
                    info.ask_for_help_cpu = None;
                }
            }
            self.thread_ask_for_help(&thread);
        }
    }

    fn reconsider_help_requests(&self, thread: &ThreadControl) {
        let id = thread.id();
        let (home, helping) = {
            let info = thread.scheduler_info();
            (info.home, info.helping.clone())
        };
        if helping.is_empty() {
            return;
        }
        for scheduler in home.into_iter().chain(helping) {
            self.with_scheduler(scheduler, |instance, env| {
                instance.reconsider_help_request(env, id)
            });
        }
    }

    /// Uniprocessor heir update on the current processor.
    ///
    /// The heir only changes if the current heir is preemptible or
    /// `force_dispatch` is set.
    pub fn update_heir(&self, heir: ThreadId, force_dispatch: bool) -> Result<bool> {
        self.thread(heir)?;
        let cpu = self.current_cpu();
        let scheduler = self.per_cpu(cpu)?.scheduler().unwrap_or(SchedulerId::new(0));
        let env = SchedulerEnv::new(&self.threads, &self.cpus, cpu, scheduler);
        Ok(env.update_heir(cpu, heir, force_dispatch))
    }

    // Processor management

    /// Hand an unowned processor to `scheduler`.
    pub fn add_processor(&self, scheduler: SchedulerId, cpu: CpuIndex) -> Result<()> {
        let control = self.scheduler(scheduler)?;
        let per_cpu = self.per_cpu(cpu)?;
        if per_cpu.scheduler().is_some() {
            return Err(ThreadError::ProcessorInUse(cpu).into());
        }
        let count = self.scheduler_processor_count(scheduler)?;
        if let Some(limit) = control.policy.processor_limit() {
            if count >= limit {
                return Err(ConfigError::TooManyProcessors {
                    scheduler,
                    count: count + 1,
                }
                .into());
            }
        }

        let idle = per_cpu.idle().ok_or(ThreadError::InvalidCpu(cpu))?;
        let priority = Priority::from_level(control.maximum_priority);
        {
            let thread = self.thread(idle)?;
            let mut info = thread.scheduler_info();
            info.home = Some(scheduler);
            info.real_priority = priority;
            info.current_priority = priority;
            info.cpu = Some(cpu);
        }

        per_cpu.set_scheduler(Some(scheduler));
        self.with_scheduler(scheduler, |instance, env| {
            instance.node_initialize(env, idle, priority);
            instance.add_processor(env, idle);
        });
        log::info!("scheduler {}: added cpu {}", scheduler, cpu);
        Ok(())
    }

    /// Take `cpu` away from `scheduler`; the processor keeps an idle thread.
    pub fn remove_processor(&self, scheduler: SchedulerId, cpu: CpuIndex) -> Result<()> {
        self.scheduler(scheduler)?;
        let per_cpu = self.per_cpu(cpu)?;
        if per_cpu.scheduler() != Some(scheduler) {
            return Err(ThreadError::ProcessorNotOwned(cpu).into());
        }
        if self.scheduler_processor_count(scheduler)? <= 1 {
            return Err(ThreadError::LastProcessor(scheduler).into());
        }

        per_cpu.set_scheduler(None);
        let idle = self.with_scheduler(scheduler, |instance, env| instance.remove_processor(env, cpu));
        if let Some(thread) = self.threads.get(idle) {
            thread.scheduler_info().home = None;
        }

        // Idle threads are not bound to processors; keep one per processor.
        let previous = per_cpu.idle();
        if previous != Some(idle) {
            for other in self.cpus.iter().filter(|other| other.idle() == Some(idle)) {
                other.set_idle(previous);
            }
        }
        per_cpu.set_idle(Some(idle));
        log::info!("scheduler {}: removed cpu {}", scheduler, cpu);
        Ok(())
    }

    // Thread queues

    /// Enqueue `thread` on `queue` and block it.
    pub fn enqueue(&self, queue: &Arc<ThreadQueue>, thread: ThreadId, timeout: Option<u64>) -> Result<()> {
        let guard = queue.lock();
        self.enqueue_critical(queue, guard, thread, timeout)
    }

    /// Enqueue with the queue lock already held.
    ///
    /// # Arguments
    ///
    /// * `queue` - Queue to wait on
    /// * `guard` - Lock of `queue`, released once the thread is blocked
    /// * `thread` - Thread that waits; it must not be blocked
    /// * `timeout` - Watchdog interval in clock ticks, `None` waits forever
    pub fn enqueue_critical(
        &self,
        queue: &Arc<ThreadQueue>,
        mut guard: spin::MutexGuard<'_, ThreadQueueQueue>,
        thread: ThreadId,
        timeout: Option<u64>,
    ) -> Result<()> {
        let control = self.started_thread(thread)?;
        let waiter = {
            let info = control.scheduler_info();
            if info.state == ThreadSchedulerState::Blocked {
                return Err(ThreadError::WrongState(thread).into());
            }
            let scheduler = info
                .home
                .unwrap_or_else(|| fatal(InternalError::NodeMissing(thread)));
            Waiter {
                thread,
                scheduler,
                priority: info.current_priority,
            }
        };

        {
            let mut wait = control.wait_info();
            if wait.queue.is_some() {
                return Err(ThreadError::WrongState(thread).into());
            }
            wait.return_code = Status::Successful;
            wait.queue = Some(queue.clone());
            wait.deadline = timeout.map(|interval| self.ticks.deadline_after(interval));
        }

        let mut context = QueueContext::new();
        queue.operations().enqueue(&mut guard, waiter, &mut context);
        log::trace!("thread {}: waits on {}", thread, queue.name());

        // Block before a surrender on another processor can see the waiter.
        self.block_thread(&control);
        drop(guard);
        self.apply_priority_actions(&mut context);
        Ok(())
    }

    /// Extract a waiting thread from its queue and unblock it.
    ///
    /// Returns `false` if the thread was not waiting.
    pub fn extract(&self, thread: ThreadId) -> Result<bool> {
        let control = self.thread(thread)?;
        Ok(self.extract_thread(&control, None, true))
    }

    pub(crate) fn extract_thread(
        &self,
        thread: &ThreadControl,
        status: Option<Status>,
        unblock: bool,
    ) -> bool {
        let queue = match thread.wait_info().queue.clone() {
            Some(queue) => queue,
            None => return false,
        };

        let mut guard = queue.lock();
        if !guard.contains(thread.id()) {
            return false;
        }
        let mut context = QueueContext::new();
        queue.operations().extract(&mut guard, thread.id(), &mut context);
        {
            let mut wait = thread.wait_info();
            wait.queue = None;
            wait.deadline = None;
            if let Some(status) = status {
                wait.return_code = status;
            }
        }
        drop(guard);

        if unblock {
            self.unblock_thread(thread);
        }
        self.apply_priority_actions(&mut context);
        true
    }

    /// Hand the object protected by `queue` to the next waiter.
    pub fn surrender(&self, queue: &ThreadQueue, previous_owner: Option<ThreadId>) -> Option<ThreadId> {
        let guard = queue.lock();
        self.surrender_critical(queue, guard, previous_owner)
    }

    /// Surrender with the queue lock already held.
    pub fn surrender_critical(
        &self,
        queue: &ThreadQueue,
        mut guard: spin::MutexGuard<'_, ThreadQueueQueue>,
        previous_owner: Option<ThreadId>,
    ) -> Option<ThreadId> {
        let mut context = QueueContext::new();
        let next = queue
            .operations()
            .surrender(&mut guard, previous_owner, &mut context);
        let thread = next.and_then(|id| self.threads.get(id));
        if let Some(thread) = &thread {
            let mut wait = thread.wait_info();
            wait.queue = None;
            wait.deadline = None;
        }
        drop(guard);

        self.apply_priority_actions(&mut context);
        if let Some(thread) = &thread {
            self.unblock_thread(thread);
            log::trace!("thread {}: obtains {}", thread.id(), queue.name());
        }
        next
    }

    /// Announce a clock tick and fire expired watchdogs.
    ///
    /// Returns the number of threads whose wait timed out.
    pub fn clock_tick(&self) -> usize {
        let now = self.ticks.increment();
        let expired: Vec<Arc<ThreadControl>> = self
            .threads
            .threads()
            .into_iter()
            .filter(|thread| {
                thread
                    .wait_info()
                    .deadline
                    .map_or(false, |deadline| deadline.is_expired(now))
            })
            .collect();

        let mut count = 0;
        for thread in &expired {
            if self.extract_thread(thread, Some(Status::Timeout), true) {
                log::debug!("thread {}: wait timed out", thread.id());
                count += 1;
            }
        }
        count
    }

    // Consistency

    /// Check the invariants of every scheduler instance and of the heirs.
    pub fn verify(&self) -> core::result::Result<(), &'static str> {
        for control in self.schedulers.iter() {
            let instance = control.instance.lock();
            instance.verify()?;

            let mut scheduled = instance.scheduled();
            let mut heirs: Vec<ThreadId> = self
                .cpus
                .iter()
                .filter(|per_cpu| per_cpu.scheduler() == Some(control.id))
                .filter_map(PerCpu::heir)
                .collect();
            scheduled.sort();
            heirs.sort();
            if scheduled != heirs {
                return Err("heirs differ from scheduled nodes");
            }

            for id in scheduled {
                let thread = self.threads.get(id).ok_or("scheduled thread does not exist")?;
                let info = thread.scheduler_info();
                if info.state != ThreadSchedulerState::Scheduled {
                    return Err("heir thread is not scheduled");
                }
                let on_owned_cpu = info
                    .cpu
                    .and_then(|cpu| self.cpus.get(cpu.get()))
                    .map_or(false, |per_cpu| per_cpu.heir() == Some(id));
                if !on_owned_cpu {
                    return Err("scheduled thread is not the heir of its processor");
                }
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for System {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("System")
            .field("cpus", &self.cpus)
            .field("schedulers", &self.schedulers.len())
            .field("threads", &self.threads.len())
            .finish()
    }
}
