//! Generic SMP scheduler core.
//!
//! An SMP instance owning `n` processors keeps exactly `n` nodes in its
//! Scheduled chain, ordered by priority, and every other eligible node in a
//! ready set whose organisation is left to a [`SmpReadyQueue`]. All
//! decisions (who gets a processor, who is preempted, who has to ask other
//! instances for help) are taken here; the ready queue only stores nodes.
//!
//! A node can only take a processor if its owner thread is Ready. A node
//! whose owner is Blocked or already Scheduled through another instance is
//! set Blocked and skipped, see [`SmpScheduler::try_to_schedule`].

use alloc::vec::Vec;

use super::node::{Linked, NodeArena};
use super::trait_def::{NodeState, Scheduler};
use super::SchedulerEnv;
use crate::chain::{Chain, ChainLinks, NodeIndex};
use crate::config::SchedulerPolicy;
use crate::errors::{fatal, InternalError};
use crate::percpu::CpuIndex;
use crate::priority::{priority_less_equal, Priority, PriorityLevel};
use crate::thread::{ThreadId, ThreadSchedulerState};

/// Scheduler node of an SMP instance.
#[derive(Debug)]
pub struct SmpNode {
    links: ChainLinks,
    owner: ThreadId,
    state: NodeState,
    /// Cached priority, without the append flag
    priority: Priority,
    /// Slot of the node in the ready queue structure
    ready_queue: usize,
}

impl SmpNode {
    fn new(owner: ThreadId, priority: Priority) -> Self {
        Self {
            links: ChainLinks::off_chain(),
            owner,
            state: NodeState::Blocked,
            priority: priority.purify(),
            ready_queue: 0,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ready_queue(&self) -> usize {
        self.ready_queue
    }

    /// Change the cached priority and the ready slot.
    pub fn set_priority(&mut self, priority: Priority, ready_queue: usize) {
        self.priority = priority.purify();
        self.ready_queue = ready_queue;
    }
}

impl Linked for SmpNode {
    fn links(&self) -> &ChainLinks {
        &self.links
    }

    fn links_mut(&mut self) -> &mut ChainLinks {
        &mut self.links
    }
}

/// Ready set of an SMP instance.
pub trait SmpReadyQueue: Send {
    fn has_ready(&self) -> bool;

    /// Most important ready node.
    fn highest_ready(&self, nodes: &NodeArena<SmpNode>) -> Option<NodeIndex>;

    /// Insert `node`; with the append flag of `insert_priority` set it goes
    /// behind nodes of equal priority, otherwise in front of them.
    fn insert_ready(
        &mut self,
        nodes: &mut NodeArena<SmpNode>,
        node: NodeIndex,
        insert_priority: Priority,
    );

    fn extract_from_ready(&mut self, nodes: &mut NodeArena<SmpNode>, node: NodeIndex);

    /// Update the node priority. The node is in no ready chain.
    fn update_priority(&mut self, nodes: &mut NodeArena<SmpNode>, node: NodeIndex, priority: Priority);

    /// Extract and return a ready idle node.
    fn get_idle(&mut self, nodes: &mut NodeArena<SmpNode>) -> Option<NodeIndex>;

    /// Ready nodes in selection order.
    fn ready_nodes(&self, nodes: &NodeArena<SmpNode>) -> Vec<NodeIndex>;

    /// Scheduled node to preempt first.
    fn lowest_scheduled(
        &self,
        nodes: &NodeArena<SmpNode>,
        scheduled: &Chain,
        env: &SchedulerEnv<'_>,
    ) -> NodeIndex {
        let _ = (nodes, env);
        scheduled
            .last()
            .unwrap_or_else(|| fatal(InternalError::NoScheduledNode))
    }
}

/// Outcome of [`SmpScheduler::try_to_schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    DoSchedule,
    DoNotSchedule,
}

/// SMP scheduler instance over a ready queue `Q`.
pub struct SmpScheduler<Q> {
    policy: SchedulerPolicy,
    maximum_priority: PriorityLevel,
    processor_count: usize,
    scheduled: Chain,
    nodes: NodeArena<SmpNode>,
    ready: Q,
}

impl<Q: SmpReadyQueue> SmpScheduler<Q> {
    pub fn with_ready_queue(
        policy: SchedulerPolicy,
        maximum_priority: PriorityLevel,
        capacity: usize,
        ready: Q,
    ) -> Self {
        Self {
            policy,
            maximum_priority,
            processor_count: 0,
            scheduled: Chain::new(),
            nodes: NodeArena::with_capacity(capacity),
            ready,
        }
    }

    pub fn nodes(&self) -> &NodeArena<SmpNode> {
        &self.nodes
    }

    fn owner(&self, node: NodeIndex) -> ThreadId {
        self.nodes.node(node).owner
    }

    fn priority_of(&self, node: NodeIndex) -> Priority {
        self.nodes.node(node).priority
    }

    fn state_of(&self, node: NodeIndex) -> NodeState {
        self.nodes.node(node).state
    }

    fn change_state(&mut self, node: NodeIndex, state: NodeState) {
        self.nodes.node_mut(node).state = state;
    }

    fn node_index(&self, thread: ThreadId) -> NodeIndex {
        if !self.nodes.contains(thread) {
            fatal(InternalError::NodeMissing(thread));
        }
        thread.index()
    }

    fn insert_scheduled(&mut self, node: NodeIndex, insert_priority: Priority) {
        self.scheduled.insert_ordered(&mut self.nodes, node, |nodes, next| {
            priority_less_equal(insert_priority, nodes.node(next).priority)
        });
    }

    fn extract_from_scheduled(&mut self, node: NodeIndex) {
        self.scheduled.extract(&mut self.nodes, node);
    }

    /// Demoted nodes go in front of their priority group.
    fn move_from_scheduled_to_ready(&mut self, node: NodeIndex) {
        self.extract_from_scheduled(node);
        let insert_priority = self.priority_of(node);
        self.ready.insert_ready(&mut self.nodes, node, insert_priority);
    }

    fn move_from_ready_to_scheduled(&mut self, node: NodeIndex) {
        self.ready.extract_from_ready(&mut self.nodes, node);
        let insert_priority = self.priority_of(node).append();
        self.insert_scheduled(node, insert_priority);
    }

    fn lowest_scheduled(&self, env: &SchedulerEnv<'_>) -> NodeIndex {
        self.ready.lowest_scheduled(&self.nodes, &self.scheduled, env)
    }

    /// Decide whether `node` may take a processor.
    ///
    /// Only a Ready owner can be scheduled. Any other node is set Blocked so
    /// that the callers skip it.
    fn try_to_schedule(&mut self, env: &SchedulerEnv<'_>, node: NodeIndex) -> Action {
        let owner = self.owner(node);
        let thread = env.thread(owner);
        let mut info = thread.scheduler_info();

        if info.state == ThreadSchedulerState::Ready {
            env.cancel_ask_for_help(owner, &mut info);
            info.state = ThreadSchedulerState::Scheduled;
            Action::DoSchedule
        } else {
            drop(info);
            self.change_state(node, NodeState::Blocked);
            Action::DoNotSchedule
        }
    }

    fn allocate_processor(&mut self, env: &SchedulerEnv<'_>, node: NodeIndex, cpu: CpuIndex) {
        self.change_state(node, NodeState::Scheduled);
        allocate_processor_lazy(env, self.owner(node), cpu);
    }

    /// Give the processor of `victim` to `scheduled`.
    ///
    /// A victim owner with helping nodes is asked to look for a processor
    /// elsewhere.
    fn preempt(
        &mut self,
        env: &SchedulerEnv<'_>,
        scheduled: NodeIndex,
        victim: NodeIndex,
        exact: bool,
    ) {
        self.change_state(victim, NodeState::Ready);

        let victim_owner = self.owner(victim);
        let victim_thread = env.thread(victim_owner);
        let cpu = {
            let mut info = victim_thread.scheduler_info();
            if info.state == ThreadSchedulerState::Scheduled {
                info.state = ThreadSchedulerState::Ready;
                if info.has_helping_nodes() {
                    env.request_ask_for_help(victim_owner, &mut info);
                }
            }
            info.cpu
                .unwrap_or_else(|| fatal(InternalError::NoScheduledNode))
        };

        self.change_state(scheduled, NodeState::Scheduled);
        let owner = self.owner(scheduled);
        if exact {
            allocate_processor_exact(env, owner, cpu);
        } else {
            allocate_processor_lazy(env, owner, cpu);
        }

        log::trace!(
            "scheduler {}: thread {} preempts thread {} on cpu {}",
            env.scheduler(),
            owner,
            victim_owner,
            cpu
        );
    }

    /// Place `node` with `insert_priority` into the scheduled or ready set.
    ///
    /// Returns `true` if the node ended up ready, that is its owner still
    /// needs a processor.
    fn enqueue(&mut self, env: &SchedulerEnv<'_>, node: NodeIndex, insert_priority: Priority) -> bool {
        let lowest = self.lowest_scheduled(env);

        if priority_less_equal(insert_priority, self.priority_of(lowest)) {
            self.enqueue_to_scheduled(env, node, insert_priority, lowest);
            false
        } else {
            self.change_state(node, NodeState::Ready);
            self.ready.insert_ready(&mut self.nodes, node, insert_priority);
            true
        }
    }

    fn enqueue_to_scheduled(
        &mut self,
        env: &SchedulerEnv<'_>,
        node: NodeIndex,
        insert_priority: Priority,
        lowest: NodeIndex,
    ) {
        match self.try_to_schedule(env, node) {
            Action::DoSchedule => {
                self.preempt(env, node, lowest, false);
                self.move_from_scheduled_to_ready(lowest);
                self.insert_scheduled(node, insert_priority);
            }
            Action::DoNotSchedule => {}
        }
    }

    /// Re-place a node that was extracted from the Scheduled chain.
    ///
    /// The node keeps its processor unless a more important ready node can
    /// use it.
    fn enqueue_scheduled(&mut self, env: &SchedulerEnv<'_>, node: NodeIndex, insert_priority: Priority) {
        loop {
            let highest = match self.ready.highest_ready(&self.nodes) {
                Some(highest) => highest,
                None => {
                    self.insert_scheduled(node, insert_priority);
                    return;
                }
            };

            if priority_less_equal(insert_priority, self.priority_of(highest)) {
                self.insert_scheduled(node, insert_priority);
                return;
            }

            match self.try_to_schedule(env, highest) {
                Action::DoSchedule => {
                    self.preempt(env, highest, node, false);
                    self.move_from_ready_to_scheduled(highest);
                    self.ready.insert_ready(&mut self.nodes, node, insert_priority);
                    return;
                }
                Action::DoNotSchedule => {
                    self.ready.extract_from_ready(&mut self.nodes, highest);
                }
            }
        }
    }

    /// Hand the processor of `victim` to the most important usable ready
    /// node. The victim is set Blocked.
    fn schedule_highest_ready(&mut self, env: &SchedulerEnv<'_>, victim: NodeIndex, cpu: CpuIndex) {
        self.change_state(victim, NodeState::Blocked);
        self.extract_from_scheduled(victim);

        loop {
            let highest = self
                .ready
                .highest_ready(&self.nodes)
                .unwrap_or_else(|| fatal(InternalError::NoReadyNode));

            match self.try_to_schedule(env, highest) {
                Action::DoSchedule => {
                    self.allocate_processor(env, highest, cpu);
                    self.move_from_ready_to_scheduled(highest);
                    return;
                }
                Action::DoNotSchedule => {
                    self.ready.extract_from_ready(&mut self.nodes, highest);
                }
            }
        }
    }

    fn thread_cpu(env: &SchedulerEnv<'_>, thread: ThreadId) -> CpuIndex {
        env.thread(thread)
            .cpu()
            .unwrap_or_else(|| fatal(InternalError::NoScheduledNode))
    }
}

/// Allocate `cpu` to `owner`, keeping threads on the processor they are
/// executing on where possible.
///
/// If `owner` is still executing on another processor of this instance, it
/// stays there and the heir of that processor moves to `cpu` instead. This
/// avoids a migration of the executing thread.
pub(crate) fn allocate_processor_lazy(env: &SchedulerEnv<'_>, owner: ThreadId, cpu: CpuIndex) {
    let thread = env.thread(owner);

    if let Some(scheduled_cpu) = thread.cpu() {
        if scheduled_cpu != cpu
            && env.is_executing_on(owner, scheduled_cpu)
            && env.is_processor_owned(scheduled_cpu)
        {
            if let Some(heir) = env.cpu(scheduled_cpu).heir().filter(|&heir| heir != owner) {
                env.dispatch_update_heir(scheduled_cpu, owner);
                env.thread(heir).set_cpu(cpu);
                env.dispatch_update_heir(cpu, heir);
                return;
            }
        }
    }

    thread.set_cpu(cpu);
    env.dispatch_update_heir(cpu, owner);
}

pub(crate) fn allocate_processor_exact(env: &SchedulerEnv<'_>, owner: ThreadId, cpu: CpuIndex) {
    env.thread(owner).set_cpu(cpu);
    env.dispatch_update_heir(cpu, owner);
}

impl<Q: SmpReadyQueue> Scheduler for SmpScheduler<Q> {
    fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    fn maximum_priority(&self) -> PriorityLevel {
        self.maximum_priority
    }

    fn processor_count(&self) -> usize {
        self.processor_count
    }

    fn node_initialize(&mut self, _env: &SchedulerEnv<'_>, thread: ThreadId, priority: Priority) {
        self.nodes.insert(thread, SmpNode::new(thread, priority));
        self.ready
            .update_priority(&mut self.nodes, thread.index(), priority.purify());
    }

    fn node_destroy(&mut self, _env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        if self.state_of(node) != NodeState::Blocked {
            fatal(InternalError::NodeInUse(thread));
        }
        self.nodes.remove(thread);
    }

    fn block(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        let control = env.thread(thread);
        let cpu = {
            let mut info = control.scheduler_info();
            if info.state == ThreadSchedulerState::Blocked {
                fatal(InternalError::AlreadyBlocked(thread));
            }
            env.cancel_ask_for_help(thread, &mut info);
            info.state = ThreadSchedulerState::Blocked;
            info.cpu
        };

        match self.state_of(node) {
            NodeState::Scheduled => {
                let cpu = cpu.unwrap_or_else(|| fatal(InternalError::NoScheduledNode));
                self.schedule_highest_ready(env, node, cpu);
            }
            NodeState::Ready => {
                self.change_state(node, NodeState::Blocked);
                self.ready.extract_from_ready(&mut self.nodes, node);
            }
            NodeState::Blocked => {}
        }
    }

    fn unblock(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        let control = env.thread(thread);
        {
            let mut info = control.scheduler_info();
            if info.state != ThreadSchedulerState::Blocked {
                fatal(InternalError::NotBlocked(thread));
            }
            info.state = ThreadSchedulerState::Ready;
        }

        match self.state_of(node) {
            NodeState::Blocked => {
                let insert_priority = self.priority_of(node).append();
                let needs_help = self.enqueue(env, node, insert_priority);
                if needs_help {
                    let mut info = control.scheduler_info();
                    if info.state == ThreadSchedulerState::Ready && info.has_helping_nodes() {
                        env.request_ask_for_help(thread, &mut info);
                    }
                }
            }
            NodeState::Scheduled => {
                control.scheduler_info().state = ThreadSchedulerState::Scheduled;
            }
            NodeState::Ready => {
                let mut info = control.scheduler_info();
                env.request_ask_for_help(thread, &mut info);
            }
        }
    }

    fn update_priority(
        &mut self,
        env: &SchedulerEnv<'_>,
        thread: ThreadId,
        priority: Priority,
        prepend: bool,
    ) {
        let node = self.node_index(thread);
        let priority = priority.purify();
        let insert_priority = priority.for_insert(prepend);

        if priority == self.priority_of(node) {
            if env.thread(thread).state() == ThreadSchedulerState::Ready {
                self.ask_for_help(env, thread);
            }
            return;
        }

        match self.state_of(node) {
            NodeState::Scheduled => {
                self.extract_from_scheduled(node);
                self.ready.update_priority(&mut self.nodes, node, priority);
                self.enqueue_scheduled(env, node, insert_priority);
            }
            NodeState::Ready => {
                self.ready.extract_from_ready(&mut self.nodes, node);
                self.ready.update_priority(&mut self.nodes, node, priority);
                self.enqueue(env, node, insert_priority);
            }
            NodeState::Blocked => {
                self.ready.update_priority(&mut self.nodes, node, priority);
                if env.thread(thread).state() == ThreadSchedulerState::Ready {
                    self.ask_for_help(env, thread);
                }
            }
        }
    }

    fn yield_now(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        let insert_priority = self.priority_of(node).append();

        match self.state_of(node) {
            NodeState::Scheduled => {
                self.extract_from_scheduled(node);
                self.enqueue_scheduled(env, node, insert_priority);
            }
            NodeState::Ready => {
                self.ready.extract_from_ready(&mut self.nodes, node);
                self.enqueue(env, node, insert_priority);
            }
            NodeState::Blocked => {}
        }
    }

    fn ask_for_help(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) -> bool {
        let node = self.node_index(thread);
        if self.scheduled.is_empty() {
            return false;
        }
        let lowest = self.lowest_scheduled(env);
        let control = env.thread(thread);
        let mut info = control.scheduler_info();

        if info.state != ThreadSchedulerState::Ready {
            return false;
        }

        match self.state_of(node) {
            NodeState::Blocked => {
                let insert_priority = self.priority_of(node);
                if priority_less_equal(insert_priority, self.priority_of(lowest)) {
                    env.cancel_ask_for_help(thread, &mut info);
                    info.state = ThreadSchedulerState::Scheduled;
                    drop(info);

                    self.preempt(env, node, lowest, false);
                    self.move_from_scheduled_to_ready(lowest);
                    self.insert_scheduled(node, insert_priority);
                    true
                } else {
                    drop(info);
                    self.change_state(node, NodeState::Ready);
                    self.ready.insert_ready(&mut self.nodes, node, insert_priority);
                    false
                }
            }
            NodeState::Scheduled => {
                env.cancel_ask_for_help(thread, &mut info);
                info.state = ThreadSchedulerState::Scheduled;
                true
            }
            NodeState::Ready => false,
        }
    }

    fn reconsider_help_request(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        let scheduled = env.thread(thread).state() == ThreadSchedulerState::Scheduled;

        if scheduled && self.state_of(node) == NodeState::Ready {
            self.change_state(node, NodeState::Blocked);
            self.ready.extract_from_ready(&mut self.nodes, node);
        }
    }

    fn withdraw_node(
        &mut self,
        env: &SchedulerEnv<'_>,
        thread: ThreadId,
        next_state: ThreadSchedulerState,
    ) {
        let node = self.node_index(thread);

        match self.state_of(node) {
            NodeState::Scheduled => {
                let cpu = {
                    let control = env.thread(thread);
                    let mut info = control.scheduler_info();
                    info.state = next_state;
                    info.cpu
                        .unwrap_or_else(|| fatal(InternalError::NoScheduledNode))
                };
                self.schedule_highest_ready(env, node, cpu);
            }
            NodeState::Ready => {
                self.change_state(node, NodeState::Blocked);
                self.ready.extract_from_ready(&mut self.nodes, node);
            }
            NodeState::Blocked => {}
        }
    }

    fn start_idle(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId, cpu: CpuIndex) {
        let node = self.node_index(idle);
        {
            let control = env.thread(idle);
            let mut info = control.scheduler_info();
            info.state = ThreadSchedulerState::Scheduled;
            info.cpu = Some(cpu);
        }
        self.change_state(node, NodeState::Scheduled);
        self.scheduled.append(&mut self.nodes, node);
        self.processor_count += 1;
    }

    fn add_processor(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId) {
        let node = self.node_index(idle);
        env.thread(idle).scheduler_info().state = ThreadSchedulerState::Scheduled;
        self.change_state(node, NodeState::Scheduled);
        self.processor_count += 1;

        if self.ready.has_ready() {
            let insert_priority = self.priority_of(node).append();
            self.enqueue_scheduled(env, node, insert_priority);
        } else {
            self.scheduled.append(&mut self.nodes, node);
        }
    }

    fn remove_processor(&mut self, env: &SchedulerEnv<'_>, cpu: CpuIndex) -> ThreadId {
        let victim = self
            .scheduled
            .iter(&self.nodes)
            .find(|&node| Self::thread_cpu(env, self.owner(node)) == cpu)
            .unwrap_or_else(|| fatal(InternalError::ProcessorNotOwned(cpu)));

        self.extract_from_scheduled(victim);
        self.processor_count -= 1;
        let victim_owner = self.owner(victim);

        let idle = if env.thread(victim_owner).is_idle() {
            self.change_state(victim, NodeState::Blocked);
            victim_owner
        } else {
            let idle_node = self
                .ready
                .get_idle(&mut self.nodes)
                .unwrap_or_else(|| fatal(InternalError::NoReadyNode));
            let idle = self.owner(idle_node);
            env.thread(idle).scheduler_info().state = ThreadSchedulerState::Scheduled;

            self.preempt(env, idle_node, victim, true);
            self.change_state(idle_node, NodeState::Blocked);

            let insert_priority = self.priority_of(victim).append();
            self.enqueue(env, victim, insert_priority);
            idle
        };

        // The idle thread leaves this instance together with the processor.
        self.nodes.remove(idle);
        log::debug!("scheduler {}: removed cpu {}, idle {}", env.scheduler(), cpu, idle);
        idle
    }

    fn node_state(&self, thread: ThreadId) -> Option<NodeState> {
        self.nodes.get(thread).map(|node| node.state)
    }

    fn node_priority(&self, thread: ThreadId) -> Option<Priority> {
        self.nodes.get(thread).map(|node| node.priority)
    }

    fn scheduled(&self) -> Vec<ThreadId> {
        self.scheduled
            .iter(&self.nodes)
            .map(|node| self.owner(node))
            .collect()
    }

    fn ready(&self) -> Vec<ThreadId> {
        self.ready
            .ready_nodes(&self.nodes)
            .into_iter()
            .map(|node| self.owner(node))
            .collect()
    }

    fn verify(&self) -> Result<(), &'static str> {
        if self.scheduled.len() != self.processor_count {
            return Err("scheduled node count differs from processor count");
        }

        let mut previous: Option<Priority> = None;
        for node in self.scheduled.iter(&self.nodes) {
            let node = self.nodes.node(node);
            if node.state != NodeState::Scheduled {
                return Err("node on the scheduled chain is not scheduled");
            }
            if previous.map_or(false, |previous| previous > node.priority) {
                return Err("scheduled chain is not ordered by priority");
            }
            previous = Some(node.priority);
        }

        let ready = self.ready.ready_nodes(&self.nodes);
        if ready
            .iter()
            .any(|&node| self.nodes.node(node).state != NodeState::Ready)
        {
            return Err("node in the ready set is not ready");
        }

        let scheduled_count = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Scheduled)
            .count();
        let ready_count = self
            .nodes
            .iter()
            .filter(|(_, node)| node.state == NodeState::Ready)
            .count();
        if scheduled_count != self.scheduled.len() || ready_count != ready.len() {
            return Err("node states disagree with scheduled and ready sets");
        }

        Ok(())
    }
}
