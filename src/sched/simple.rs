//! Simple uniprocessor priority scheduler.
//!
//! All ready threads, including the one executing, sit in a single chain
//! sorted by priority with FIFO order inside a level. The heir is the head
//! of the chain unless the current heir must not be preempted.

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

#[derive(Debug)]
struct SimpleNode {
    links: ChainLinks,
    owner: ThreadId,
    priority: Priority,
}

impl Linked for SimpleNode {
    fn links(&self) -> &ChainLinks {
        &self.links
    }

    fn links_mut(&mut self) -> &mut ChainLinks {
        &mut self.links
    }
}

/// Uniprocessor scheduler instance.
pub struct SimpleScheduler {
    maximum_priority: PriorityLevel,
    cpu: Option<CpuIndex>,
    heir: Option<ThreadId>,
    ready: Chain,
    nodes: NodeArena<SimpleNode>,
}

impl SimpleScheduler {
    pub fn new(maximum_priority: PriorityLevel, capacity: usize) -> Self {
        Self {
            maximum_priority,
            cpu: None,
            heir: None,
            ready: Chain::new(),
            nodes: NodeArena::with_capacity(capacity),
        }
    }

    fn node_index(&self, thread: ThreadId) -> NodeIndex {
        if !self.nodes.contains(thread) {
            fatal(InternalError::NodeMissing(thread));
        }
        thread.index()
    }

    fn cpu(&self) -> CpuIndex {
        self.cpu
            .unwrap_or_else(|| fatal(InternalError::NoScheduledNode))
    }

    fn is_ready(&self, node: NodeIndex) -> bool {
        self.nodes.node(node).links.is_on_chain()
    }

    fn insert(&mut self, node: NodeIndex, insert_priority: Priority) {
        self.ready.insert_ordered(&mut self.nodes, node, |nodes, next| {
            priority_less_equal(insert_priority, nodes.node(next).priority)
        });
    }

    fn extract(&mut self, node: NodeIndex) {
        self.ready.extract(&mut self.nodes, node);
    }

    /// Make the head of the ready chain the heir.
    fn schedule(&mut self, env: &SchedulerEnv<'_>, force_dispatch: bool) {
        let cpu = self.cpu();
        let first = self
            .ready
            .first()
            .unwrap_or_else(|| fatal(InternalError::NoReadyNode));
        let first = self.nodes.node(first).owner;
        env.update_heir(cpu, first, force_dispatch);
        self.sync_heir(env, cpu);
    }

    /// Mirror the heir of the processor in the thread states.
    fn sync_heir(&mut self, env: &SchedulerEnv<'_>, cpu: CpuIndex) {
        let heir = env.cpu(cpu).heir();
        if heir == self.heir {
            return;
        }

        if let Some(previous) = self.heir {
            let thread = env.thread(previous);
            let mut info = thread.scheduler_info();
            if info.state == ThreadSchedulerState::Scheduled {
                info.state = ThreadSchedulerState::Ready;
            }
        }
        if let Some(heir) = heir {
            let thread = env.thread(heir);
            let mut info = thread.scheduler_info();
            info.state = ThreadSchedulerState::Scheduled;
            info.cpu = Some(cpu);
        }

        self.heir = heir;
    }
}

impl Scheduler for SimpleScheduler {
    fn policy(&self) -> SchedulerPolicy {
        SchedulerPolicy::Simple
    }

    fn maximum_priority(&self) -> PriorityLevel {
        self.maximum_priority
    }

    fn processor_count(&self) -> usize {
        usize::from(self.cpu.is_some())
    }

    fn node_initialize(&mut self, _env: &SchedulerEnv<'_>, thread: ThreadId, priority: Priority) {
        self.nodes.insert(
            thread,
            SimpleNode {
                links: ChainLinks::off_chain(),
                owner: thread,
                priority: priority.purify(),
            },
        );
    }

    fn node_destroy(&mut self, _env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        if self.is_ready(node) {
            fatal(InternalError::NodeInUse(thread));
        }
        self.nodes.remove(thread);
    }

    fn block(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        {
            let control = env.thread(thread);
            let mut info = control.scheduler_info();
            if info.state == ThreadSchedulerState::Blocked {
                fatal(InternalError::AlreadyBlocked(thread));
            }
            env.cancel_ask_for_help(thread, &mut info);
            info.state = ThreadSchedulerState::Blocked;
        }

        if self.is_ready(node) {
            self.extract(node);
        }

        let cpu = self.cpu();
        if self.heir == Some(thread) || env.is_executing_on(thread, cpu) {
            self.schedule(env, true);
        }
    }

    fn unblock(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        {
            let control = env.thread(thread);
            let mut info = control.scheduler_info();
            if info.state != ThreadSchedulerState::Blocked {
                fatal(InternalError::NotBlocked(thread));
            }
            info.state = ThreadSchedulerState::Ready;
        }

        let priority = self.nodes.node(node).priority;
        self.insert(node, priority.append());

        // A thread more important than the heir replaces it. Pseudo-ISR
        // threads do so even if the heir is not preemptible.
        let heir_priority = self
            .heir
            .map(|heir| self.nodes.node(self.node_index(heir)).priority);
        if heir_priority.map_or(true, |heir_priority| priority < heir_priority) {
            let cpu = self.cpu();
            env.update_heir(cpu, thread, priority == Priority::PSEUDO_ISR);
            self.sync_heir(env, cpu);
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
        self.nodes.node_mut(node).priority = priority;

        if !self.is_ready(node) {
            return;
        }

        self.extract(node);
        self.insert(node, priority.for_insert(prepend));
        self.schedule(env, false);
    }

    fn yield_now(&mut self, env: &SchedulerEnv<'_>, thread: ThreadId) {
        let node = self.node_index(thread);
        if !self.is_ready(node) {
            return;
        }

        let priority = self.nodes.node(node).priority;
        self.extract(node);
        self.insert(node, priority.append());
        self.schedule(env, false);
    }

    fn ask_for_help(&mut self, _env: &SchedulerEnv<'_>, _thread: ThreadId) -> bool {
        false
    }

    fn reconsider_help_request(&mut self, _env: &SchedulerEnv<'_>, _thread: ThreadId) {}

    fn withdraw_node(
        &mut self,
        env: &SchedulerEnv<'_>,
        thread: ThreadId,
        next_state: ThreadSchedulerState,
    ) {
        let node = self.node_index(thread);
        if !self.is_ready(node) {
            return;
        }

        self.extract(node);
        if self.heir == Some(thread) {
            env.thread(thread).scheduler_info().state = next_state;
            self.schedule(env, true);
        }
    }

    fn start_idle(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId, cpu: CpuIndex) {
        if self.cpu.is_some() {
            fatal(InternalError::UniprocessorOverflow(cpu));
        }
        let node = self.node_index(idle);
        {
            let control = env.thread(idle);
            let mut info = control.scheduler_info();
            info.state = ThreadSchedulerState::Scheduled;
            info.cpu = Some(cpu);
        }

        self.cpu = Some(cpu);
        self.heir = Some(idle);
        self.ready.append(&mut self.nodes, node);
    }

    fn add_processor(&mut self, env: &SchedulerEnv<'_>, idle: ThreadId) {
        let cpu = env
            .thread(idle)
            .cpu()
            .unwrap_or_else(|| fatal(InternalError::NoScheduledNode));
        if self.cpu.is_some() {
            fatal(InternalError::UniprocessorOverflow(cpu));
        }

        let node = self.node_index(idle);
        env.thread(idle).scheduler_info().state = ThreadSchedulerState::Ready;
        self.cpu = Some(cpu);
        self.heir = None;

        let priority = self.nodes.node(node).priority;
        self.insert(node, priority.append());
        self.schedule(env, true);
    }

    /// A uniprocessor instance never gives up its only processor; the
    /// system rejects that before it gets here.
    fn remove_processor(&mut self, _env: &SchedulerEnv<'_>, cpu: CpuIndex) -> ThreadId {
        fatal(InternalError::LastProcessor(cpu))
    }

    fn node_state(&self, thread: ThreadId) -> Option<NodeState> {
        let node = self.nodes.get(thread)?;
        Some(if !node.links.is_on_chain() {
            NodeState::Blocked
        } else if self.heir == Some(thread) {
            NodeState::Scheduled
        } else {
            NodeState::Ready
        })
    }

    fn node_priority(&self, thread: ThreadId) -> Option<Priority> {
        self.nodes.get(thread).map(|node| node.priority)
    }

    fn scheduled(&self) -> Vec<ThreadId> {
        self.heir.into_iter().collect()
    }

    fn ready(&self) -> Vec<ThreadId> {
        self.ready
            .iter(&self.nodes)
            .map(|node| self.nodes.node(node).owner)
            .filter(|&owner| Some(owner) != self.heir)
            .collect()
    }

    fn verify(&self) -> Result<(), &'static str> {
        if let Some(heir) = self.heir {
            match self.nodes.get(heir) {
                Some(node) if node.links.is_on_chain() => {}
                _ => return Err("heir is not in the ready chain"),
            }
        }

        let priorities: Vec<Priority> = self
            .ready
            .iter(&self.nodes)
            .map(|node| self.nodes.node(node).priority)
            .collect();
        if priorities.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err("ready chain is not ordered by priority");
        }

        Ok(())
    }
}
