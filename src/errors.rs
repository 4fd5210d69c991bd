//! Error handling for the scheduler core.
//!
//! Three kinds of failure exist in this crate and each has its own type:
//!
//! - [`Status`]: the outcome a blocked thread observes in its wait return
//!   code once it has been unblocked (deleted object, timeout, ...).
//! - [`Error`] and its parts [`ConfigError`] / [`ThreadError`]: misuse of the
//!   public system API that can be reported to the caller.
//! - [`InternalError`]: violated preconditions inside the scheduler or thread
//!   queue core. These are not returned; [`fatal`] terminates instead.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

use crate::percpu::CpuIndex;
use crate::sched::SchedulerId;
use crate::thread::ThreadId;

/// Result type for system level operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Wait return code of a thread.
///
/// Set when the thread is enqueued (to [`Status::Successful`]) and possibly
/// overwritten by whoever releases it: a flush filter, a watchdog timeout or
/// the object manager that surrenders the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The thread obtained the resource
    Successful,
    /// The resource was flushed while the thread waited
    Unavailable,
    /// The object was deleted while the thread waited
    ObjectWasDeleted,
    /// The watchdog fired before the resource became available
    Timeout,
    /// The calling thread does not own the resource
    NotOwner,
    /// The resource is not available and the caller asked not to wait
    Unsatisfied,
}

impl Status {
    /// Whether this status reports success.
    pub const fn is_successful(self) -> bool {
        matches!(self, Status::Successful)
    }
}

/// Top-level error type of the system API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid system or scheduler configuration
    Config(ConfigError),
    /// Invalid thread operation
    Thread(ThreadError),
    /// An object manager reported a status other than success
    Status(Status),
}

/// Errors detected while validating a [`SystemConfig`](crate::config::SystemConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No processors were configured
    NoProcessors,
    /// No scheduler instances were configured
    NoSchedulers,
    /// A scheduler refers to a processor outside of the system
    InvalidProcessor(CpuIndex),
    /// A processor is owned by more than one scheduler
    ProcessorAssignedTwice(CpuIndex),
    /// The maximum priority does not fit the priority bitmap
    InvalidMaximumPriority(u32),
    /// The policy cannot drive the number of processors given to it
    TooManyProcessors {
        /// Offending scheduler
        scheduler: SchedulerId,
        /// Processors assigned to it
        count: usize,
    },
    /// The thread table cannot hold the idle threads
    ThreadTableTooSmall(usize),
    /// The clock tick frequency is zero
    InvalidTickFrequency,
}

/// Errors of thread level operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// The thread table is full
    TooManyThreads,
    /// No thread with this identifier exists
    InvalidId(ThreadId),
    /// The referenced scheduler does not exist
    InvalidScheduler(SchedulerId),
    /// The referenced processor does not exist
    InvalidCpu(CpuIndex),
    /// The priority is outside of the scheduler's range
    InvalidPriority(u32),
    /// The thread was already started
    AlreadyStarted(ThreadId),
    /// The operation is not allowed for idle threads
    IdleThread(ThreadId),
    /// The thread is not in the state the operation requires
    WrongState(ThreadId),
    /// The processor still runs the scheduler's last processor
    LastProcessor(SchedulerId),
    /// The processor is not owned by the scheduler
    ProcessorNotOwned(CpuIndex),
    /// The processor is already owned by a scheduler
    ProcessorInUse(CpuIndex),
}

/// Precondition violations inside the core.
///
/// These mirror the kernel's internal error codes: the rest of the system is
/// required to uphold the documented contracts, so a violation is not a
/// recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    /// `block` on a thread that is already blocked
    AlreadyBlocked(ThreadId),
    /// `unblock` on a thread that is not blocked
    NotBlocked(ThreadId),
    /// The scheduler has no node for the thread
    NodeMissing(ThreadId),
    /// A node was initialized twice in the same scheduler
    NodeExists(ThreadId),
    /// A node was destroyed while not blocked
    NodeInUse(ThreadId),
    /// No ready node was available to fill a processor
    NoReadyNode,
    /// The Scheduled set of an SMP scheduler is empty
    NoScheduledNode,
    /// A thread identifier refers to a free slot of the thread table
    ThreadMissing(ThreadId),
    /// The processor is not owned by the scheduler instance
    ProcessorNotOwned(CpuIndex),
    /// A uniprocessor scheduler was given a second processor
    UniprocessorOverflow(CpuIndex),
    /// A uniprocessor scheduler was asked to give up its only processor
    LastProcessor(CpuIndex),
    /// A thread was extracted from a queue it does not wait on
    NotEnqueued(ThreadId),
    /// Priority inheritance chain did not terminate
    InheritanceLoop(ThreadId),
}

/// Terminate on an internal consistency violation.
///
/// Logs the error before panicking so that the cause is visible even when
/// the panic handler only halts the processor.
#[cold]
#[track_caller]
pub fn fatal(error: InternalError) -> ! {
    log::error!("internal error: {}", error);
    panic!("internal error: {}", error)
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Successful => write!(f, "successful"),
            Status::Unavailable => write!(f, "resource unavailable"),
            Status::ObjectWasDeleted => write!(f, "object was deleted"),
            Status::Timeout => write!(f, "timeout"),
            Status::NotOwner => write!(f, "not owner of resource"),
            Status::Unsatisfied => write!(f, "request not satisfied"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Thread(e) => write!(f, "Thread error: {}", e),
            Error::Status(s) => write!(f, "Operation failed: {}", s),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoProcessors => write!(f, "No processors configured"),
            ConfigError::NoSchedulers => write!(f, "No scheduler instances configured"),
            ConfigError::InvalidProcessor(cpu) => write!(f, "Invalid processor: {}", cpu),
            ConfigError::ProcessorAssignedTwice(cpu) => {
                write!(f, "Processor {} assigned to more than one scheduler", cpu)
            }
            ConfigError::InvalidMaximumPriority(prio) => {
                write!(f, "Invalid maximum priority: {}", prio)
            }
            ConfigError::TooManyProcessors { scheduler, count } => {
                write!(f, "Scheduler {} cannot own {} processors", scheduler, count)
            }
            ConfigError::InvalidTickFrequency => write!(f, "Clock tick frequency must not be zero"),
            ConfigError::ThreadTableTooSmall(max) => {
                write!(f, "Thread table of {} entries cannot hold the idle threads", max)
            }
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            ThreadError::InvalidId(id) => write!(f, "Invalid thread id: {}", id),
            ThreadError::InvalidScheduler(id) => write!(f, "Invalid scheduler: {}", id),
            ThreadError::InvalidCpu(cpu) => write!(f, "Invalid processor: {}", cpu),
            ThreadError::InvalidPriority(prio) => write!(f, "Invalid priority: {}", prio),
            ThreadError::AlreadyStarted(id) => write!(f, "Thread {} already started", id),
            ThreadError::IdleThread(id) => write!(f, "Operation not allowed on idle thread {}", id),
            ThreadError::WrongState(id) => write!(f, "Thread {} is in the wrong state", id),
            ThreadError::LastProcessor(id) => {
                write!(f, "Scheduler {} would be left without processors", id)
            }
            ThreadError::ProcessorNotOwned(cpu) => {
                write!(f, "Processor {} is not owned by the scheduler", cpu)
            }
            ThreadError::ProcessorInUse(cpu) => write!(f, "Processor {} is already in use", cpu),
        }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalError::AlreadyBlocked(id) => write!(f, "thread {} is already blocked", id),
            InternalError::NotBlocked(id) => write!(f, "thread {} is not blocked", id),
            InternalError::NodeMissing(id) => write!(f, "no scheduler node for thread {}", id),
            InternalError::NodeExists(id) => write!(f, "scheduler node for thread {} exists", id),
            InternalError::NodeInUse(id) => write!(f, "scheduler node of thread {} in use", id),
            InternalError::NoReadyNode => write!(f, "no ready node to fill a processor"),
            InternalError::NoScheduledNode => write!(f, "no scheduled node"),
            InternalError::ThreadMissing(id) => write!(f, "thread {} does not exist", id),
            InternalError::ProcessorNotOwned(cpu) => {
                write!(f, "processor {} not owned by scheduler", cpu)
            }
            InternalError::UniprocessorOverflow(cpu) => {
                write!(f, "uniprocessor scheduler cannot own processor {}", cpu)
            }
            InternalError::LastProcessor(cpu) => {
                write!(f, "uniprocessor scheduler cannot give up processor {}", cpu)
            }
            InternalError::NotEnqueued(id) => write!(f, "thread {} is not enqueued", id),
            InternalError::InheritanceLoop(id) => {
                write!(f, "priority inheritance loop at thread {}", id)
            }
        }
    }
}

// Conversion implementations for ergonomic error handling

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<ThreadError> for Error {
    fn from(error: ThreadError) -> Self {
        Error::Thread(error)
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_messages() {
        assert_eq!(Status::ObjectWasDeleted.to_string(), "object was deleted");
        let err: Error = ConfigError::InvalidProcessor(CpuIndex::new(7)).into();
        assert_eq!(err.to_string(), "Configuration error: Invalid processor: 7");
    }

    #[test]
    fn test_status_success() {
        assert!(Status::Successful.is_successful());
        assert!(!Status::Timeout.is_successful());
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn test_fatal_panics() {
        fatal(InternalError::NoReadyNode);
    }
}
