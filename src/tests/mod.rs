//! Crate level tests.
//!
//! Scenarios spanning schedulers, thread queues and object managers,
//! randomized invariant checks and multi-threaded stress runs.

mod helpers;
mod stress;
