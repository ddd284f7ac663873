//! A three-mode sequenced lock: shared **read**, exclusive-but-concurrent
//! **intent**, and fully exclusive **write** (write is an upgrade from an
//! already-held intent, not an independent mode).
//!
//! Built for filesystem/B-tree-style workloads: a mutator reserves an
//! object for future modification (`intent`) while concurrent lookups
//! (`read`) keep going, then escalates to `write` only for the actual
//! mutation, instead of holding an exclusive lock across arbitrary work.
//!
//! Two properties drive the design:
//!
//! - Every successful write bumps a monotonic sequence counter whose parity
//!   doubles as the write-held flag. [`SixLock::relock_read`] (and the
//!   other `relock_*` calls) let a caller that dropped a mode reacquire it
//!   only if nothing was written in the meantime -- the basis for
//!   optimistic-concurrency patterns on top of this lock.
//! - A caller may opt a lock into a per-CPU reader shard
//!   ([`SixLock::shard_alloc`]), turning the uncontended read fast path
//!   into a local counter bump instead of a compare-and-swap on shared
//!   state.
//!
//! This crate is the lock primitive only. Anything that merely *uses* a
//! lock like this one -- allocator metadata, free-space indexes, B-tree
//! transaction glue -- lives elsewhere.

#[macro_use]
extern crate static_assertions;

mod error;
mod lock;
mod shard;
mod spin;
mod state;
mod task;
mod topology;
mod waiter;

pub use error::ContractViolation;
pub use lock::{IntentGuard, LockCounts, ReadGuard, SixLock, WriteGuard};
pub use waiter::Waiter;

/// One of the lock's three access modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shared, multi-holder access.
    Read,
    /// Exclusive-but-coexists-with-readers reservation; prerequisite for
    /// [`Mode::Write`].
    Intent,
    /// Fully exclusive; requires [`Mode::Intent`] already held by the same
    /// caller.
    Write,
}
