//! Optimistic spin on the current owner (spec §4.5 step 4).
//!
//! Meaningful only for intent waiters at the head of the queue and for
//! read waiters: a writer never spins, because it is blocked on readers
//! draining, not on a single owner it could watch.

use std::sync::Arc;

use crate::task::Task;
use crate::waiter::Waiter;

/// Bounded iteration count before giving up and falling back to sleeping.
/// There is no principled value here -- this just caps the cost of being
/// wrong about the owner staying on-CPU.
const MAX_SPINS: u32 = 4096;

/// Busy-waits on `owner` for as long as it stays on-CPU, aborting early if
/// `waiter` is handed the lock (direct handoff completed) or the owner
/// migrates off-CPU. Returns `true` iff the spin ended because the waiter
/// was granted the lock.
pub(crate) fn optimistic_spin(owner: &Arc<Task>, waiter: &Waiter) -> bool {
    for _ in 0..MAX_SPINS {
        if waiter.lock_acquired() {
            return true;
        }
        if !owner.is_on_cpu() {
            return false;
        }
        std::hint::spin_loop();
        std::thread::yield_now();
    }
    false
}
