//! FIFO wait-list and direct-handoff wake-up protocol (spec §4.4).
//!
//! Waiter records are meant to live on the caller's stack (spec §3) and
//! outlive the wait by construction -- the caller blocks on the very frame
//! the record lives in. The queue therefore stores raw pointers rather than
//! an owned, heap-allocated node: nothing in the queue is ever read after
//! the waiter that produced it has unblocked and returned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use spin::Mutex;

use crate::task::Task;
use crate::Mode;

/// A caller-allocated record of one blocked (or about-to-block) acquire
/// attempt. See spec §3 "Waiter record".
pub struct Waiter {
    pub(crate) task: Arc<Task>,
    pub(crate) want: Mode,
    pub(crate) start_time: u64,
    pub(crate) acquired: AtomicBool,
}

impl Waiter {
    pub(crate) fn new(want: Mode) -> Self {
        Waiter {
            task: Task::current(),
            want,
            start_time: 0,
            acquired: AtomicBool::new(false),
        }
    }

    /// Set by the waker immediately before wake-up (spec §3, §4.4): tells
    /// the waiter it now owns the lock via direct handoff.
    pub fn lock_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }
}

pub(crate) struct WaitList {
    queue: Mutex<VecDeque<*const Waiter>>,
    clock: AtomicU64,
}

// SAFETY: every pointer stored in `queue` points at a `Waiter` owned by a
// thread that is blocked inside `WaitList::wait` for the entire time the
// pointer is reachable from the queue; it is removed (by the waker or by
// the waiting thread itself on cancellation) before that thread's stack
// frame unwinds. The pointee is therefore always valid for the lifetime of
// its presence in the queue, across whichever thread happens to touch it.
unsafe impl Send for WaitList {}
unsafe impl Sync for WaitList {}

impl WaitList {
    pub(crate) const fn new() -> Self {
        WaitList {
            queue: Mutex::new(VecDeque::new()),
            clock: AtomicU64::new(0),
        }
    }

    /// Appends `waiter` to the back of the queue, assigning it a strictly
    /// increasing `start_time` even across coarse-clock ties (spec §4.4).
    /// The caller must guarantee `waiter` outlives its presence in the
    /// queue (removed either by [`WaitList::remove`] or by a successful
    /// wake scan).
    pub(crate) fn enqueue(&self, waiter: &mut Waiter) {
        let mut q = self.queue.lock();
        self.push_locked(&mut q, waiter);
    }

    fn push_locked(&self, q: &mut VecDeque<*const Waiter>, waiter: &mut Waiter) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let last = q
            .back()
            // SAFETY: see the `unsafe impl Send/Sync` note above.
            .map(|w| unsafe { (**w).start_time })
            .unwrap_or(0);
        waiter.start_time = now.max(last + 1);
        q.push_back(waiter as *const Waiter);
    }

    /// Retries `try_acquire` once while holding `wait_lock`, closing the
    /// race where the releaser completed between the caller's first failed
    /// fast-path attempt and taking this lock (spec §4.5 step 2). Returns
    /// `true` if that retry succeeded (nothing was queued); otherwise
    /// enqueues `waiter` and returns `false`.
    pub(crate) fn retry_then_enqueue(
        &self,
        waiter: &mut Waiter,
        mut try_acquire: impl FnMut() -> bool,
    ) -> bool {
        let mut q = self.queue.lock();
        if try_acquire() {
            return true;
        }
        self.push_locked(&mut q, waiter);
        false
    }

    /// Removes `waiter` from the queue if still present. Used on
    /// cancellation (spec §4.5 step 6): a waiter that gives up before being
    /// woken must unlink itself so a later release does not hand the lock
    /// to a waiter nobody is watching anymore.
    pub(crate) fn remove(&self, waiter: &Waiter) -> bool {
        let mut q = self.queue.lock();
        let ptr = waiter as *const Waiter;
        if let Some(pos) = q.iter().position(|w| *w == ptr) {
            q.remove(pos);
            true
        } else {
            false
        }
    }

    pub(crate) fn has_waiter(&self, mode: Mode) -> bool {
        let q = self.queue.lock();
        q.iter().any(|w| unsafe { (**w).want == mode })
    }

    /// Direct-handoff wake scan (spec §4.4). `try_acquire` performs the
    /// real acquisition attempt on behalf of the head waiter; on success
    /// the waiter is unlinked, `lock_acquired` is set, and the waiter's
    /// task is woken. For `Mode::Read` every consecutive matching waiter at
    /// the head is served; for `Intent`/`Write` at most one is.
    pub(crate) fn wake(&self, mode: Mode, mut try_acquire: impl FnMut(Mode, &Arc<Task>) -> bool) {
        let mut q = self.queue.lock();
        loop {
            let head = match q.front() {
                Some(w) => *w,
                None => break,
            };
            // SAFETY: see the `unsafe impl Send/Sync` note above.
            let head_ref = unsafe { &*head };
            if head_ref.want != mode {
                break;
            }
            if !try_acquire(mode, &head_ref.task) {
                break;
            }
            q.pop_front();
            core::sync::atomic::fence(Ordering::SeqCst);
            head_ref.acquired.store(true, Ordering::Release);
            head_ref.task.wake();
            if mode != Mode::Read {
                break;
            }
        }
    }

    /// Unparks the head waiter of `mode`, if any, without unlinking it or
    /// setting `lock_acquired` (spec §4.2 "spurious writer wake-up"): a
    /// reader that backed off because `write_locking` was set may have
    /// transiently inflated a writer's shard sum, so it pokes the writer to
    /// re-check rather than handing anything off.
    pub(crate) fn nudge(&self, mode: Mode) {
        let q = self.queue.lock();
        // SAFETY: see the `unsafe impl Send/Sync` note above.
        if let Some(w) = q.iter().find(|w| unsafe { (***w).want == mode }) {
            unsafe { (**w).task.wake() };
        }
    }

    pub(crate) fn wake_all(&self) {
        let q = self.queue.lock();
        for w in q.iter() {
            let w = unsafe { &**w };
            w.task.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_strictly_increases_on_ties() {
        let list = WaitList::new();
        let mut a = Waiter::new(Mode::Read);
        let mut b = Waiter::new(Mode::Read);
        list.enqueue(&mut a);
        list.enqueue(&mut b);
        assert!(b.start_time > a.start_time);
        list.remove(&a);
        list.remove(&b);
    }

    #[test]
    fn remove_unlinks_a_cancelled_waiter() {
        let list = WaitList::new();
        let mut a = Waiter::new(Mode::Write);
        list.enqueue(&mut a);
        assert!(list.has_waiter(Mode::Write));
        assert!(list.remove(&a));
        assert!(!list.has_waiter(Mode::Write));
        assert!(!list.remove(&a));
    }
}
