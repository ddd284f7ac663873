//! The slice of "host scheduler" the lock needs (spec §1, §4.5, Design
//! Notes): a handle to wake a blocked caller, and a way to ask "is the
//! current holder still running". Nothing about scheduling classes,
//! priority, or interruptibility lives here -- only what the wait-list and
//! the optimistic spinner touch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A handle to a blocked (or about-to-block) caller.
///
/// `on_cpu` is the userspace stand-in for "this task is currently running
/// on some CPU" -- it is cleared just before the task parks and set again
/// right after it unparks, so the optimistic spinner (spec §4.5) can poll
/// it without touching the scheduler directly. `id` exists purely so two
/// `Task`s can be compared for identity after an `Arc` round-trip (the
/// "confirm `owner` is still the same" check in the Design Notes).
/// `thread_id` is the OS thread identity; unlike `id`, it is stable across
/// the multiple `Task::current()` calls a single thread makes over
/// successive lock acquisitions, which is what `SixLock::holds` needs to
/// answer "is the caller the task recorded as the owner".
pub(crate) struct Task {
    pub(crate) id: u64,
    pub(crate) thread_id: ThreadId,
    pub(crate) on_cpu: AtomicBool,
    thread: Thread,
}

impl Task {
    /// A handle for the calling thread.
    pub(crate) fn current() -> Arc<Task> {
        Arc::new(Task {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            thread_id: thread::current().id(),
            on_cpu: AtomicBool::new(true),
            thread: thread::current(),
        })
    }

    pub(crate) fn is_on_cpu(&self) -> bool {
        self.on_cpu.load(Ordering::Acquire)
    }

    pub(crate) fn wake(&self) {
        self.thread.unpark();
    }

    /// Marks this task as off-CPU and parks the calling thread. Must only
    /// be called by the thread this handle was created for.
    pub(crate) fn park(&self) {
        self.on_cpu.store(false, Ordering::Release);
        thread::park();
        self.on_cpu.store(true, Ordering::Release);
    }

    /// As [`Task::park`], but bounded -- used while waiting for the
    /// `should_sleep` predicate to be re-polled.
    pub(crate) fn park_timeout(&self, timeout: std::time::Duration) {
        self.on_cpu.store(false, Ordering::Release);
        thread::park_timeout(timeout);
        self.on_cpu.store(true, Ordering::Release);
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
