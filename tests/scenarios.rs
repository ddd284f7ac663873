// The six concrete scenarios from the lock's testable-properties list,
// run against the public API rather than inline against private state.
//
// Guards are never sent across a thread boundary here: their lifetime is
// tied to the `Arc` clone that produced them, so any guard that must be
// acted on from another thread is created and dropped entirely within
// that thread's own closure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use six_lock::SixLock;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Scenario 1: a reader present, a writer announcing, and a third trylock
// that must fail until the writer has come and gone.
#[test]
fn writer_preference_blocks_a_fresh_trylock_until_the_writer_is_done() {
    init_logging();
    let lock = Arc::new(SixLock::new(0u32));
    let t1 = lock.trylock_read().expect("uncontended read");

    let lock2 = lock.clone();
    let barrier = Arc::new(Barrier::new(2));
    let barrier2 = barrier.clone();
    let writer = thread::spawn(move || {
        let intent = lock2.trylock_intent().expect("no other intent holder");
        barrier2.wait();
        // Blocks until t1 (and nothing else) releases.
        intent.lock_write(|| None::<()>).unwrap();
    });

    barrier.wait();
    // Give the writer a moment to announce write_locking before we probe.
    thread::sleep(Duration::from_millis(20));
    assert!(lock.trylock_read().is_none(), "write_locking should block new readers");

    drop(t1);
    writer.join().unwrap();

    assert!(lock.trylock_read().is_some(), "lock should be free again after the writer releases");
}

// Scenario 2: seq observed via counts(), stable across no writes, and
// invalidated by an intervening write.
#[test]
fn relock_read_survives_until_a_write_happens() {
    let lock = SixLock::new(0u32);
    let s = lock.counts().seq;
    assert!(lock.relock_read(s).is_some());

    let intent = lock.trylock_intent().expect("uncontended intent");
    let write = intent.trylock_write().expect("no readers outstanding");
    drop(write);
    drop(intent);

    assert!(lock.relock_read(s).is_none(), "seq must have moved past a completed write");
}

// Scenario 3: upgrading one of two concurrent readers does not wait for
// the other reader to drain; only the subsequent write does.
#[test]
fn upgrade_does_not_wait_but_write_does() {
    let lock = SixLock::new(0u32);
    let t1 = lock.trylock_read().unwrap();
    let t2 = lock.trylock_read().unwrap();

    let intent = t1.try_upgrade().expect("upgrade ignores other live readers");
    assert_eq!(lock.counts().reads, 1);
    assert!(intent.trylock_write().is_none(), "t2 is still outstanding");

    drop(t2);
    assert!(intent.trylock_write().is_some(), "write should succeed once t2 drains");
}

// Scenario 4: recursive intent only releases ownership on the matching
// final drop.
#[test]
fn recursive_intent_needs_every_release() {
    let lock = SixLock::new(0u32);
    let first = lock.trylock_intent().unwrap();
    let second = first.increment();
    let third = first.increment();

    drop(second);
    assert!(lock.trylock_intent().is_none(), "intent still held after one of three releases");
    drop(third);
    assert!(lock.trylock_intent().is_none(), "intent still held after two of three releases");
    drop(first);
    assert!(lock.trylock_intent().is_some(), "intent must be free after the final release");
}

// Scenario 5: a cancelling should_sleep dequeues cleanly, and a later
// release finds nobody to wake.
#[test]
fn cancelled_reader_is_not_woken_by_a_later_release() {
    let lock = Arc::new(SixLock::new(0u32));
    let intent = lock.trylock_intent().unwrap();
    let held = intent.trylock_write().unwrap();

    let lock2 = lock.clone();
    let start = Instant::now();
    let reader = thread::spawn(move || {
        lock2
            .lock_read(|| if start.elapsed() > Duration::from_millis(10) { Some(42) } else { None })
            .map(|guard| drop(guard))
    });

    let result = reader.join().unwrap();
    assert_eq!(result.err(), Some(42));

    // The releases below must not find a dead waiter to hand off to.
    drop(held);
    drop(intent);
    assert!(lock.trylock_read().is_some());
}

// Scenario 6 (scaled down): many readers hammering the shard fast path
// while a writer repeatedly attempts a cancellable write, checking the
// sum-of-shards-plus-counter invariant at the end.
#[test]
fn shard_correctness_under_concurrent_readers_and_writer_attempts() {
    init_logging();
    const READERS: usize = 8;
    const ITERS_PER_READER: usize = 5_000;
    const WRITE_ATTEMPTS: usize = 50;

    let lock = Arc::new(SixLock::with_shard(0u64));
    let commits = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..READERS {
        let lock = lock.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..ITERS_PER_READER {
                if let Some(guard) = lock.trylock_read() {
                    drop(guard);
                }
            }
        }));
    }

    let writer_lock = lock.clone();
    let writer_commits = commits.clone();
    handles.push(thread::spawn(move || {
        for _ in 0..WRITE_ATTEMPTS {
            let intent = match writer_lock.trylock_intent() {
                Some(i) => i,
                None => continue,
            };
            let deadline = Instant::now() + Duration::from_millis(2);
            if intent.lock_write(|| if Instant::now() > deadline { Some(()) } else { None }).is_ok() {
                writer_commits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }));

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.counts().reads, 0, "final shard sum plus read_count must be zero");
}
