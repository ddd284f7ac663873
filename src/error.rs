//! Error kinds produced by the lock (spec §7).
//!
//! Transient contention is not an error: `trylock` returns `bool` and
//! blocking calls simply wait. The two kinds that remain are cancellation
//! (the `should_sleep` predicate returned a value) and contract violations
//! (programmer error, checked with `debug_assert!` in debug builds and left
//! as a documented precondition in release, exactly as spec.md §7 asks).

use custom_error::custom_error;

custom_error! {
    /// A contract violation: releasing a mode the caller never held,
    /// write-without-intent, or freeing a shard with live readers.
    ///
    /// The lock never constructs this value itself in a release build (it
    /// `debug_assert!`s instead); it exists so debug builds have a named
    /// type to panic with via [`custom_error`] rather than a bare string.
    #[derive(PartialEq, Eq, Clone, Copy)]
    pub ContractViolation
    ReleaseNotHeld{mode: &'static str} = "unlock_{mode} called without holding {mode}",
    WriteWithoutIntent = "write acquired without the caller holding intent",
    ShardFreeWithReaders = "shard_free called with outstanding readers",
}
