//! The address-wait capability the primitives block on.

use std::sync::atomic::AtomicU32;

/// A facility that can block a thread on a 32-bit word and wake blocked
/// threads, keyed by the word's address.
///
/// The contract mirrors a futex. [`wait`](Wait::wait) returns once the
/// word no longer holds `expected` or a wake was issued on the address,
/// and is allowed to return spuriously, so callers always re-check the
/// word in a loop. There is no queue object anywhere: the address itself
/// is the identity, and words at different addresses never interfere.
///
/// The primitives take the capability as a type parameter defaulting to
/// [`Futex`]; tests substitute implementations that count syscalls or
/// forbid them outright.
pub trait Wait {
    /// Blocks until woken, unless `word` already differs from `expected`.
    fn wait(word: &AtomicU32, expected: u32);

    /// Wakes at most one thread blocked on `word`.
    fn wake_one(word: &AtomicU32);

    /// Wakes every thread blocked on `word`.
    fn wake_all(word: &AtomicU32);
}

/// The host's native address-wait facility: the futex syscall on Linux,
/// `WaitOnAddress` on Windows, `__ulock_wait` on macOS.
#[derive(Clone, Copy, Debug, Default)]
pub struct Futex;

impl Wait for Futex {
    #[inline]
    fn wait(word: &AtomicU32, expected: u32) {
        atomic_wait::wait(word, expected);
    }

    #[inline]
    fn wake_one(word: &AtomicU32) {
        atomic_wait::wake_one(word);
    }

    #[inline]
    fn wake_all(word: &AtomicU32) {
        atomic_wait::wake_all(word);
    }
}
