//! Wordlock is a library of small blocking synchronization primitives: an
//! exclusive mutex, a shared/update/exclusive reader-writer lock, and a
//! condition variable. Each is built directly on one or two atomic 32-bit
//! words and the operating system's address-wait facility (the futex
//! syscall on Linux, `WaitOnAddress` on Windows, `__ulock_wait` on macOS).
//!
//! The primitives contain nothing but atomic integers: no heap allocation,
//! no queue objects, no per-instance OS handles. A zeroed word is a valid
//! unlocked lock, and the word's own address is what waiting threads block
//! on. Every word keeps a count of the threads interested in it, so a
//! release issues a wake syscall only when someone is actually waiting;
//! an uncontended lock/unlock pair never enters the kernel.
//!
//! ## Locking
//!
//! The owning wrappers look like the ones in `std::sync`, minus poisoning
//! (there are no recoverable errors in this crate):
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use wordlock::sync::Mutex;
//!
//! let counter = Arc::new(Mutex::new(0u64));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counter = Arc::clone(&counter);
//!         thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 *counter.lock() += 1;
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(*counter.lock(), 4000);
//! ```
//!
//! [`sync::RwLock`] adds a third grant mode to the usual two: an *update*
//! lock is held by at most one thread at a time but coexists with any
//! number of readers, and can later be upgraded to a full write lock
//! without ever releasing the data:
//!
//! ```
//! use wordlock::sync::RwLock;
//!
//! let cache = RwLock::new(vec![1, 2, 3]);
//!
//! // An update guard reads alongside other readers...
//! let probe = cache.update();
//! let reader = cache.try_read().unwrap();
//! assert_eq!(*probe, *reader);
//! drop(reader);
//!
//! // ...and turns into a write guard once a change is warranted.
//! let mut writer = probe.upgrade();
//! writer.push(4);
//! drop(writer);
//! assert_eq!(cache.read().len(), 4);
//! ```
//!
//! ## Raw primitives
//!
//! The wrappers are a thin veneer over [`sync::RawMutex`] and
//! [`sync::RawRwLock`], which expose the lock words directly and are the
//! right layer for embedding a lock into another data structure. The raw
//! release operations are `unsafe`: they trust the caller to actually hold
//! the grant being released, which is exactly what the guards guarantee
//! structurally.
//!
//! ## Spinning
//!
//! Each acquisition method has a `spin_` twin that busy-polls the lock
//! word for a bounded number of rounds before blocking, which pays off for
//! very short critical sections. The bound is process-wide, read once from
//! the `WORDLOCK_SPIN_ROUNDS` environment variable (default
//! [`DEFAULT_SPIN_ROUNDS`]); zero disables spinning entirely, making the
//! `spin_` methods behave exactly like their plain counterparts.

pub mod sync;

pub use sync::{Condvar, Mutex, MutexGuard, RawCondvar, RawMutex, RawRwLock};
pub use sync::{RwLock, RwLockReadGuard, RwLockUpdateGuard, RwLockWriteGuard};

use std::sync::OnceLock;

/// Spin rounds used when `WORDLOCK_SPIN_ROUNDS` is not set.
pub const DEFAULT_SPIN_ROUNDS: u32 = 30;

/// The process-wide spin-round bound for the `spin_*` acquisition methods.
///
/// Read from the `WORDLOCK_SPIN_ROUNDS` environment variable on first use
/// and immutable afterwards, so the value may be set from the environment
/// but needs no synchronization to read.
pub fn spin_rounds() -> u32 {
    static SPIN_ROUNDS: OnceLock<u32> = OnceLock::new();
    *SPIN_ROUNDS.get_or_init(|| {
        std::env::var("WORDLOCK_SPIN_ROUNDS")
            .ok()
            .and_then(|rounds| rounds.parse().ok())
            .unwrap_or(DEFAULT_SPIN_ROUNDS)
    })
}
