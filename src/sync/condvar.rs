//! A condition variable that counts its waiters, so signalling an idle one
//! is free.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::sync::mutex::MutexGuard;
use crate::sync::rwlock::{RwLockReadGuard, RwLockUpdateGuard, RwLockWriteGuard};
use crate::sync::wait::{Futex, Wait};
use crate::sync::{RawLock, RawRwLock, WAITER};

/// The waiter-counting core of [`Condvar`], usable with the raw locks.
///
/// The single word counts threads that are waiting or just about to wait.
/// Waiting registers interest before releasing the lock; notifying
/// consumes *all* recorded interest in one swap and issues at most one
/// wake syscall, none at all when nobody is waiting. The counter is not a
/// generation: wakes may be spurious by contract, so callers re-check
/// their predicate in a loop and nothing more is needed.
///
/// A notifier can slip between a waiter's registration and its block; the
/// swap to zero then changes the word, and the address-wait's
/// expected-value check turns the would-be lost wake into an immediate
/// return.
pub struct RawCondvar<W: Wait = Futex> {
    waiters: AtomicU32,
    _wait: PhantomData<W>,
}

impl<W: Wait> RawCondvar<W> {
    /// Creates a condition variable with no waiters.
    #[inline]
    pub const fn new() -> Self {
        Self {
            waiters: AtomicU32::new(0),
            _wait: PhantomData,
        }
    }

    /// Returns whether any thread is waiting, or about to wait.
    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::Acquire) != 0
    }

    /// Wakes one waiter, if any interest is recorded; a no-op otherwise.
    #[inline]
    pub fn notify_one(&self) {
        if self.waiters.swap(0, Ordering::Release) != 0 {
            W::wake_one(&self.waiters);
        }
    }

    /// Wakes every waiter present at the swap; a no-op when idle. Threads
    /// that start waiting afterwards are untouched.
    #[inline]
    pub fn notify_all(&self) {
        if self.waiters.swap(0, Ordering::Release) != 0 {
            W::wake_all(&self.waiters);
        }
    }

    /// Releases `lock`, blocks until notified, then reacquires `lock`.
    ///
    /// Returns on any wake, spurious or not: re-check the predicate in a
    /// loop.
    ///
    /// # Safety
    ///
    /// The calling thread must hold `lock` exclusively.
    pub unsafe fn wait<L: RawLock>(&self, lock: &L) {
        let val = self.register();
        lock.unlock();
        W::wait(&self.waiters, val);
        lock.lock();
    }

    /// Like [`wait`](Self::wait) for a shared grant on `lock`.
    ///
    /// # Safety
    ///
    /// The calling thread must hold a shared grant on `lock`.
    pub unsafe fn wait_shared<W2: Wait>(&self, lock: &RawRwLock<W2>) {
        let val = self.register();
        lock.unlock_shared();
        W::wait(&self.waiters, val);
        lock.lock_shared();
    }

    /// Like [`wait`](Self::wait) for an update grant on `lock`.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the update grant on `lock`.
    pub unsafe fn wait_update<W2: Wait>(&self, lock: &RawRwLock<W2>) {
        let val = self.register();
        lock.unlock_update();
        W::wait(&self.waiters, val);
        lock.lock_update();
    }

    /// Records the caller in the waiter count ahead of releasing its lock,
    /// returning the word value its block is conditional on.
    #[inline]
    fn register(&self) -> u32 {
        let val = self.waiters.fetch_add(WAITER, Ordering::Acquire) + WAITER;
        tracing::trace!(waiters = val, "waiting on condition variable");
        val
    }
}

impl<W: Wait> Default for RawCondvar<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Wait> fmt::Debug for RawCondvar<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCondvar")
            .field("waiters", &self.waiters.load(Ordering::Acquire))
            .finish()
    }
}

/// A condition variable for the guarded locks.
///
/// Cooperates with [`Mutex`](crate::sync::Mutex) guards and with all three
/// guard kinds of [`RwLock`](crate::sync::RwLock): a waiter releases
/// whichever grant it holds, blocks, and reacquires the same grant before
/// returning. Wakes can be spurious, so predicates are re-checked in a
/// loop; [`wait_while`](Condvar::wait_while) does the loop for you.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use wordlock::sync::{Condvar, Mutex};
///
/// let ready = Arc::new((Mutex::new(false), Condvar::new()));
///
/// let worker = {
///     let ready = Arc::clone(&ready);
///     thread::spawn(move || {
///         let (lock, condvar) = &*ready;
///         *lock.lock() = true;
///         condvar.notify_one();
///     })
/// };
///
/// let (lock, condvar) = &*ready;
/// let guard = condvar.wait_while(lock.lock(), |ready| !*ready);
/// assert!(*guard);
/// # drop(guard);
/// # worker.join().unwrap();
/// ```
pub struct Condvar {
    raw: RawCondvar,
}

impl Condvar {
    /// Creates a condition variable with no waiters.
    #[inline]
    pub const fn new() -> Self {
        Self {
            raw: RawCondvar::new(),
        }
    }

    /// Returns whether any thread is waiting, or about to wait.
    #[inline]
    pub fn has_waiters(&self) -> bool {
        self.raw.has_waiters()
    }

    /// Wakes one waiter, if any interest is recorded; a no-op otherwise.
    #[inline]
    pub fn notify_one(&self) {
        self.raw.notify_one();
    }

    /// Wakes every waiter present at the call; a no-op when idle.
    #[inline]
    pub fn notify_all(&self) {
        self.raw.notify_all();
    }

    /// Releases the guard's mutex and blocks; on return the mutex is held
    /// again. Wakes can be spurious, so re-check the predicate in a loop.
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        let val = self.raw.register();
        drop(guard);
        Futex::wait(&self.raw.waiters, val);
        mutex.lock()
    }

    /// Waits as long as `condition` holds for the protected value,
    /// re-checking on every wake.
    pub fn wait_while<'a, T: ?Sized, F>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: F,
    ) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// [`wait`](Self::wait) for a shared grant on an `RwLock`.
    pub fn wait_read<'a, T: ?Sized>(
        &self,
        guard: RwLockReadGuard<'a, T>,
    ) -> RwLockReadGuard<'a, T> {
        let lock = guard.rwlock();
        let val = self.raw.register();
        drop(guard);
        Futex::wait(&self.raw.waiters, val);
        lock.read()
    }

    /// [`wait`](Self::wait) for an update grant on an `RwLock`.
    pub fn wait_update<'a, T: ?Sized>(
        &self,
        guard: RwLockUpdateGuard<'a, T>,
    ) -> RwLockUpdateGuard<'a, T> {
        let lock = guard.rwlock();
        let val = self.raw.register();
        drop(guard);
        Futex::wait(&self.raw.waiters, val);
        lock.update()
    }

    /// [`wait`](Self::wait) for an exclusive grant on an `RwLock`.
    pub fn wait_write<'a, T: ?Sized>(
        &self,
        guard: RwLockWriteGuard<'a, T>,
    ) -> RwLockWriteGuard<'a, T> {
        let lock = guard.rwlock();
        let val = self.raw.register();
        drop(guard);
        Futex::wait(&self.raw.waiters, val);
        lock.write()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}
