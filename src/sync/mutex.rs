//! An exclusive mutex in one atomic word: a holder flag plus a count of
//! interested threads.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::spin_rounds;
use crate::sync::wait::{Futex, Wait};
use crate::sync::{tsan, RawLock, HOLDER, WAITER};

/// A non-recursive mutual exclusion primitive that fits in one 32-bit word.
///
/// The most significant bit of the word flags a held lock; the low bits
/// count the threads currently interested in it: the holder plus any
/// pending waiters. Counting waiters is what lets [`unlock`] skip the wake
/// syscall whenever nobody is waiting, so an uncontended lock/unlock pair
/// stays entirely in userspace.
///
/// A zeroed word is a valid unlocked mutex and [`new`](RawMutex::new) is
/// `const`, so a `static` mutex needs no lazy initialization. The lock is
/// not recursive: a second `lock` by the holder deadlocks.
///
/// `W` is the address-wait capability used for blocking and waking;
/// the default [`Futex`] is the host facility.
///
/// [`unlock`]: RawMutex::unlock
pub struct RawMutex<W: Wait = Futex> {
    word: AtomicU32,
    _wait: PhantomData<W>,
}

impl<W: Wait> RawMutex<W> {
    /// Creates an unlocked mutex.
    #[inline]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            _wait: PhantomData,
        }
    }

    /// Returns whether the mutex is held by some thread.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) & HOLDER != 0
    }

    /// Returns whether the mutex is held or has pending waiters.
    #[inline]
    pub fn is_locked_or_waiting(&self) -> bool {
        self.word.load(Ordering::Acquire) != 0
    }

    /// Attempts to acquire the mutex without blocking.
    #[inline]
    pub fn try_lock(&self) -> bool {
        tsan::pre_lock(&self.word, tsan::TRY_LOCK);
        let locked = self.try_lock_inner();
        if locked {
            tsan::post_lock(&self.word, tsan::TRY_LOCK);
        } else {
            tsan::post_lock(&self.word, tsan::TRY_LOCK | tsan::TRY_LOCK_FAILED);
        }
        locked
    }

    /// Acquires the mutex, blocking until it is granted.
    #[inline]
    pub fn lock(&self) {
        tsan::pre_lock(&self.word, 0);
        if !self.try_lock_inner() {
            self.wait_and_lock();
        }
        tsan::post_lock(&self.word, 0);
    }

    /// Acquires the mutex, busy-polling for [`spin_rounds`] rounds before
    /// joining the waiter-counted blocking path.
    ///
    /// [`spin_rounds`]: crate::spin_rounds
    #[inline]
    pub fn spin_lock(&self) {
        tsan::pre_lock(&self.word, 0);
        if !self.try_lock_inner() {
            self.spin_wait_and_lock();
        }
        tsan::post_lock(&self.word, 0);
    }

    /// Releases the mutex, waking one waiter if the word shows any.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the mutex. Releasing a mutex that is
    /// unlocked, or held by another thread, is undefined behavior.
    #[inline]
    pub unsafe fn unlock(&self) {
        tsan::pre_unlock(&self.word, 0);
        let lk = self.word.fetch_sub(HOLDER + WAITER, Ordering::Release);
        debug_assert!(lk & HOLDER != 0, "unlock of an unheld mutex");
        tsan::post_unlock(&self.word, 0);
        if lk != HOLDER + WAITER {
            W::wake_one(&self.word);
        }
    }

    /// The whole-word claim: only an idle mutex can be taken this way, and
    /// taking it counts the new holder in the low bits.
    #[inline]
    fn try_lock_inner(&self) -> bool {
        self.word
            .compare_exchange(0, HOLDER + WAITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Slow path of [`lock`](Self::lock): register interest in the low
    /// bits, then alternate between claiming the holder bit and blocking.
    #[cold]
    fn wait_and_lock(&self) {
        // The increment is what makes the holder's unlock see this thread
        // and issue a wake. It stays in place across any number of sleep
        // rounds and is inherited on the successful claim below.
        let mut lk = self.word.fetch_add(WAITER, Ordering::Acquire) + WAITER;
        loop {
            if lk & HOLDER == 0 {
                match self.word.compare_exchange_weak(
                    lk,
                    lk | HOLDER,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(seen) => lk = seen,
                }
            } else {
                tracing::trace!(word = lk, "blocking on mutex");
                W::wait(&self.word, lk);
                lk = self.word.load(Ordering::Relaxed);
            }
        }
    }

    /// Slow path of [`spin_lock`](Self::spin_lock): a bounded busy-poll
    /// that claims the whole word, falling back to the waiter-counted path
    /// once the rounds are used up.
    #[cold]
    fn spin_wait_and_lock(&self) {
        for _ in 0..spin_rounds() {
            if self.word.load(Ordering::Relaxed) == 0 && self.try_lock_inner() {
                return;
            }
            std::hint::spin_loop();
        }
        self.wait_and_lock();
    }
}

impl<W: Wait> RawLock for RawMutex<W> {
    #[inline]
    fn lock(&self) {
        RawMutex::lock(self);
    }

    #[inline]
    unsafe fn unlock(&self) {
        RawMutex::unlock(self);
    }
}

impl<W: Wait> Default for RawMutex<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Wait> fmt::Debug for RawMutex<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word.load(Ordering::Acquire);
        f.debug_struct("RawMutex")
            .field("locked", &(word & HOLDER != 0))
            .field("interested", &(word & !HOLDER))
            .finish()
    }
}

/// An owning mutex protecting a value of type `T`.
///
/// A thin RAII layer over [`RawMutex`]: locking returns a [`MutexGuard`]
/// that dereferences to the value and releases the lock on drop. There is
/// no poisoning; a panic while holding the guard simply unlocks.
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `data`.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the mutex, returning the protected value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, blocking until it is granted.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Acquires the mutex with a bounded busy-poll before blocking.
    #[inline]
    pub fn spin_lock(&self) -> MutexGuard<'_, T> {
        self.raw.spin_lock();
        MutexGuard { mutex: self }
    }

    /// Attempts to acquire the mutex without blocking.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Returns whether the mutex is held by some thread.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Returns a mutable reference to the protected value; no locking is
    /// needed since the borrow is exclusive.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.debug_struct("Mutex").field("data", &"<locked>").finish(),
        }
    }
}

/// RAII guard for [`Mutex`]; the lock is released when this is dropped.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    /// The mutex this guard came from; used by the condition variable to
    /// release and reacquire around a wait.
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock, so access is exclusive.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock, so access is exclusive.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard was created by a successful acquisition.
        unsafe { self.mutex.raw.unlock() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
