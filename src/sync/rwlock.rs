//! A reader-writer lock with a third, intermediate grant mode, composed of
//! an exclusive mutex and one atomic word of reader accounting.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::sync::mutex::RawMutex;
use crate::sync::wait::{Futex, Wait};
use crate::sync::{tsan, RawLock, HOLDER, WAITER};

/// A non-recursive shared/update/exclusive lock.
///
/// Three grant modes:
///
/// - **shared**: any number of threads may hold it at once;
/// - **update**: at most one thread, but it coexists with shared holders;
///   the holder can later [`upgrade`](RawRwLock::upgrade) to exclusive
///   without releasing;
/// - **exclusive**: one thread, nobody else.
///
/// The lock is a composition of two words. An embedded [`RawMutex`] (`ex`)
/// serializes exclusive and update acquisition; the other word counts
/// shared holders in its low bits, with the most significant bit flagging
/// an exclusive request. A writer first takes `ex`, then sets the flag and
/// sleeps until the reader count drains to zero; each reader's release
/// checks for the boundary where it was the last one standing and wakes
/// the writer exactly then. Readers that arrive while the flag is set
/// refuse the fast path and instead rendezvous through `ex`, so a stream
/// of new readers cannot starve a pending writer. An update holder keeps
/// `ex` for its whole duration and counts itself as one reader, which is
/// what makes it compatible with shared holders but not with other update
/// holders or writers.
///
/// See <http://locklessinc.com/articles/sleeping_rwlocks/> for a survey of
/// the design space this mutex-plus-lock-word composition comes from.
///
/// Like [`RawMutex`], a zeroed object is valid and unlocked, and `W` is
/// the address-wait capability, defaulting to the host [`Futex`].
pub struct RawRwLock<W: Wait = Futex> {
    /// Serializes exclusive and update acquisition, and is the rendezvous
    /// point for readers blocked behind an exclusive request.
    ex: RawMutex<W>,
    /// Shared-holder count; `HOLDER` flags an exclusive request.
    word: AtomicU32,
}

impl<W: Wait> RawRwLock<W> {
    /// Creates an unlocked lock.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ex: RawMutex::new(),
            word: AtomicU32::new(0),
        }
    }

    /// Returns whether an exclusive grant is held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) == HOLDER
    }

    /// Returns whether an exclusive grant is held, requested, or being
    /// waited for, or an update grant is held.
    #[inline]
    pub fn is_locked_or_waiting(&self) -> bool {
        self.ex.is_locked_or_waiting() || self.is_locked()
    }

    /// Attempts to acquire a shared grant without blocking.
    ///
    /// Refuses whenever an exclusive request is pending, even though the
    /// requester may itself still be waiting for readers to drain.
    #[inline]
    pub fn try_lock_shared(&self) -> bool {
        tsan::pre_lock(&self.word, tsan::READ_LOCK | tsan::TRY_LOCK);
        let locked = self.try_lock_shared_inner();
        if locked {
            tsan::post_lock(&self.word, tsan::READ_LOCK | tsan::TRY_LOCK);
        } else {
            tsan::post_lock(
                &self.word,
                tsan::READ_LOCK | tsan::TRY_LOCK | tsan::TRY_LOCK_FAILED,
            );
        }
        locked
    }

    /// Acquires a shared grant, blocking behind any exclusive holder.
    #[inline]
    pub fn lock_shared(&self) {
        tsan::pre_lock(&self.word, tsan::READ_LOCK);
        if !self.try_lock_shared_inner() {
            self.shared_lock_wait();
        }
        tsan::post_lock(&self.word, tsan::READ_LOCK);
    }

    /// Acquires a shared grant; the rendezvous pass through the embedded
    /// mutex busy-polls before blocking.
    #[inline]
    pub fn spin_lock_shared(&self) {
        tsan::pre_lock(&self.word, tsan::READ_LOCK);
        if !self.try_lock_shared_inner() {
            self.spin_shared_lock_wait();
        }
        tsan::post_lock(&self.word, tsan::READ_LOCK);
    }

    /// Releases a shared grant, waking a pending writer when the caller
    /// was the last reader it was waiting out.
    ///
    /// # Safety
    ///
    /// The calling thread must hold a shared grant.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        tsan::pre_unlock(&self.word, tsan::READ_LOCK);
        let lk = self.word.fetch_sub(WAITER, Ordering::Release);
        debug_assert!(lk & !HOLDER != 0, "unlock_shared without a shared grant");
        tsan::post_unlock(&self.word, tsan::READ_LOCK);
        if lk == HOLDER + WAITER {
            W::wake_one(&self.word);
        }
    }

    /// Attempts to acquire an update grant without blocking.
    #[inline]
    pub fn try_lock_update(&self) -> bool {
        if !self.ex.try_lock() {
            return false;
        }
        self.shared_acquire();
        true
    }

    /// Acquires an update grant, blocking behind other update or exclusive
    /// holders. Shared holders do not block this.
    #[inline]
    pub fn lock_update(&self) {
        self.ex.lock();
        self.shared_acquire();
    }

    /// Acquires an update grant with a bounded busy-poll before blocking.
    #[inline]
    pub fn spin_lock_update(&self) {
        self.ex.spin_lock();
        self.shared_acquire();
    }

    /// Releases an update grant.
    ///
    /// No wake on the lock word is needed: an exclusive waiter cannot
    /// exist while the update holder keeps the embedded mutex, and the
    /// last-reader wake belongs to [`unlock_shared`](Self::unlock_shared).
    ///
    /// # Safety
    ///
    /// The calling thread must hold the update grant.
    #[inline]
    pub unsafe fn unlock_update(&self) {
        let lk = self.word.fetch_sub(WAITER, Ordering::Release);
        debug_assert!(lk > 0 && lk < HOLDER, "unlock_update without an update grant");
        self.ex.unlock();
    }

    /// Attempts to acquire an exclusive grant without blocking.
    #[inline]
    pub fn try_lock(&self) -> bool {
        tsan::pre_lock(&self.word, tsan::TRY_LOCK);
        if self.ex.try_lock() {
            if self
                .word
                .compare_exchange(0, HOLDER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                tsan::post_lock(&self.word, tsan::TRY_LOCK);
                return true;
            }
            // Readers are inside; back out of the mutex.
            unsafe { self.ex.unlock() };
        }
        tsan::post_lock(&self.word, tsan::TRY_LOCK | tsan::TRY_LOCK_FAILED);
        false
    }

    /// Acquires an exclusive grant, blocking until all other grants are
    /// released.
    #[inline]
    pub fn lock(&self) {
        tsan::pre_lock(&self.word, 0);
        self.ex.lock();
        self.exclusive_acquire();
        tsan::post_lock(&self.word, 0);
    }

    /// Acquires an exclusive grant with a bounded busy-poll before
    /// blocking.
    #[inline]
    pub fn spin_lock(&self) {
        tsan::pre_lock(&self.word, 0);
        self.ex.spin_lock();
        self.exclusive_acquire();
        tsan::post_lock(&self.word, 0);
    }

    /// Releases an exclusive grant.
    ///
    /// Shared waiters that queued behind the grant complete their
    /// rendezvous once the embedded mutex is released here.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the exclusive grant.
    #[inline]
    pub unsafe fn unlock(&self) {
        tsan::pre_unlock(&self.word, 0);
        debug_assert!(self.is_locked());
        self.word.store(0, Ordering::Release);
        tsan::post_unlock(&self.word, 0);
        self.ex.unlock();
    }

    /// Upgrades an update grant to exclusive, waiting out the remaining
    /// shared holders.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the update grant.
    pub unsafe fn upgrade(&self) {
        debug_assert!(self.ex.is_locked());
        tsan::pre_lock(&self.word, 0);
        let lk = self.word.fetch_add(HOLDER - WAITER, Ordering::Acquire);
        if lk != WAITER {
            self.exclusive_lock_wait(lk - WAITER);
        }
        tsan::post_lock(&self.word, 0);
    }

    /// Downgrades an exclusive grant to update: the word goes back to a
    /// single reader count while the embedded mutex stays held.
    ///
    /// Shared waiters blocked in their rendezvous are not woken here; they
    /// proceed when [`unlock_update`](Self::unlock_update) releases the
    /// mutex.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the exclusive grant.
    pub unsafe fn downgrade(&self) {
        debug_assert!(self.ex.is_locked());
        debug_assert!(self.is_locked());
        tsan::pre_unlock(&self.word, 0);
        self.word.store(WAITER, Ordering::Release);
        tsan::post_unlock(&self.word, 0);
    }

    /// Publishes one more shared holder; requires the embedded mutex.
    #[inline]
    fn shared_acquire(&self) {
        let lk = self.word.fetch_add(WAITER, Ordering::Acquire);
        debug_assert!(lk < HOLDER - WAITER, "shared-holder count overflow");
    }

    /// Publishes the exclusive request and waits out the shared holders;
    /// requires the embedded mutex.
    #[inline]
    fn exclusive_acquire(&self) {
        // Holding `ex` means nobody else can set HOLDER, so adding it
        // toggles the bit exactly like fetch_or would; the add form is a
        // single atomic instruction even where fetch_or becomes a CAS loop.
        let lk = self.word.fetch_add(HOLDER, Ordering::Acquire);
        if lk != 0 {
            self.exclusive_lock_wait(lk);
        }
    }

    /// Sleeps until the reader count drains and the word is exactly
    /// `HOLDER`, i.e. the exclusive request became an exclusive grant.
    #[cold]
    fn exclusive_lock_wait(&self, lk: u32) {
        debug_assert!(self.ex.is_locked());
        debug_assert!(lk > 0 && lk < HOLDER);
        tracing::trace!(readers = lk, "waiting for shared holders to drain");
        let mut lk = lk | HOLDER;
        loop {
            debug_assert!(lk > HOLDER);
            W::wait(&self.word, lk);
            lk = self.word.load(Ordering::Acquire);
            if lk == HOLDER {
                return;
            }
        }
    }

    /// Shared slow path: rendezvous with the exclusive holder through the
    /// embedded mutex, which it holds for as long as it is in the way.
    #[cold]
    fn shared_lock_wait(&self) {
        loop {
            self.ex.lock();
            let acquired = self.try_lock_shared_inner();
            unsafe { self.ex.unlock() };
            if acquired {
                return;
            }
            tracing::trace!("retrying shared acquisition behind an exclusive request");
        }
    }

    /// Shared slow path with a busy-polling first pass through the mutex.
    #[cold]
    fn spin_shared_lock_wait(&self) {
        self.ex.spin_lock();
        let acquired = self.try_lock_shared_inner();
        unsafe { self.ex.unlock() };
        if !acquired {
            self.shared_lock_wait();
        }
    }

    /// One more reader, unless an exclusive request is in the word.
    #[inline]
    fn try_lock_shared_inner(&self) -> bool {
        let mut lk = 0;
        loop {
            match self.word.compare_exchange_weak(
                lk,
                lk + WAITER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(seen) => {
                    if seen & HOLDER != 0 {
                        return false;
                    }
                    lk = seen;
                }
            }
        }
    }
}

impl<W: Wait> RawLock for RawRwLock<W> {
    #[inline]
    fn lock(&self) {
        RawRwLock::lock(self);
    }

    #[inline]
    unsafe fn unlock(&self) {
        RawRwLock::unlock(self);
    }
}

impl<W: Wait> Default for RawRwLock<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Wait> fmt::Debug for RawRwLock<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word.load(Ordering::Acquire);
        f.debug_struct("RawRwLock")
            .field("exclusive", &(word & HOLDER != 0))
            .field("readers", &(word & !HOLDER))
            .finish()
    }
}

/// An owning shared/update/exclusive lock protecting a value of type `T`.
///
/// The three grant modes of [`RawRwLock`] surface as three guard types:
/// [`RwLockReadGuard`] and [`RwLockUpdateGuard`] dereference to `&T`,
/// [`RwLockWriteGuard`] also to `&mut T`. An update guard upgrades into a
/// write guard and a write guard downgrades back, without the protected
/// value ever becoming observable in between. No poisoning.
pub struct RwLock<T: ?Sized> {
    raw: RawRwLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    /// Creates an unlocked lock holding `data`.
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawRwLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock, returning the protected value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Acquires a shared grant, blocking behind any exclusive holder.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.lock_shared();
        RwLockReadGuard { lock: self }
    }

    /// Acquires a shared grant with a bounded busy-poll before blocking.
    #[inline]
    pub fn spin_read(&self) -> RwLockReadGuard<'_, T> {
        self.raw.spin_lock_shared();
        RwLockReadGuard { lock: self }
    }

    /// Attempts to acquire a shared grant without blocking.
    #[inline]
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        if self.raw.try_lock_shared() {
            Some(RwLockReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires an update grant, blocking behind update and exclusive
    /// holders but not behind readers.
    #[inline]
    pub fn update(&self) -> RwLockUpdateGuard<'_, T> {
        self.raw.lock_update();
        RwLockUpdateGuard { lock: self }
    }

    /// Acquires an update grant with a bounded busy-poll before blocking.
    #[inline]
    pub fn spin_update(&self) -> RwLockUpdateGuard<'_, T> {
        self.raw.spin_lock_update();
        RwLockUpdateGuard { lock: self }
    }

    /// Attempts to acquire an update grant without blocking.
    #[inline]
    pub fn try_update(&self) -> Option<RwLockUpdateGuard<'_, T>> {
        if self.raw.try_lock_update() {
            Some(RwLockUpdateGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires an exclusive grant, blocking until all others are gone.
    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.lock();
        RwLockWriteGuard { lock: self }
    }

    /// Acquires an exclusive grant with a bounded busy-poll before
    /// blocking.
    #[inline]
    pub fn spin_write(&self) -> RwLockWriteGuard<'_, T> {
        self.raw.spin_lock();
        RwLockWriteGuard { lock: self }
    }

    /// Attempts to acquire an exclusive grant without blocking.
    #[inline]
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(RwLockWriteGuard { lock: self })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the protected value; no locking is
    /// needed since the borrow is exclusive.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("RwLock").field("data", &&*guard).finish(),
            None => f.debug_struct("RwLock").field("data", &"<locked>").finish(),
        }
    }
}

/// RAII guard for a shared grant on [`RwLock`].
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockReadGuard<'a, T> {
    pub(crate) fn rwlock(&self) -> &'a RwLock<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: a shared grant keeps writers out.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard was created by a successful shared acquisition.
        unsafe { self.lock.raw.unlock_shared() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// RAII guard for an update grant on [`RwLock`].
///
/// Dereferences to `&T` only, since readers may still be inside. Call
/// [`upgrade`](Self::upgrade) to trade it for a write guard.
pub struct RwLockUpdateGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockUpdateGuard<'a, T> {
    /// Upgrades to an exclusive grant, waiting out the remaining readers.
    pub fn upgrade(self) -> RwLockWriteGuard<'a, T> {
        let lock = self.lock;
        mem::forget(self);
        // SAFETY: this guard held the update grant and was not dropped.
        unsafe { lock.raw.upgrade() };
        RwLockWriteGuard { lock }
    }

    pub(crate) fn rwlock(&self) -> &'a RwLock<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for RwLockUpdateGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: an update grant keeps writers out; readers may share.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockUpdateGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard was created by a successful update acquisition.
        unsafe { self.lock.raw.unlock_update() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockUpdateGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// RAII guard for an exclusive grant on [`RwLock`].
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

impl<'a, T: ?Sized> RwLockWriteGuard<'a, T> {
    /// Downgrades to an update grant, letting readers back in while
    /// keeping other writers and update holders out.
    pub fn downgrade(self) -> RwLockUpdateGuard<'a, T> {
        let lock = self.lock;
        mem::forget(self);
        // SAFETY: this guard held the exclusive grant and was not dropped.
        unsafe { lock.raw.downgrade() };
        RwLockUpdateGuard { lock }
    }

    pub(crate) fn rwlock(&self) -> &'a RwLock<T> {
        self.lock
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: an exclusive grant keeps everyone else out.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: an exclusive grant keeps everyone else out.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard was created by a successful exclusive
        // acquisition.
        unsafe { self.lock.raw.unlock() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
