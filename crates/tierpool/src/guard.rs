//! Busy-wait mutual exclusion for pool bookkeeping.
//!
//! Critical sections in the pool are a handful of loads and stores (free-list
//! push/pop, a reclaim-pool scan, counter bumps), so waiters spin rather than
//! park. After [`SpinPolicy::spins_before_yield`] spin hints a waiter yields its
//! time slice and starts spinning again.
//!
//! The guard is not reentrant: acquiring it twice on one thread deadlocks.
//! Debug builds detect that case and panic instead of hanging.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicUsize;

use tierpool_core::SpinPolicy;

/// Non-reentrant spin lock owning the data it protects.
pub struct SpinGuard<T> {
    locked: AtomicBool,
    #[cfg(debug_assertions)]
    owner: AtomicUsize,
    policy: SpinPolicy,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `locked`; `T` only needs to move
// between threads, never to be shared.
unsafe impl<T: Send> Send for SpinGuard<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for SpinGuard<T> {}

impl<T> SpinGuard<T> {
    pub fn new(data: T, policy: SpinPolicy) -> Self {
        Self {
            locked: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            owner: AtomicUsize::new(0),
            policy,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the guard, spinning (and periodically yielding) while contended.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the calling thread already holds the guard.
    pub fn lock(&self) -> SpinGuardLock<'_, T> {
        #[cfg(debug_assertions)]
        {
            let me = thread_token();
            assert!(
                me == 0 || self.owner.load(Ordering::Relaxed) != me,
                "SpinGuard is not reentrant: the calling thread already holds it"
            );
        }

        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return self.acquired();
            }
            let mut spins = 0u32;
            while self.locked.load(Ordering::Relaxed) {
                if spins < self.policy.spins_before_yield {
                    std::hint::spin_loop();
                    spins += 1;
                } else {
                    std::thread::yield_now();
                    spins = 0;
                }
            }
        }
    }

    /// Acquire the guard only if it is free right now.
    pub fn try_lock(&self) -> Option<SpinGuardLock<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| self.acquired())
    }

    /// Returns true if some thread holds the guard. Racy; diagnostics only.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn policy(&self) -> SpinPolicy {
        self.policy
    }

    fn acquired(&self) -> SpinGuardLock<'_, T> {
        #[cfg(debug_assertions)]
        self.owner.store(thread_token(), Ordering::Relaxed);
        SpinGuardLock { guard: self }
    }
}

/// RAII access to the data behind a [`SpinGuard`]; releases on drop.
pub struct SpinGuardLock<'a, T> {
    guard: &'a SpinGuard<T>,
}

impl<T> Deref for SpinGuardLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the lock grants exclusive access.
        unsafe { &*self.guard.data.get() }
    }
}

impl<T> DerefMut for SpinGuardLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the lock grants exclusive access.
        unsafe { &mut *self.guard.data.get() }
    }
}

impl<T> Drop for SpinGuardLock<'_, T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        self.guard.owner.store(0, Ordering::Relaxed);
        self.guard.locked.store(false, Ordering::Release);
    }
}

/// Non-zero per-thread identity, or 0 once thread-local storage is torn down.
#[cfg(debug_assertions)]
fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN
        .try_with(|token| std::ptr::from_ref(token) as usize)
        .unwrap_or(0)
}
