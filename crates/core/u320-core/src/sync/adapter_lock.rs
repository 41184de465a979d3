//! Context-tracking spin lock.
//!
//! Uses test-and-test-and-set (TTAS) to reduce cache-line contention. The
//! lock word doubles as an owner tag so diagnostics can report whether the
//! interrupt front end, the deferred back end or an out-of-band caller
//! holds the adapter.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU8, Ordering};

const UNLOCKED: u8 = 0;

/// Execution context that acquired an [`AdapterLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Context {
    /// Interrupt-priority classification.
    FrontEnd = 1,
    /// Deferred exception processing.
    BackEnd = 2,
    /// Any caller outside the dispatch cycle (abort, reset, queries).
    Caller = 3,
}

impl Context {
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::FrontEnd),
            2 => Some(Self::BackEnd),
            3 => Some(Self::Caller),
            _ => None,
        }
    }
}

/// A spin lock whose lock word records the owning [`Context`].
///
/// Const-constructable so it can be placed in `static` items.
pub struct AdapterLock<T> {
    owner: AtomicU8,
    data: UnsafeCell<T>,
}

// SAFETY: The lock ensures exclusive access to `T` via atomic operations.
// `T: Send` is required because the data may be accessed from different CPUs.
unsafe impl<T: Send> Send for AdapterLock<T> {}
unsafe impl<T: Send> Sync for AdapterLock<T> {}

impl<T> AdapterLock<T> {
    /// Creates a new unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            owner: AtomicU8::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock on behalf of `ctx`, spinning until it is free.
    pub fn lock(&self, ctx: Context) -> AdapterGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock(ctx) {
                return guard;
            }
            while self.owner.load(Ordering::Relaxed) != UNLOCKED {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock on behalf of `ctx` without spinning.
    pub fn try_lock(&self, ctx: Context) -> Option<AdapterGuard<'_, T>> {
        self.owner
            .compare_exchange(UNLOCKED, ctx as u8, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| AdapterGuard { lock: self, ctx })
    }

    /// Returns the context currently holding the lock, if any.
    ///
    /// The answer is a snapshot and may be stale by the time it is used.
    #[must_use]
    pub fn holder(&self) -> Option<Context> {
        Context::from_raw(self.owner.load(Ordering::Relaxed))
    }

    /// Consumes the lock and returns the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Returns a mutable reference to the data without acquiring the lock.
    ///
    /// # Safety
    ///
    /// The caller must ensure no other code is concurrently accessing the data.
    pub unsafe fn force_get(&self) -> &mut T {
        // SAFETY: Exclusivity is guaranteed by the caller.
        unsafe { &mut *self.data.get() }
    }
}

/// RAII guard that releases the [`AdapterLock`] when dropped.
pub struct AdapterGuard<'a, T> {
    lock: &'a AdapterLock<T>,
    ctx: Context,
}

impl<T> AdapterGuard<'_, T> {
    /// Returns the context this guard was acquired for.
    #[must_use]
    pub fn context(&self) -> Context {
        self.ctx
    }
}

impl<T> Deref for AdapterGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for AdapterGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard guarantees exclusive access while it exists.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for AdapterGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.owner.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_follows_guard() {
        let lock = AdapterLock::new(0u32);
        assert_eq!(lock.holder(), None);
        {
            let guard = lock.lock(Context::BackEnd);
            assert_eq!(guard.context(), Context::BackEnd);
            assert_eq!(lock.holder(), Some(Context::BackEnd));
        }
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn try_lock_fails_when_held() {
        let lock = AdapterLock::new(());
        let _guard = lock.lock(Context::Caller);
        assert!(lock.try_lock(Context::FrontEnd).is_none());
        assert_eq!(lock.holder(), Some(Context::Caller));
    }

    #[test]
    fn mutate_through_guard() {
        let lock = AdapterLock::new(0);
        *lock.lock(Context::FrontEnd) = 7;
        assert_eq!(*lock.lock(Context::Caller), 7);
        assert_eq!(lock.into_inner(), 7);
    }

    #[test]
    fn contended_lock_serializes_threads() {
        use std::sync::Arc;

        let lock = Arc::new(AdapterLock::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock(Context::Caller) += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(Context::BackEnd), 4000);
    }
}
