//! Per-driver exclusion token.
//!
//! A `Token<T>` owns the mutable half of a driver record. At most one
//! worker or accessor holds it at a time; the guard releases it on every
//! exit path, early returns included.
//!
//! Waiting is cooperative: a contended acquire sleeps one tick through the
//! [`Platform`] and retries, so a higher-priority waiter never starves the
//! holder on the same core.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::platform::Platform;

/// Poll period for contended acquires.
const POLL_MS: u32 = 1;

/// Exclusion token guarding a value.
pub struct Token<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: the value is only reachable through a `TokenGuard`, and the
// `held` flag (Acquire on take, Release on drop) admits one guard at a time.
unsafe impl<T: Send> Send for Token<T> {}
unsafe impl<T: Send> Sync for Token<T> {}

impl<T> Token<T> {
    /// Create an available token.
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Take the token if nobody holds it.
    #[inline]
    pub fn try_acquire(&self) -> Option<TokenGuard<'_, T>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| TokenGuard { token: self })
    }

    /// Take the token, waiting at most `timeout_ms`.
    pub fn acquire_within<P: Platform + ?Sized>(
        &self,
        platform: &P,
        timeout_ms: u32,
    ) -> Option<TokenGuard<'_, T>> {
        let deadline = platform.now_us() + i64::from(timeout_ms) * 1000;
        loop {
            if let Some(guard) = self.try_acquire() {
                return Some(guard);
            }
            if platform.now_us() >= deadline {
                return None;
            }
            platform.delay_ms(POLL_MS);
        }
    }

    /// Take the token, waiting as long as needed.
    pub fn acquire<P: Platform + ?Sized>(&self, platform: &P) -> TokenGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            platform.delay_ms(POLL_MS);
        }
    }

    /// True while a guard is alive.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

/// Scoped token ownership.
pub struct TokenGuard<'a, T> {
    token: &'a Token<T>,
}

impl<T> Deref for TokenGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: this guard is the only holder.
        unsafe { &*self.token.value.get() }
    }
}

impl<T> DerefMut for TokenGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this guard is the only holder.
        unsafe { &mut *self.token.value.get() }
    }
}

impl<T> Drop for TokenGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.token.held.store(false, Ordering::Release);
    }
}
