//! Guarded resource vault.
//!
//! A [`GuardedValue`] owns exactly one value and hands out at most one
//! [`ScopedGuard`] at a time. Every acquisition is bounded by a timeout.
//!
//! When several vaults are involved, callers must acquire them in a fixed
//! order (the machine always takes the state-code vault before the status
//! aggregate). The order is a contract and is not checked at runtime.

mod guard;

pub use guard::ScopedGuard;

use crate::error::{fail_fast, VaultError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

type Teardown<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Exclusive-access container for one shared mutable value.
///
/// # Example
///
/// ```rust
/// use laundry_machine::vault::GuardedValue;
/// use std::time::Duration;
///
/// let vault = GuardedValue::new("greeting", || String::from("hi"), Duration::from_millis(100));
///
/// let len = vault
///     .with_lock(Duration::from_millis(100), |guard| guard.query(|s| s.len()))
///     .unwrap();
/// assert_eq!(len, 2);
/// ```
pub struct GuardedValue<T> {
    name: &'static str,
    value: Mutex<T>,
    lifecycle: AtomicU8,
    default_timeout: Duration,
    poll_interval: Duration,
    teardown: Mutex<Option<Teardown<T>>>,
}

impl<T> GuardedValue<T> {
    /// Create a vault whose value is produced by `factory`.
    pub fn new(name: &'static str, factory: impl FnOnce() -> T, default_timeout: Duration) -> Self {
        Self {
            name,
            value: Mutex::new(factory()),
            lifecycle: AtomicU8::new(ACTIVE),
            default_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            teardown: Mutex::new(None),
        }
    }

    /// Set the slice used by [`lock`](Self::lock) between re-polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_micros(100));
        self
    }

    /// Action run on the value during the final acquisition of disposal.
    pub fn with_teardown(self, teardown: impl FnOnce(&mut T) + Send + 'static) -> Self {
        *self.teardown.lock() = Some(Box::new(teardown));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) != ACTIVE
    }

    /// Acquire with the vault's default timeout.
    pub fn lock_default(&self) -> Result<ScopedGuard<'_, T>, VaultError> {
        self.lock(self.default_timeout)
    }

    /// Acquire by sleeping in poll slices until `timeout` elapses.
    pub fn lock(&self, timeout: Duration) -> Result<ScopedGuard<'_, T>, VaultError> {
        self.acquire_polling(timeout, None)
    }

    /// Like [`lock`](Self::lock), but gives up early when `token` fires.
    pub fn lock_with_cancel(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<ScopedGuard<'_, T>, VaultError> {
        self.acquire_polling(timeout, Some(token))
    }

    /// Acquire by busy-waiting until `timeout` elapses.
    pub fn spin_lock(&self, timeout: Duration) -> Result<ScopedGuard<'_, T>, VaultError> {
        self.acquire_spinning(timeout, None)
    }

    /// Like [`spin_lock`](Self::spin_lock), but gives up early when `token` fires.
    pub fn spin_lock_with_cancel(
        &self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<ScopedGuard<'_, T>, VaultError> {
        self.acquire_spinning(timeout, Some(token))
    }

    /// Acquire, run `f` against the guard and release before returning.
    pub fn with_lock<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut ScopedGuard<'_, T>) -> R,
    ) -> Result<R, VaultError> {
        let mut guard = self.lock(timeout)?;
        Ok(f(&mut guard))
    }

    /// Tear the vault down.
    ///
    /// New acquisitions fail with [`VaultError::Disposed`] from this point.
    /// Disposal waits up to `grace` for the current holder to release, runs
    /// the teardown action under that final acquisition and marks the vault
    /// disposed. If the holder does not release in time the process aborts.
    /// Disposing twice is a no-op.
    pub fn dispose(&self, grace: Duration) {
        if self
            .lifecycle
            .compare_exchange(ACTIVE, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Some(mut value) = self.value.try_lock_for(grace) else {
            fail_fast(&format!(
                "vault '{}' still held after {grace:?} during disposal",
                self.name
            ));
        };
        if let Some(teardown) = self.teardown.lock().take() {
            teardown(&mut value);
        }
        drop(value);
        self.lifecycle.store(DISPOSED, Ordering::Release);
        debug!(resource = self.name, "vault disposed");
    }

    fn ensure_active(&self) -> Result<(), VaultError> {
        if self.is_disposed() {
            Err(VaultError::Disposed {
                resource: self.name,
            })
        } else {
            Ok(())
        }
    }

    fn ensure_not_cancelled(&self, token: Option<&CancellationToken>) -> Result<(), VaultError> {
        match token {
            Some(token) if token.is_cancelled() => Err(VaultError::Cancelled {
                resource: self.name,
            }),
            _ => Ok(()),
        }
    }

    fn timed_out(&self, timeout: Duration) -> VaultError {
        warn!(resource = self.name, ?timeout, "timed out acquiring vault");
        VaultError::TimedOut {
            resource: self.name,
            timeout,
        }
    }

    fn admit<'a>(&'a self, inner: parking_lot::MutexGuard<'a, T>) -> Result<ScopedGuard<'a, T>, VaultError> {
        // Disposal may have started while we were waiting.
        if self.is_disposed() {
            drop(inner);
            return Err(VaultError::Disposed {
                resource: self.name,
            });
        }
        Ok(ScopedGuard::new(self.name, inner))
    }

    fn acquire_polling(
        &self,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<ScopedGuard<'_, T>, VaultError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_active()?;
            self.ensure_not_cancelled(token)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(inner) = self.value.try_lock_for(remaining.min(self.poll_interval)) {
                return self.admit(inner);
            }
            if remaining <= self.poll_interval {
                return Err(self.timed_out(timeout));
            }
        }
    }

    fn acquire_spinning(
        &self,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<ScopedGuard<'_, T>, VaultError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_active()?;
            self.ensure_not_cancelled(token)?;

            if let Some(inner) = self.value.try_lock() {
                return self.admit(inner);
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out(timeout));
            }
            std::hint::spin_loop();
        }
    }
}

impl<T> Drop for GuardedValue<T> {
    fn drop(&mut self) {
        if *self.lifecycle.get_mut() == DISPOSED {
            return;
        }
        if let Some(teardown) = self.teardown.get_mut().take() {
            teardown(self.value.get_mut());
        }
        *self.lifecycle.get_mut() = DISPOSED;
    }
}

impl<T> std::fmt::Debug for GuardedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedValue")
            .field("name", &self.name)
            .field("disposed", &self.is_disposed())
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
