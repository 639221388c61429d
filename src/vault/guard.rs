//! Scoped access to a vault's contents.

use parking_lot::MutexGuard;
use tracing::trace;

/// Exclusive, scope-bound access to the value inside a
/// [`GuardedValue`](super::GuardedValue).
///
/// A guard is produced only by a successful acquisition and releases the
/// vault when it is dropped, including during unwinding. It cannot be cloned
/// and cannot be sent to another thread. The value itself is reachable only
/// through the three closure shapes below. Closures receive a borrow whose
/// lifetime is chosen by the guard, so results cannot hold references into
/// the protected value.
///
/// # Example
///
/// ```rust
/// use laundry_machine::vault::GuardedValue;
/// use std::time::Duration;
///
/// let vault = GuardedValue::new("counter", || 0_u32, Duration::from_millis(100));
/// let mut guard = vault.lock(Duration::from_millis(100)).unwrap();
///
/// guard.action(|n| *n += 1);
/// let doubled = guard.mixed(|n| { *n *= 2; *n });
/// assert_eq!(doubled, 2);
/// assert_eq!(guard.query(|n| *n), 2);
/// ```
pub struct ScopedGuard<'a, T> {
    resource: &'static str,
    inner: MutexGuard<'a, T>,
}

impl<'a, T> ScopedGuard<'a, T> {
    pub(super) fn new(resource: &'static str, inner: MutexGuard<'a, T>) -> Self {
        trace!(resource, "guard acquired");
        Self { resource, inner }
    }

    /// Read-only access returning a derived value.
    pub fn query<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner)
    }

    /// Mutate the protected value in place.
    pub fn action(&mut self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner)
    }

    /// Mutate the protected value and return something derived from the
    /// post-mutation state.
    pub fn mixed<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner)
    }

    /// Name of the vault this guard was issued by.
    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Release the vault now rather than at the end of the scope.
    pub fn release(self) {
        drop(self)
    }
}

impl<T> Drop for ScopedGuard<'_, T> {
    fn drop(&mut self) {
        trace!(resource = self.resource, "guard released");
    }
}

impl<T> std::fmt::Debug for ScopedGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedGuard")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::vault::GuardedValue;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Duration;

    fn vault() -> GuardedValue<Vec<u8>> {
        GuardedValue::new("bytes", Vec::new, Duration::from_millis(50))
    }

    #[test]
    fn query_does_not_mutate() {
        let vault = vault();
        let guard = vault.lock(Duration::from_millis(50)).unwrap();
        assert_eq!(guard.query(|v| v.len()), 0);
        assert_eq!(guard.resource(), "bytes");
    }

    #[test]
    fn action_and_mixed_mutate() {
        let vault = vault();
        {
            let mut guard = vault.lock(Duration::from_millis(50)).unwrap();
            guard.action(|v| v.push(1));
            let len = guard.mixed(|v| {
                v.push(2);
                v.len()
            });
            assert_eq!(len, 2);
        }
        let guard = vault.lock(Duration::from_millis(50)).unwrap();
        assert_eq!(guard.query(|v| v.clone()), vec![1, 2]);
    }

    #[test]
    fn release_frees_the_vault() {
        let vault = vault();
        let guard = vault.lock(Duration::from_millis(50)).unwrap();
        guard.release();
        assert!(vault.spin_lock(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn panic_inside_closure_still_releases() {
        let vault = vault();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = vault.lock(Duration::from_millis(50)).unwrap();
            guard.action(|_| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(vault.lock(Duration::from_millis(10)).is_ok());
    }
}
