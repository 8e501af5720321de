use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a fake's state. A panic while holding the lock leaves plain data
/// behind, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
