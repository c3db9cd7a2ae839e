//! The mount-wide rename lock (§5): an exclusive lock held across any
//! structural move of an inode (`mark_unlinked`, `update_location`).
//! Holding it prevents a path walk from observing an intermediate state.

use parking_lot::{Mutex, MutexGuard};

#[derive(Default)]
pub struct RenameLock {
    inner: Mutex<()>,
}

/// Proof that the mount-wide rename lock is held, threaded through every
/// call that structurally mutates an [crate::InodeBase]'s location.
pub struct RenameLockGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl RenameLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> RenameLockGuard<'_> {
        RenameLockGuard(self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_reentrant_after_guard_drops() {
        let lock = RenameLock::new();
        {
            let _guard = lock.lock();
        }
        let _guard2 = lock.lock();
    }
}
