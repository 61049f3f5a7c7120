use std::sync::atomic::{AtomicBool, Ordering};

/// Marks one updater as running for as long as the guard is alive.
#[derive(Debug)]
pub(crate) struct RunGuard<'a> {
    active: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    /// Claim the flag, or `None` if another run holds it.
    pub fn try_acquire(active: &'a AtomicBool) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { active })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
