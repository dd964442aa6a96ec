//! Failure counting for the periodic remote tasks.

use std::sync::atomic::{AtomicU32, Ordering};

/// Count of failed remote attempts for one task.
///
/// The count only ever grows. A success does not reset it.
#[derive(Debug, Default)]
pub struct FailureCounter {
    count: AtomicU32,
}

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure and return the new count.
    pub fn record(&self) -> u32 {
        self.count.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// True once the count is strictly greater than `ceiling`.
    pub fn exceeds(&self, ceiling: u32) -> bool {
        self.count() > ceiling
    }
}
