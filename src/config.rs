//! Process-wide storage configuration.
//!
//! The page size is shared by every table file in the process. Files capture
//! it when they are opened, so changing it afterwards only affects files
//! opened later. Production code should treat it as fixed once storage has
//! been touched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Bytes per page, including the slot header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages cached by a buffer pool.
pub const DEFAULT_POOL_PAGES: usize = 50;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Returns the current process-wide page size.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::SeqCst)
}

/// Overrides the page size. Meant for tests, or for a tool that sets it once
/// before opening any file.
pub fn set_page_size(size: usize) {
    PAGE_SIZE.store(size, Ordering::SeqCst);
}

/// Restores [`DEFAULT_PAGE_SIZE`]. Only meant for tests.
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::SeqCst);
}

/// Range the lock manager draws its per-call wait bound from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWaitRange {
    pub min: Duration,
    pub max: Duration,
}

impl LockWaitRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// A fixed bound, mostly useful for deterministic tests.
    pub fn fixed(bound: Duration) -> Self {
        Self {
            min: bound,
            max: bound,
        }
    }
}

impl Default for LockWaitRange {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1),
            max: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_range_is_ordered() {
        let range = LockWaitRange::new(Duration::from_millis(50), Duration::from_millis(5));
        assert_eq!(range.min, Duration::from_millis(5));
        assert_eq!(range.max, Duration::from_millis(50));
    }

    #[test]
    fn test_default_wait_range() {
        let range = LockWaitRange::default();
        assert_eq!(range.min, Duration::from_millis(1));
        assert_eq!(range.max, Duration::from_millis(500));
    }
}
