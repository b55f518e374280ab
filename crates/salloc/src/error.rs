use thiserror::Error;

/// Recoverable allocator failures.
///
/// Fatal conditions (mapping failures, corrupted guard bytes, bad slab
/// headers) never surface here; they abort the process instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SallocError {
    /// The request is larger than the biggest size class.
    #[error("no size class covers the requested size")]
    NoMatchingClass,
    /// The arena backing the class has no slab left to hand out.
    #[error("arena exhausted")]
    ArenaExhausted,
    /// A custom class was requested with an item larger than a slab can hold.
    #[error("item size {0} exceeds the maximum slab item")]
    InvalidItemSize(usize),
    /// A custom class asked for the fixed arena, which was never reserved.
    #[error("fixed arena is not configured")]
    ArenaUnavailable,
}

impl SallocError {
    /// Whether this failure is recorded as the thread's last error.
    /// Only allocation-path failures are; class creation errors are not.
    pub fn is_allocation_failure(self) -> bool {
        matches!(self, SallocError::NoMatchingClass | SallocError::ArenaExhausted)
    }
}
