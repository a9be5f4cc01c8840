use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;

/// Source of packet buffers for inbound messages.
///
/// Returning `None` reports out-of-memory. The reader then leaves the frame
/// in the ring and the caller retries on the next data event.
pub trait PacketAllocator: Send + Sync {
    /// An empty buffer able to hold at least `len` bytes without reallocating.
    fn allocate(&self, len: usize) -> Option<BytesMut>;
}

/// Plain heap allocation with a fixed amount of spare room per buffer.
#[derive(Debug, Clone, Copy)]
pub struct HeapAllocator {
    slack: usize,
}

impl HeapAllocator {
    /// Spare bytes reserved beyond the requested length by default.
    pub const DEFAULT_SLACK: usize = 64;

    pub fn new() -> Self {
        Self::with_slack(Self::DEFAULT_SLACK)
    }

    pub fn with_slack(slack: usize) -> Self {
        Self { slack }
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Option<BytesMut> {
        Some(BytesMut::with_capacity(len + self.slack))
    }
}

/// Allocator that succeeds a fixed number of times, then fails.
///
/// Used to exercise out-of-memory recovery. [`refill`](Self::refill) restores
/// the budget.
#[derive(Debug)]
pub struct LimitedAllocator {
    remaining: AtomicUsize,
    failures: AtomicUsize,
}

impl LimitedAllocator {
    pub fn new(allocations: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(allocations),
            failures: AtomicUsize::new(0),
        }
    }

    /// Allow `allocations` more successful allocations.
    pub fn refill(&self, allocations: usize) {
        self.remaining.store(allocations, Ordering::SeqCst);
    }

    /// Number of refused requests so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl PacketAllocator for LimitedAllocator {
    fn allocate(&self, len: usize) -> Option<BytesMut> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if granted {
            Some(BytesMut::with_capacity(len))
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_allocator_reserves_slack() {
        let buf = HeapAllocator::with_slack(16).allocate(100).unwrap();
        assert!(buf.capacity() >= 116);
        assert!(buf.is_empty());
    }

    #[test]
    fn limited_allocator_fails_after_budget() {
        let alloc = LimitedAllocator::new(2);
        assert!(alloc.allocate(8).is_some());
        assert!(alloc.allocate(8).is_some());
        assert!(alloc.allocate(8).is_none());
        assert_eq!(alloc.failures(), 1);

        alloc.refill(1);
        assert!(alloc.allocate(8).is_some());
    }
}
