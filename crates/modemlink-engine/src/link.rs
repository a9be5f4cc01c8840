use std::sync::Arc;

use modemlink_shm::{HeapRegion, RegionLayout, SharedRegion};

use crate::arbiter::{MemorySemaphore, Semaphore};

/// The two shared resources an engine runs over: the region and the
/// semaphore guarding it.
///
/// Cloning shares both, which is how the two ends of an in-process link are
/// wired to the same memory.
#[derive(Clone)]
pub struct SharedLink {
    pub region: Arc<dyn SharedRegion>,
    pub semaphore: Arc<dyn Semaphore>,
}

impl SharedLink {
    pub fn new(region: Arc<dyn SharedRegion>, semaphore: Arc<dyn Semaphore>) -> Self {
        Self { region, semaphore }
    }

    /// Heap region sized for `layout` plus an in-memory semaphore.
    pub fn in_memory(layout: &RegionLayout) -> Self {
        Self {
            region: Arc::new(HeapRegion::new(layout.total_len())),
            semaphore: Arc::new(MemorySemaphore::new()),
        }
    }
}

impl std::fmt::Debug for SharedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLink")
            .field("region_len", &self.region.len())
            .field("holder", &self.semaphore.holder())
            .finish()
    }
}
