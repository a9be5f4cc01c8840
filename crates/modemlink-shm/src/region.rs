use std::sync::{Arc, Mutex, MutexGuard};

/// Byte-addressable memory shared with the peer processor.
///
/// Implementations provide interior mutability: the hardware semaphore, not
/// Rust's borrow checker, decides who may touch the region at any moment.
/// Offsets passed in are always produced by a validated [`RegionLayout`], so
/// implementations may treat an out-of-range access as a bug.
///
/// [`RegionLayout`]: crate::layout::RegionLayout
pub trait SharedRegion: Send + Sync {
    /// Total size of the region in bytes.
    fn len(&self) -> usize;

    /// Copy `dst.len()` bytes starting at `offset` out of the region.
    fn read_at(&self, offset: usize, dst: &mut [u8]);

    /// Copy `src` into the region starting at `offset`.
    fn write_at(&self, offset: usize, src: &[u8]);

    /// Whether the region has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a little-endian `u32` field.
    fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        self.read_at(offset, &mut raw);
        u32::from_le_bytes(raw)
    }

    /// Store a little-endian `u32` field.
    fn write_u32(&self, offset: usize, value: u32) {
        self.write_at(offset, &value.to_le_bytes());
    }

    /// Zero `len` bytes starting at `offset`.
    fn zero(&self, offset: usize, len: usize) {
        const CHUNK: usize = 256;
        let zeros = [0u8; CHUNK];
        let mut done = 0usize;
        while done < len {
            let n = (len - done).min(CHUNK);
            self.write_at(offset + done, &zeros[..n]);
            done += n;
        }
    }
}

/// Heap-backed region standing in for the hardware window.
///
/// Clones share the same bytes, so one `HeapRegion` can back both the
/// application-side and the modem-side engine in the same process.
#[derive(Clone)]
pub struct HeapRegion {
    bytes: Arc<Mutex<Box<[u8]>>>,
}

impl HeapRegion {
    /// Allocate a zero-filled region of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; len].into_boxed_slice())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        // A panic while holding the lock cannot leave the bytes in a state
        // worse than a peer scribbling over them, so poison is ignored.
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SharedRegion for HeapRegion {
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        let bytes = self.lock();
        dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
    }

    fn write_at(&self, offset: usize, src: &[u8]) {
        let mut bytes = self.lock();
        bytes[offset..offset + src.len()].copy_from_slice(src);
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bytes() {
        let a = HeapRegion::new(64);
        let b = a.clone();

        a.write_at(10, b"shared");
        let mut out = [0u8; 6];
        b.read_at(10, &mut out);

        assert_eq!(&out, b"shared");
    }

    #[test]
    fn u32_fields_are_little_endian() {
        let region = HeapRegion::new(16);
        region.write_u32(4, 0x1122_3344);

        let mut raw = [0u8; 4];
        region.read_at(4, &mut raw);
        assert_eq!(raw, [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(region.read_u32(4), 0x1122_3344);
    }

    #[test]
    fn zero_clears_range_larger_than_chunk() {
        let region = HeapRegion::new(1024);
        region.write_at(0, &[0xAB; 1024]);
        region.zero(100, 700);

        let mut out = vec![0u8; 1024];
        region.read_at(0, &mut out);
        assert!(out[..100].iter().all(|b| *b == 0xAB));
        assert!(out[100..800].iter().all(|b| *b == 0));
        assert!(out[800..].iter().all(|b| *b == 0xAB));
    }
}
