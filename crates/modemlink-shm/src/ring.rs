//! Ring buffers over the shared region.
//!
//! Each channel owns one outbound and one inbound ring. The writer of a ring
//! advances its head, the reader advances its tail. One slot is always left
//! free, so a ring of capacity `n` holds at most `n - 1` bytes and
//! `head == tail` means empty.

use std::sync::Arc;

use crate::layout::{RingLayout, Side, IN_HEAD, IN_TAIL, OUT_HEAD, OUT_TAIL};
use crate::region::SharedRegion;

#[inline]
fn circ_cnt(head: usize, tail: usize, size: usize) -> usize {
    head.wrapping_sub(tail) & (size - 1)
}

#[inline]
fn circ_space(head: usize, tail: usize, size: usize) -> usize {
    tail.wrapping_sub(head).wrapping_sub(1) & (size - 1)
}

/// Bytes readable before the tail wraps.
#[inline]
fn cnt_to_end(head: usize, tail: usize, size: usize) -> usize {
    let end = size - tail;
    let n = (head + end) & (size - 1);
    n.min(end)
}

/// Bytes writable before the head wraps.
#[inline]
fn space_to_end(head: usize, tail: usize, size: usize) -> usize {
    let end = size - 1 - head;
    let n = (end + tail) & (size - 1);
    if n <= end {
        n
    } else {
        end + 1
    }
}

/// Where one direction of a ring lives in the region.
#[derive(Debug, Clone, Copy)]
struct Direction {
    data: usize,
    head: usize,
    tail: usize,
}

/// Point-in-time copy of a ring's indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingIndices {
    pub size: usize,
    pub out_head: usize,
    pub out_tail: usize,
    pub in_head: usize,
    pub in_tail: usize,
}

impl RingIndices {
    /// Bytes written by this side and not yet consumed by the peer.
    pub fn out_pending(&self) -> usize {
        circ_cnt(self.out_head, self.out_tail, self.size)
    }

    /// Bytes written by the peer and not yet consumed by this side.
    pub fn in_pending(&self) -> usize {
        circ_cnt(self.in_head, self.in_tail, self.size)
    }
}

/// One channel's pair of rings, viewed from one [`Side`].
pub struct RingBuffer {
    region: Arc<dyn SharedRegion>,
    index: usize,
    size: usize,
    out: Direction,
    inbound: Direction,
}

impl RingBuffer {
    /// View the ring described by `layout` from `side`.
    ///
    /// The layout must already have been validated against `region`.
    pub fn new(region: Arc<dyn SharedRegion>, layout: &RingLayout, side: Side) -> Self {
        let ctrl = layout.control_offset;
        let app_out = Direction {
            data: layout.out_offset,
            head: ctrl + OUT_HEAD,
            tail: ctrl + OUT_TAIL,
        };
        let app_in = Direction {
            data: layout.in_offset,
            head: ctrl + IN_HEAD,
            tail: ctrl + IN_TAIL,
        };
        let (out, inbound) = match side {
            Side::Application => (app_out, app_in),
            Side::Modem => (app_in, app_out),
        };
        Self {
            region,
            index: layout.index,
            size: layout.size,
            out,
            inbound,
        }
    }

    /// Ring position in the layout.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity of each direction in bytes.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Largest number of bytes one direction can hold.
    pub fn usable_capacity(&self) -> usize {
        self.size - 1
    }

    // Indices come from memory the peer also writes; mask them so a bad
    // value can never address outside the data range.
    fn load(&self, offset: usize) -> usize {
        self.region.read_u32(offset) as usize & (self.size - 1)
    }

    fn store(&self, offset: usize, value: usize) {
        self.region.write_u32(offset, (value & (self.size - 1)) as u32);
    }

    /// Free bytes in the outbound ring.
    pub fn space_available(&self) -> usize {
        circ_space(self.load(self.out.head), self.load(self.out.tail), self.size)
    }

    /// Bytes waiting in the inbound ring.
    pub fn bytes_pending(&self) -> usize {
        circ_cnt(
            self.load(self.inbound.head),
            self.load(self.inbound.tail),
            self.size,
        )
    }

    /// Bytes in the outbound ring the peer has not consumed yet.
    pub fn outbound_pending(&self) -> usize {
        circ_cnt(self.load(self.out.head), self.load(self.out.tail), self.size)
    }

    /// Free bytes in the inbound ring (space the peer may still write).
    pub fn inbound_free(&self) -> usize {
        circ_space(
            self.load(self.inbound.head),
            self.load(self.inbound.tail),
            self.size,
        )
    }

    /// Copy as much of `buf` as fits into the outbound ring.
    ///
    /// Returns the number of bytes written. Callers check
    /// [`space_available`](Self::space_available) first when a partial write
    /// is not acceptable.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let mut head = self.load(self.out.head);
        let tail = self.load(self.out.tail);
        let mut written = 0usize;

        while written < buf.len() {
            let n = space_to_end(head, tail, self.size).min(buf.len() - written);
            if n == 0 {
                break;
            }
            self.region
                .write_at(self.out.data + head, &buf[written..written + n]);
            head = (head + n) & (self.size - 1);
            written += n;
        }

        self.store(self.out.head, head);
        tracing::trace!(ring = self.index, written, head, "ring write");
        written
    }

    /// Copy up to `dst.len()` pending inbound bytes into `dst`.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let head = self.load(self.inbound.head);
        let mut tail = self.load(self.inbound.tail);
        let mut read = 0usize;

        while read < dst.len() {
            let n = cnt_to_end(head, tail, self.size).min(dst.len() - read);
            if n == 0 {
                break;
            }
            self.region
                .read_at(self.inbound.data + tail, &mut dst[read..read + n]);
            tail = (tail + n) & (self.size - 1);
            read += n;
        }

        self.store(self.inbound.tail, tail);
        tracing::trace!(ring = self.index, read, tail, "ring read");
        read
    }

    /// Discard up to `n` pending inbound bytes. Returns the count discarded.
    pub fn skip(&mut self, n: usize) -> usize {
        let tail = self.load(self.inbound.tail);
        let n = n.min(self.bytes_pending());
        self.store(self.inbound.tail, tail + n);
        n
    }

    /// Current inbound read position, for a later [`rewind_inbound`](Self::rewind_inbound).
    pub fn inbound_tail(&self) -> usize {
        self.load(self.inbound.tail)
    }

    /// Move the inbound read position back to a saved tail.
    pub fn rewind_inbound(&mut self, tail: usize) {
        self.store(self.inbound.tail, tail);
    }

    /// Drop everything pending inbound. Returns the number of bytes dropped.
    pub fn purge_inbound(&mut self) -> usize {
        let dropped = self.bytes_pending();
        let head = self.load(self.inbound.head);
        self.store(self.inbound.tail, head);
        dropped
    }

    /// Zero all four indices.
    pub fn reset(&mut self) {
        for offset in [self.out.head, self.out.tail, self.inbound.head, self.inbound.tail] {
            self.region.write_u32(offset, 0);
        }
    }

    /// Read all four indices from this side's point of view.
    pub fn snapshot(&self) -> RingIndices {
        RingIndices {
            size: self.size,
            out_head: self.load(self.out.head),
            out_tail: self.load(self.out.tail),
            in_head: self.load(self.inbound.head),
            in_tail: self.load(self.inbound.tail),
        }
    }

    /// Move pending outbound bytes into the inbound ring as if the peer had
    /// echoed them.
    ///
    /// Copies at most the inbound free space; whatever is copied is marked
    /// consumed on the outbound side. Returns the number of bytes moved.
    pub fn loopback(&mut self) -> usize {
        let out_head = self.load(self.out.head);
        let mut out_tail = self.load(self.out.tail);
        let mut in_head = self.load(self.inbound.head);
        let in_tail = self.load(self.inbound.tail);

        let total = circ_cnt(out_head, out_tail, self.size)
            .min(circ_space(in_head, in_tail, self.size));
        let mut chunk = [0u8; 256];
        let mut moved = 0usize;

        while moved < total {
            let n = cnt_to_end(out_head, out_tail, self.size)
                .min(space_to_end(in_head, in_tail, self.size))
                .min(chunk.len())
                .min(total - moved);
            self.region
                .read_at(self.out.data + out_tail, &mut chunk[..n]);
            self.region
                .write_at(self.inbound.data + in_head, &chunk[..n]);
            out_tail = (out_tail + n) & (self.size - 1);
            in_head = (in_head + n) & (self.size - 1);
            moved += n;
        }

        self.store(self.out.tail, out_tail);
        self.store(self.inbound.head, in_head);
        tracing::debug!(ring = self.index, moved, "ring loopback");
        moved
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("indices", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RegionLayout;
    use crate::region::HeapRegion;

    fn pair(size: usize) -> (RingBuffer, RingBuffer) {
        let layout = RegionLayout::builder().ring(size).build().unwrap();
        let region = HeapRegion::new(layout.total_len());
        layout.initialize(&region).unwrap();
        let region: Arc<dyn SharedRegion> = Arc::new(region);
        let ring = layout.rings()[0];
        (
            RingBuffer::new(Arc::clone(&region), &ring, Side::Application),
            RingBuffer::new(region, &ring, Side::Modem),
        )
    }

    #[test]
    fn circ_helpers_match_kernel_semantics() {
        assert_eq!(circ_cnt(5, 3, 16), 2);
        assert_eq!(circ_cnt(1, 14, 16), 3);
        assert_eq!(circ_space(0, 0, 16), 15);
        assert_eq!(circ_space(15, 0, 16), 0);
        assert_eq!(cnt_to_end(2, 14, 16), 2);
        assert_eq!(space_to_end(14, 3, 16), 2);
        assert_eq!(space_to_end(14, 0, 16), 1);
    }

    #[test]
    fn peer_reads_what_this_side_writes() {
        let (mut ap, mut cp) = pair(64);

        assert_eq!(ap.write(b"hello modem"), 11);
        assert_eq!(ap.outbound_pending(), 11);
        assert_eq!(cp.bytes_pending(), 11);

        let mut out = [0u8; 11];
        assert_eq!(cp.read(&mut out), 11);
        assert_eq!(&out, b"hello modem");
        assert_eq!(ap.outbound_pending(), 0);
        assert_eq!(cp.bytes_pending(), 0);
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let (mut ap, mut cp) = pair(16);
        let mut sink = [0u8; 10];

        ap.write(&[1u8; 10]);
        cp.read(&mut sink);

        let payload: Vec<u8> = (0u8..12).collect();
        assert_eq!(ap.write(&payload), 12);
        let snap = ap.snapshot();
        assert!(snap.out_head < snap.out_tail, "head should have wrapped");

        let mut out = [0u8; 12];
        assert_eq!(cp.read(&mut out), 12);
        assert_eq!(out.to_vec(), payload);
    }

    #[test]
    fn full_ring_accepts_capacity_minus_one() {
        let (mut ap, _cp) = pair(32);

        assert_eq!(ap.space_available(), 31);
        assert_eq!(ap.write(&[7u8; 31]), 31);
        assert_eq!(ap.space_available(), 0);
        assert_eq!(ap.write(&[8u8]), 0);
        assert_eq!(ap.write(&[]), 0);
    }

    #[test]
    fn queries_are_idempotent() {
        let (mut ap, cp) = pair(64);
        ap.write(b"abc");

        for _ in 0..3 {
            assert_eq!(ap.space_available(), 60);
            assert_eq!(cp.bytes_pending(), 3);
        }
        assert_eq!(ap.snapshot(), ap.snapshot());
    }

    #[test]
    fn loopback_round_trips_bytes() {
        let (mut ap, _cp) = pair(64);
        let payload: Vec<u8> = (0u8..40).collect();

        ap.write(&payload);
        assert_eq!(ap.loopback(), 40);
        assert_eq!(ap.outbound_pending(), 0);
        assert_eq!(ap.bytes_pending(), 40);

        let mut out = vec![0u8; 40];
        assert_eq!(ap.read(&mut out), 40);
        assert_eq!(out, payload);
    }

    #[test]
    fn skip_purge_and_rewind() {
        let (mut ap, mut cp) = pair(64);
        cp.write(b"0123456789");

        let saved = ap.inbound_tail();
        assert_eq!(ap.skip(4), 4);
        assert_eq!(ap.bytes_pending(), 6);
        ap.rewind_inbound(saved);
        assert_eq!(ap.bytes_pending(), 10);
        assert_eq!(ap.skip(100), 10);

        cp.write(b"xyz");
        assert_eq!(ap.purge_inbound(), 3);
        assert_eq!(ap.bytes_pending(), 0);
    }

    #[test]
    fn corrupt_index_is_masked() {
        let layout = RegionLayout::builder().ring(16).build().unwrap();
        let region = HeapRegion::new(layout.total_len());
        let ring = layout.rings()[0];
        region.write_u32(ring.control_offset + IN_HEAD, 0xFFFF_FF03);
        let ap = RingBuffer::new(Arc::new(region), &ring, Side::Application);

        assert_eq!(ap.snapshot().in_head, 3);
        assert_eq!(ap.bytes_pending(), 3);
    }

    #[test]
    fn reset_zeroes_indices() {
        let (mut ap, mut cp) = pair(64);
        ap.write(b"pending");
        cp.write(b"also");

        ap.reset();
        assert_eq!(ap.snapshot(), RingIndices { size: 64, ..Default::default() });
        assert_eq!(cp.bytes_pending(), 0);
    }
}
