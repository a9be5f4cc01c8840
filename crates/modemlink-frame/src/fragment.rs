//! Reassembly of fragmented control messages.

use bytes::{Bytes, BytesMut};

use crate::alloc::PacketAllocator;
use crate::codec::ControlByte;
use crate::error::{FrameError, Result};

/// Payload bytes held per block of a partial message.
pub const FRAGMENT_BLOCK_SIZE: usize = 4096;

/// Number of distinct message ids (five bits of the control byte).
pub const MESSAGE_IDS: usize = 32;

/// Default ceiling on a reassembled control message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
struct FragmentList {
    blocks: Vec<BytesMut>,
    total: usize,
}

impl FragmentList {
    /// Append `payload`, topping up the last block first.
    ///
    /// Every new block is allocated before anything is copied, so a failed
    /// append leaves the list unchanged and the frame can be replayed.
    fn append(&mut self, payload: &[u8], alloc: &dyn PacketAllocator) -> Result<()> {
        let room = self
            .blocks
            .last()
            .map_or(0, |b| FRAGMENT_BLOCK_SIZE.saturating_sub(b.len()));
        let (head, rest) = payload.split_at(room.min(payload.len()));

        let mut fresh = Vec::with_capacity(rest.len().div_ceil(FRAGMENT_BLOCK_SIZE));
        for chunk in rest.chunks(FRAGMENT_BLOCK_SIZE) {
            let mut block = alloc
                .allocate(FRAGMENT_BLOCK_SIZE)
                .ok_or(FrameError::OutOfMemory {
                    requested: FRAGMENT_BLOCK_SIZE,
                })?;
            block.extend_from_slice(chunk);
            fresh.push(block);
        }

        if let Some(last) = self.blocks.last_mut() {
            last.extend_from_slice(head);
        }
        self.blocks.extend(fresh);
        self.total += payload.len();
        Ok(())
    }
}

/// Per-message-id chains of control fragments awaiting their final frame.
#[derive(Debug)]
pub struct FragmentAssembler {
    slots: [Option<FragmentList>; MESSAGE_IDS],
    max_message_size: usize,
}

impl FragmentAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Number of message ids with a partial chain.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Bytes held for message `id`, if a chain exists.
    pub fn pending_len(&self, id: u8) -> Option<usize> {
        self.slots
            .get(usize::from(id & ControlByte::ID_MASK))
            .and_then(|s| s.as_ref())
            .map(|l| l.total)
    }

    /// Drop every partial message.
    pub fn clear(&mut self) {
        let dropped = self.in_flight();
        self.slots.iter_mut().for_each(|s| *s = None);
        if dropped > 0 {
            tracing::debug!(dropped, "fragment chains cleared");
        }
    }

    fn discard_stale(&mut self, id: usize) {
        if let Some(stale) = self.slots[id].take() {
            tracing::warn!(id, stale_bytes = stale.total, "discarding stale reassembly");
        }
    }

    /// Store a non-final fragment.
    ///
    /// A fragment with `START` replaces whatever chain `id` held; one without
    /// it extends the chain, creating it if needed.
    pub fn on_fragment(
        &mut self,
        control: ControlByte,
        payload: &[u8],
        alloc: &dyn PacketAllocator,
    ) -> Result<()> {
        let id = usize::from(control.id());
        if control.is_start() {
            self.discard_stale(id);
        }

        let held = self.slots[id].as_ref().map_or(0, |l| l.total);
        let size = held + payload.len();
        if size > self.max_message_size {
            self.slots[id] = None;
            tracing::warn!(id, size, max = self.max_message_size, "control message too large");
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        let list = self.slots[id].get_or_insert_with(FragmentList::default);
        if let Err(err) = list.append(payload, alloc) {
            if list.total == 0 {
                self.slots[id] = None;
            }
            return Err(err);
        }
        tracing::trace!(id, len = payload.len(), total = size, "fragment stored");
        Ok(())
    }

    /// Complete message `id` with its final frame and return the whole message.
    pub fn on_final(
        &mut self,
        control: ControlByte,
        payload: &[u8],
        alloc: &dyn PacketAllocator,
    ) -> Result<Bytes> {
        let id = usize::from(control.id());
        if control.is_start() {
            self.discard_stale(id);
        }

        let list = self.slots[id].take();
        let held = list.as_ref().map_or(0, |l| l.total);
        let size = held + payload.len();
        if size > self.max_message_size {
            tracing::warn!(id, size, max = self.max_message_size, "control message too large");
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        let Some(mut buf) = alloc.allocate(size) else {
            self.slots[id] = list;
            return Err(FrameError::OutOfMemory { requested: size });
        };
        if let Some(list) = list {
            for block in &list.blocks {
                buf.extend_from_slice(block);
            }
        }
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{HeapAllocator, LimitedAllocator};

    fn first(id: u8) -> ControlByte {
        ControlByte::new(id, true, true)
    }

    fn middle(id: u8) -> ControlByte {
        ControlByte::new(id, false, true)
    }

    fn last(id: u8) -> ControlByte {
        ControlByte::new(id, false, false)
    }

    /// Split `message` into `chunk`-sized fragments and feed them through.
    fn reassemble(message: &[u8], chunk: usize) -> Bytes {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();
        let pieces: Vec<&[u8]> = message.chunks(chunk).collect();
        let (tail, body) = pieces.split_last().unwrap();
        for (i, piece) in body.iter().enumerate() {
            let control = if i == 0 { first(9) } else { middle(9) };
            asm.on_fragment(control, piece, &alloc).unwrap();
        }
        let control = if body.is_empty() {
            ControlByte::new(9, true, false)
        } else {
            last(9)
        };
        let out = asm.on_final(control, tail, &alloc).unwrap();
        assert_eq!(asm.in_flight(), 0);
        out
    }

    #[test]
    fn single_frame_fast_path() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();
        let out = asm.on_final(ControlByte::new(1, true, false), b"AT+CSQ", &alloc).unwrap();
        assert_eq!(&out[..], b"AT+CSQ");
    }

    #[test]
    fn reassembles_across_sizes() {
        let capacity = 8 * 1024;
        for size in [1, 100, 4095, 4096, 4097, 3 * capacity + 7, 10 * capacity] {
            let message: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            for chunk in [1000, 4096, 6000] {
                assert_eq!(reassemble(&message, chunk).to_vec(), message, "size {size} chunk {chunk}");
            }
        }
    }

    #[test]
    fn stale_chain_is_replaced_by_new_start() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();

        asm.on_fragment(first(3), b"AB", &alloc).unwrap();
        asm.on_fragment(first(3), b"CD", &alloc).unwrap();
        let out = asm.on_final(last(3), b"EF", &alloc).unwrap();

        assert_eq!(&out[..], b"CDEF");
    }

    #[test]
    fn stale_chain_without_start_is_joined() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();

        asm.on_fragment(middle(3), b"AB", &alloc).unwrap();
        asm.on_fragment(middle(3), b"CD", &alloc).unwrap();
        let out = asm.on_final(last(3), b"EF", &alloc).unwrap();

        assert_eq!(&out[..], b"ABCDEF");
    }

    #[test]
    fn fragments_without_start_bit_append() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();

        asm.on_fragment(middle(4), b"one ", &alloc).unwrap();
        asm.on_fragment(middle(4), b"two ", &alloc).unwrap();
        let out = asm.on_final(last(4), b"three", &alloc).unwrap();

        assert_eq!(&out[..], b"one two three");
    }

    #[test]
    fn interleaved_ids_stay_separate() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();

        asm.on_fragment(first(1), b"a1", &alloc).unwrap();
        asm.on_fragment(first(2), b"b1", &alloc).unwrap();
        asm.on_fragment(middle(1), b"a2", &alloc).unwrap();
        assert_eq!(asm.in_flight(), 2);
        assert_eq!(asm.pending_len(1), Some(4));

        assert_eq!(&asm.on_final(last(2), b"b2", &alloc).unwrap()[..], b"b1b2");
        assert_eq!(&asm.on_final(last(1), b"a3", &alloc).unwrap()[..], b"a1a2a3");
    }

    #[test]
    fn oom_on_first_fragment_leaves_no_chain() {
        let alloc = LimitedAllocator::new(0);
        let mut asm = FragmentAssembler::default();

        let err = asm.on_fragment(first(7), b"xyz", &alloc).unwrap_err();
        assert!(matches!(err, FrameError::OutOfMemory { .. }));
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn oom_on_final_keeps_chain_for_retry() {
        let alloc = LimitedAllocator::new(1);
        let mut asm = FragmentAssembler::default();

        asm.on_fragment(first(7), b"head-", &alloc).unwrap();
        assert!(asm.on_final(last(7), b"tail", &alloc).is_err());
        assert_eq!(asm.pending_len(7), Some(5));

        alloc.refill(1);
        let out = asm.on_final(last(7), b"tail", &alloc).unwrap();
        assert_eq!(&out[..], b"head-tail");
    }

    #[test]
    fn oversized_message_is_dropped() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::new(8);

        asm.on_fragment(first(0), b"12345", &alloc).unwrap();
        let err = asm.on_fragment(middle(0), b"6789", &alloc).unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLarge { size: 9, max: 8 }));
        assert_eq!(asm.in_flight(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let alloc = HeapAllocator::new();
        let mut asm = FragmentAssembler::default();
        asm.on_fragment(first(0), b"a", &alloc).unwrap();
        asm.on_fragment(first(31), b"b", &alloc).unwrap();

        asm.clear();
        assert_eq!(asm.in_flight(), 0);
    }
}
