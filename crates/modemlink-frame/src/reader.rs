use modemlink_shm::RingBuffer;

use crate::channel::Channel;
use crate::codec::{decode_header, FrameHeader, END_MARKER};
use crate::error::{Corruption, FrameError, Result};

/// Largest start-marker-plus-header prefix of any channel.
const MAX_PREFIX: usize = 5;

/// A frame read out of a ring. The payload borrows the reader's scratch buffer.
#[derive(Debug)]
pub struct RawFrame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

/// Pulls whole frames out of a channel's inbound ring.
///
/// The writer always commits complete frames under the semaphore, so a frame
/// that is cut short or lacks its end marker means the ring has lost sync.
/// The reader reports that and leaves recovery (purge) to the caller.
#[derive(Debug)]
pub struct FrameReader {
    scratch: Vec<u8>,
}

impl FrameReader {
    /// Reader whose scratch buffer can hold a frame from a ring of `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Read the next frame from `ring`, or `None` when nothing is pending.
    ///
    /// On error the ring's read position is left wherever decoding stopped.
    pub fn read_frame<'a>(
        &'a mut self,
        ring: &mut RingBuffer,
        channel: Channel,
    ) -> Result<Option<RawFrame<'a>>> {
        let pending = ring.bytes_pending();
        if pending == 0 {
            return Ok(None);
        }

        let prefix_len = 1 + channel.header_size();
        let mut prefix = [0u8; MAX_PREFIX];
        let got = ring.read(&mut prefix[..prefix_len.min(pending)]);
        let header = decode_header(channel, &prefix[..got])?;

        let body = header.payload_len() + 1;
        let available = ring.bytes_pending();
        if body > available {
            return Err(FrameError::Truncated {
                channel,
                needed: body,
                available,
            });
        }

        self.scratch.clear();
        self.scratch.resize(body, 0);
        ring.read(&mut self.scratch);

        let end = self.scratch[body - 1];
        if end != END_MARKER {
            return Err(FrameError::CorruptFrame {
                channel,
                reason: Corruption::EndMarker(end),
            });
        }

        tracing::trace!(%channel, len = header.payload_len(), "frame read");
        Ok(Some(RawFrame {
            header,
            payload: &self.scratch[..body - 1],
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::BytesMut;
    use modemlink_shm::{HeapRegion, RegionLayout, SharedRegion, Side};

    use super::*;
    use crate::codec::{encode_frame, ControlByte, FrameTag};

    fn rings(size: usize) -> (RingBuffer, RingBuffer) {
        let layout = RegionLayout::builder().ring(size).build().unwrap();
        let region: Arc<dyn SharedRegion> = Arc::new(HeapRegion::new(layout.total_len()));
        let ring = layout.rings()[0];
        (
            RingBuffer::new(Arc::clone(&region), &ring, Side::Application),
            RingBuffer::new(region, &ring, Side::Modem),
        )
    }

    fn put(ring: &mut RingBuffer, tag: FrameTag, payload: &[u8]) {
        let mut buf = BytesMut::new();
        encode_frame(tag, payload, &mut buf).unwrap();
        assert_eq!(ring.write(&buf), buf.len());
    }

    #[test]
    fn reads_consecutive_frames() {
        let (mut ap, mut cp) = rings(256);
        put(&mut cp, FrameTag::Raw { sub_channel: 2 }, b"first");
        put(&mut cp, FrameTag::Raw { sub_channel: 5 }, b"second");

        let mut reader = FrameReader::new(256);
        let f = reader.read_frame(&mut ap, Channel::RawData).unwrap().unwrap();
        assert_eq!(f.header.tag, FrameTag::Raw { sub_channel: 2 });
        assert_eq!(f.payload, b"first");

        let f = reader.read_frame(&mut ap, Channel::RawData).unwrap().unwrap();
        assert_eq!(f.payload, b"second");
        assert!(reader.read_frame(&mut ap, Channel::RawData).unwrap().is_none());
    }

    #[test]
    fn reads_frame_across_wrap() {
        let (mut ap, mut cp) = rings(64);
        let mut reader = FrameReader::new(64);
        let control = FrameTag::Control(ControlByte::new(0, true, false));

        put(&mut cp, control, &[1u8; 40]);
        reader.read_frame(&mut ap, Channel::Control).unwrap().unwrap();
        put(&mut cp, control, &[2u8; 40]);

        let f = reader.read_frame(&mut ap, Channel::Control).unwrap().unwrap();
        assert_eq!(f.payload, &[2u8; 40][..]);
    }

    #[test]
    fn garbage_is_corrupt() {
        let (mut ap, mut cp) = rings(64);
        cp.write(&[0xAA, 0x05, 0x00]);

        let mut reader = FrameReader::new(64);
        let err = reader.read_frame(&mut ap, Channel::Control).unwrap_err();
        assert!(matches!(
            err,
            FrameError::CorruptFrame {
                reason: Corruption::StartMarker(0xAA),
                ..
            }
        ));
    }

    #[test]
    fn missing_end_marker_is_corrupt() {
        let (mut ap, mut cp) = rings(64);
        cp.write(&[0x7F, 0x04, 0x00, b'a', b'b', 0x00]);

        let mut reader = FrameReader::new(64);
        let err = reader.read_frame(&mut ap, Channel::FsRelay).unwrap_err();
        assert!(matches!(
            err,
            FrameError::CorruptFrame {
                reason: Corruption::EndMarker(0x00),
                ..
            }
        ));
    }

    #[test]
    fn frame_longer_than_pending_is_truncated() {
        let (mut ap, mut cp) = rings(64);
        cp.write(&[0x7F, 0x20, 0x00, 0x01, b'x']);

        let mut reader = FrameReader::new(64);
        let err = reader.read_frame(&mut ap, Channel::Control).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
        assert!(err.is_corrupt());
    }
}
