use bytes::BytesMut;
use modemlink_shm::RingBuffer;

use crate::channel::Channel;
use crate::codec::{encode_frame, FrameTag};
use crate::error::{FrameError, Result};

/// Encodes frames into one reusable scratch buffer and commits them to a ring.
///
/// A frame is only written when the ring has room for all of it, so the peer
/// never observes a partial frame.
#[derive(Debug)]
pub struct FrameWriter {
    scratch: BytesMut,
}

impl FrameWriter {
    /// Writer whose scratch buffer fits any frame of a ring of `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            scratch: BytesMut::with_capacity(capacity),
        }
    }

    /// Frame `payload` with `tag` and write it. Returns the bytes written.
    pub fn write_frame(
        &mut self,
        ring: &mut RingBuffer,
        tag: FrameTag,
        payload: &[u8],
    ) -> Result<usize> {
        let channel = tag.channel();
        let needed = payload.len() + channel.overhead();
        let available = ring.space_available();
        if needed > available {
            return Err(FrameError::NoSpace {
                channel,
                needed,
                available,
            });
        }

        self.scratch.clear();
        encode_frame(tag, payload, &mut self.scratch)?;
        let written = ring.write(&self.scratch);
        tracing::trace!(%channel, written, "frame written");
        Ok(written)
    }

    /// Write bytes that are already framed. All or nothing.
    pub fn write_preframed(&mut self, ring: &mut RingBuffer, bytes: &[u8]) -> Result<usize> {
        let available = ring.space_available();
        if bytes.len() > available {
            return Err(FrameError::NoSpace {
                channel: Channel::from_index(ring.index()).unwrap_or(Channel::Control),
                needed: bytes.len(),
                available,
            });
        }
        Ok(ring.write(bytes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use modemlink_shm::{HeapRegion, RegionLayout, SharedRegion, Side};

    use super::*;
    use crate::codec::ControlByte;
    use crate::reader::FrameReader;

    fn rings(size: usize) -> (RingBuffer, RingBuffer) {
        let layout = RegionLayout::builder().ring(size).build().unwrap();
        let region: Arc<dyn SharedRegion> = Arc::new(HeapRegion::new(layout.total_len()));
        let ring = layout.rings()[0];
        (
            RingBuffer::new(Arc::clone(&region), &ring, Side::Application),
            RingBuffer::new(region, &ring, Side::Modem),
        )
    }

    #[test]
    fn written_frame_is_readable_by_peer() {
        let (mut ap, mut cp) = rings(128);
        let mut writer = FrameWriter::new(128);
        let tag = FrameTag::Control(ControlByte::new(3, true, false));

        assert_eq!(writer.write_frame(&mut ap, tag, b"ATZ").unwrap(), 8);

        let mut reader = FrameReader::new(128);
        let frame = reader.read_frame(&mut cp, Channel::Control).unwrap().unwrap();
        assert_eq!(frame.header.tag, tag);
        assert_eq!(frame.payload, b"ATZ");
    }

    #[test]
    fn exact_fit_then_no_space() {
        let (mut ap, _cp) = rings(64);
        let mut writer = FrameWriter::new(64);
        let payload = vec![0u8; 63 - Channel::FsRelay.overhead()];

        writer.write_frame(&mut ap, FrameTag::FsRelay, &payload).unwrap();
        assert_eq!(ap.space_available(), 0);

        let err = writer.write_frame(&mut ap, FrameTag::FsRelay, b"x").unwrap_err();
        assert!(matches!(err, FrameError::NoSpace { needed: 5, available: 0, .. }));
        assert_eq!(ap.outbound_pending(), 63);
    }

    #[test]
    fn preframed_bytes_pass_through() {
        let (mut ap, mut cp) = rings(64);
        let mut writer = FrameWriter::new(64);
        writer
            .write_preframed(&mut ap, &[0x7F, 0x05, 0x00, 0x00, b'h', b'i', 0x7E])
            .unwrap();

        let mut reader = FrameReader::new(64);
        let frame = reader.read_frame(&mut cp, Channel::Control).unwrap().unwrap();
        assert_eq!(frame.payload, b"hi");
    }
}
