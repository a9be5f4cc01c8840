use bytes::{BufMut, BytesMut};

use crate::channel::Channel;
use crate::error::{Corruption, FrameError, Result};

/// First byte of every frame.
pub const START_MARKER: u8 = 0x7F;

/// Last byte of every frame.
pub const END_MARKER: u8 = 0x7E;

/// The control channel's one-byte fragment descriptor.
///
/// ```text
///   7      6      5     4..0
/// ┌──────┬───────┬─────┬────────────┐
/// │ MORE │ START │  -  │ message id │
/// └──────┴───────┴─────┴────────────┘
/// ```
///
/// A byte without `MORE` ends its message. `START` marks the first frame of a
/// message; peers that never set it are still reassembled correctly.
/// Only a `START` fragment supersedes a leftover chain under the same id.
/// Without it a stale fragment and the next message's fragments are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlByte(u8);

impl ControlByte {
    pub const ID_MASK: u8 = 0x1F;
    pub const START: u8 = 0x40;
    pub const MORE: u8 = 0x80;

    /// Build a control byte. `id` is reduced to its low five bits.
    pub fn new(id: u8, start: bool, more: bool) -> Self {
        let mut raw = id & Self::ID_MASK;
        if start {
            raw |= Self::START;
        }
        if more {
            raw |= Self::MORE;
        }
        Self(raw)
    }

    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn id(self) -> u8 {
        self.0 & Self::ID_MASK
    }

    pub fn is_start(self) -> bool {
        self.0 & Self::START != 0
    }

    pub fn has_more(self) -> bool {
        self.0 & Self::MORE != 0
    }

    pub fn is_final(self) -> bool {
        !self.has_more()
    }
}

/// Channel-specific header contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Control(ControlByte),
    Raw { sub_channel: u8 },
    FsRelay,
}

impl FrameTag {
    /// The channel a frame with this tag travels on.
    pub fn channel(self) -> Channel {
        match self {
            FrameTag::Control(_) => Channel::Control,
            FrameTag::Raw { .. } => Channel::RawData,
            FrameTag::FsRelay => Channel::FsRelay,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: FrameTag,
    /// Header plus payload, as carried on the wire.
    pub len: usize,
}

impl FrameHeader {
    pub fn channel(&self) -> Channel {
        self.tag.channel()
    }

    pub fn payload_len(&self) -> usize {
        self.len - self.channel().header_size()
    }

    /// Bytes the whole frame occupies in the ring, markers included.
    pub fn frame_len(&self) -> usize {
        self.len + 2
    }
}

/// Encode one frame into `dst`.
///
/// Wire format (control channel shown):
/// ```text
/// ┌──────┬────────────┬─────────┬──────────────┬──────┐
/// │ 0x7F │ len (2B LE)│ control │ payload      │ 0x7E │
/// └──────┴────────────┴─────────┴──────────────┴──────┘
/// ```
/// Raw frames carry `sub_channel` and a zero reserved byte in place of the
/// control byte; fs-relay frames carry only `len`.
pub fn encode_frame(tag: FrameTag, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let channel = tag.channel();
    if payload.len() > channel.max_payload() {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: channel.max_payload(),
        });
    }

    let len = channel.header_size() + payload.len();
    dst.reserve(len + 2);
    dst.put_u8(START_MARKER);
    dst.put_u16_le(len as u16);
    match tag {
        FrameTag::Control(control) => dst.put_u8(control.raw()),
        FrameTag::Raw { sub_channel } => {
            dst.put_u8(sub_channel);
            dst.put_u8(0);
        }
        FrameTag::FsRelay => {}
    }
    dst.put_slice(payload);
    dst.put_u8(END_MARKER);
    Ok(())
}

/// Decode the start marker and header at the front of `bytes`.
///
/// `bytes` must hold at least `1 + channel.header_size()` bytes.
pub fn decode_header(channel: Channel, bytes: &[u8]) -> Result<FrameHeader> {
    if let Some(&first) = bytes.first() {
        if first != START_MARKER {
            return Err(FrameError::CorruptFrame {
                channel,
                reason: Corruption::StartMarker(first),
            });
        }
    }

    let needed = 1 + channel.header_size();
    if bytes.len() < needed {
        return Err(FrameError::Truncated {
            channel,
            needed,
            available: bytes.len(),
        });
    }

    let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
    if len < channel.header_size() {
        return Err(FrameError::CorruptFrame {
            channel,
            reason: Corruption::Length(len),
        });
    }

    let tag = match channel {
        Channel::Control => FrameTag::Control(ControlByte::from_raw(bytes[3])),
        Channel::RawData => FrameTag::Raw {
            sub_channel: bytes[3],
        },
        Channel::FsRelay => FrameTag::FsRelay,
    };

    Ok(FrameHeader { tag, len })
}
