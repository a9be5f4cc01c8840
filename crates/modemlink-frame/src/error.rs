use crate::channel::Channel;

/// What made a frame unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// First byte was not the start marker.
    StartMarker(u8),
    /// Byte after the payload was not the end marker.
    EndMarker(u8),
    /// Header `len` smaller than the header itself.
    Length(usize),
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Corruption::StartMarker(b) => write!(f, "start marker 0x{b:02x}"),
            Corruption::EndMarker(b) => write!(f, "end marker 0x{b:02x}"),
            Corruption::Length(len) => write!(f, "length {len}"),
        }
    }
}

/// Errors that can occur during frame encoding, decoding and reassembly.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes in the ring do not form a valid frame.
    #[error("corrupt {channel} frame: bad {reason}")]
    CorruptFrame { channel: Channel, reason: Corruption },

    /// The ring holds fewer bytes than the frame header announces.
    #[error("truncated {channel} frame (need {needed} bytes, {available} pending)")]
    Truncated {
        channel: Channel,
        needed: usize,
        available: usize,
    },

    /// The outbound ring cannot take the whole frame.
    #[error("no space on {channel} ring (need {needed}, {available} free)")]
    NoSpace {
        channel: Channel,
        needed: usize,
        available: usize,
    },

    /// The packet allocator refused a buffer.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// A payload does not fit in one frame's 16-bit length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A reassembled message grew past the configured maximum.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl FrameError {
    /// Whether the inbound ring has lost frame sync and must be purged.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            FrameError::CorruptFrame { .. } | FrameError::Truncated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
