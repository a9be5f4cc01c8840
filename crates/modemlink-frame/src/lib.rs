//! Framing for the shared-memory channels.
//!
//! Every message crossing a ring is wrapped as
//!
//! ```text
//! 0x7F | header | payload | 0x7E
//! ```
//!
//! where the header depends on the channel and its `len` field counts the
//! header plus the payload. Control messages larger than the space left in a
//! ring are split into fragments tagged with a 5-bit message id and put back
//! together by [`FragmentAssembler`].

pub mod alloc;
pub mod channel;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod reader;
pub mod writer;

pub use alloc::{HeapAllocator, LimitedAllocator, PacketAllocator};
pub use channel::Channel;
pub use codec::{
    decode_header, encode_frame, ControlByte, FrameHeader, FrameTag, END_MARKER, START_MARKER,
};
pub use error::{Corruption, FrameError, Result};
pub use fragment::{FragmentAssembler, DEFAULT_MAX_MESSAGE_SIZE, FRAGMENT_BLOCK_SIZE, MESSAGE_IDS};
pub use reader::{FrameReader, RawFrame};
pub use writer::FrameWriter;
