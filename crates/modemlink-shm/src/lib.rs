//! Shared-region layout and ring buffers.
//!
//! The application processor and the modem share one fixed memory region.
//! It is partitioned into a small metadata header, a control sub-structure
//! holding every channel's ring indices, and per-channel outbound/inbound
//! data ranges whose sizes are powers of two.
//!
//! This is the lowest layer of modemlink. All wraparound arithmetic lives in
//! [`ring`]; nothing above it touches raw offsets.

pub mod error;
pub mod layout;
pub mod region;
pub mod ring;

#[cfg(unix)]
pub mod mapped;

pub use error::{Result, ShmError};
pub use layout::{LayoutBuilder, RegionLayout, RingLayout, Side, DATA_START, REGION_MAGIC};
pub use region::{HeapRegion, SharedRegion};
pub use ring::{RingBuffer, RingIndices};

#[cfg(unix)]
pub use mapped::MappedRegion;
