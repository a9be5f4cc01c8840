//! Shared-memory transport between a modem (CP) and an application
//! processor (AP).
//!
//! Both processors map one memory region holding a ring buffer pair per
//! logical channel. A hardware semaphore serializes access and 32-bit
//! mailbox words tell the other side what changed.
//!
//! # Crate Structure
//!
//! - [`shm`]: the shared region, its layout and the ring buffers
//! - [`frame`]: channel ids, frame codec and control-message reassembly
//! - [`engine`]: mailbox codec, semaphore arbitration, channel mux and the
//!   per-link [`TransportEngine`]
//!
//! ```
//! use modemlink::{LinkConfig, LoopbackPair, Message};
//!
//! let mut pair = LoopbackPair::open(&LinkConfig::default()).unwrap();
//! pair.app.submit(Message::control(&b"AT"[..])).unwrap();
//! pair.app.flush().unwrap();
//! pair.pump().unwrap();
//! assert_eq!(pair.modem_sink.messages(), vec![Message::control(&b"AT"[..])]);
//! ```

/// Re-export region and ring types.
pub mod shm {
    pub use modemlink_shm::*;
}

/// Re-export frame types.
pub mod frame {
    pub use modemlink_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use modemlink_engine::*;
}

pub use modemlink_engine::{
    DebugSnapshot, LinkConfig, LinkError, LinkEvent, LoopbackPair, Message, Notifier, Route,
    SharedLink, Sink, TransportEngine,
};
pub use modemlink_frame::{Channel, PacketAllocator};
pub use modemlink_shm::{SharedRegion, Side};

#[cfg(feature = "async")]
pub use modemlink_engine::EngineDriver;
