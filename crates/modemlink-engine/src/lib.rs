//! The modemlink transport engine.
//!
//! Two processors share one memory region guarded by a hardware semaphore
//! and poke each other with 32-bit mailbox words. This crate decodes those
//! words, arbitrates the semaphore, multiplexes the three logical channels
//! over their rings and runs the per-link state machine.
//!
//! Everything outside the transport (where messages go, how the mailbox is
//! raised, where buffers come from) is reached through the traits in
//! [`traits`] and [`arbiter::Semaphore`].

pub mod arbiter;
pub mod config;
#[cfg(feature = "async")]
pub mod driver;
pub mod engine;
pub mod error;
pub mod link;
pub mod loopback;
pub mod mailbox;
pub mod mux;
pub mod snapshot;
pub mod traits;

pub use arbiter::{Arbiter, ArbiterStats, MemorySemaphore, PeerRequest, Semaphore};
pub use config::{LinkConfig, DEFAULT_AUTHORITY_TIMEOUT_MS, DEFAULT_MIN_FRAGMENT};
#[cfg(feature = "async")]
pub use driver::{DriverInput, EngineDriver};
pub use engine::{EngineState, EngineStats, TransportEngine};
pub use error::{LinkError, Result};
pub use link::SharedLink;
pub use loopback::{pump, LoopbackPair, MailboxQueue, RecordingSink};
pub use mailbox::{BootMode, Command, DataFlags, HostOs, MailboxWord, Opcode};
pub use mux::{ChannelMux, LinkStats, ReadOutcome, FS_SEGMENT_SIZE};
pub use snapshot::{DebugSnapshot, RingSnapshot};
pub use traits::{LinkEvent, Message, Notifier, Route, Sink};
