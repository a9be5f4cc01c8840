use std::time::Duration;

use modemlink_frame::{Channel, FrameError};
use modemlink_shm::ShmError;

/// Errors surfaced by the transport engine.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The outbound ring for a channel cannot take the next frame.
    #[error("no space on {channel} ring")]
    NoSpace { channel: Channel },

    /// The inbound ring lost frame sync and was purged.
    #[error("corrupt frame on {channel} ring: {source}")]
    CorruptFrame {
        channel: Channel,
        #[source]
        source: FrameError,
    },

    /// The packet allocator refused a buffer; the frame stays in the ring.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The semaphore was not obtained before the deadline.
    #[error("timed out after {0:?} waiting for shared-memory authority")]
    AuthorityTimeout(Duration),

    /// A caller-supplied value is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine has been closed.
    #[error("link closed")]
    Closed,

    /// Other framing failure.
    #[error(transparent)]
    Frame(FrameError),

    /// Region layout or mapping failure.
    #[error("shared region error: {0}")]
    Shm(#[from] ShmError),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::NoSpace { .. }
                | LinkError::OutOfMemory { .. }
                | LinkError::AuthorityTimeout(_)
        )
    }
}

impl From<FrameError> for LinkError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::NoSpace { channel, .. } => LinkError::NoSpace { channel },
            FrameError::OutOfMemory { requested } => LinkError::OutOfMemory { requested },
            FrameError::CorruptFrame { channel, .. } | FrameError::Truncated { channel, .. } => {
                LinkError::CorruptFrame {
                    channel,
                    source: err,
                }
            }
            other => LinkError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_map_to_link_errors() {
        let err: LinkError = FrameError::NoSpace {
            channel: Channel::RawData,
            needed: 10,
            available: 2,
        }
        .into();
        assert!(matches!(err, LinkError::NoSpace { channel: Channel::RawData }));
        assert!(err.is_transient());

        let err: LinkError = FrameError::Truncated {
            channel: Channel::FsRelay,
            needed: 9,
            available: 1,
        }
        .into();
        assert!(matches!(err, LinkError::CorruptFrame { channel: Channel::FsRelay, .. }));
        assert!(!err.is_transient());

        let err: LinkError = FrameError::MessageTooLarge { size: 9, max: 8 }.into();
        assert!(matches!(err, LinkError::Frame(_)));
    }
}
