//! Capabilities the engine needs from its surroundings.

use bytes::Bytes;
use modemlink_frame::Channel;
use serde::Serialize;

/// Where a message goes (outbound) or came from (inbound).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "channel", rename_all = "kebab-case")]
pub enum Route {
    Control,
    Raw { sub_channel: u8 },
    FsRelay,
}

impl Route {
    pub fn channel(self) -> Channel {
        match self {
            Route::Control => Channel::Control,
            Route::Raw { .. } => Channel::RawData,
            Route::FsRelay => Channel::FsRelay,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Raw { sub_channel } => write!(f, "raw/{sub_channel}"),
            other => f.write_str(other.channel().name()),
        }
    }
}

/// A whole message (or, for fs-relay, one page-sized segment of one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub route: Route,
    pub payload: Bytes,
    /// False only on non-final fs-relay segments.
    pub end_of_message: bool,
}

impl Message {
    pub fn new(route: Route, payload: impl Into<Bytes>) -> Self {
        Self {
            route,
            payload: payload.into(),
            end_of_message: true,
        }
    }

    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self::new(Route::Control, payload)
    }

    pub fn raw(sub_channel: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(Route::Raw { sub_channel }, payload)
    }

    pub fn fs_relay(payload: impl Into<Bytes>) -> Self {
        Self::new(Route::FsRelay, payload)
    }
}

/// Link-level notifications raised by peer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LinkEvent {
    /// The peer announced it started (`PHONE_START`); `INIT_END` was sent back.
    PeerStarted,
    /// The peer finished initialization (`INIT_END`) with these boot flags.
    InitEnd { flags: u32 },
    /// The peer asked for a link reset (`RESET`).
    Reset { word: u32 },
    /// The peer reported a fatal error (`ERR_DISPLAY`).
    PeerError { word: u32 },
}

/// Consumer of inbound traffic and flow-control signals.
pub trait Sink: Send {
    /// A complete inbound message (or fs-relay segment).
    fn deliver(&mut self, message: Message);

    /// Outbound writes on `channel` hit a full ring; stop producing.
    fn queue_full(&mut self, _channel: Channel) {}

    /// The peer drained `channel`; producing may resume.
    fn queue_resumed(&mut self, _channel: Channel) {}

    fn link_event(&mut self, _event: LinkEvent) {}

    /// Whether raw traffic for `sub_channel` has a consumer. Frames for
    /// rejected sub-channels are consumed and dropped.
    fn accepts(&self, _sub_channel: u8) -> bool {
        true
    }
}

/// Raises mailbox words towards the peer.
pub trait Notifier: Send + Sync {
    fn signal(&self, word: u32);

    /// Called when an engine opens on this notifier.
    fn register(&self) {}

    /// Called when the engine closes.
    fn unregister(&self) {}

    /// A word the peer raised before the engine opened, if the backend latches one.
    fn pending_word(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_maps_to_channel() {
        assert_eq!(Route::Raw { sub_channel: 9 }.channel(), Channel::RawData);
        assert_eq!(Route::Raw { sub_channel: 9 }.to_string(), "raw/9");
        assert_eq!(Route::FsRelay.to_string(), "fs-relay");
    }

    #[test]
    fn messages_default_to_end_of_message() {
        let m = Message::raw(2, &b"pkt"[..]);
        assert!(m.end_of_message);
        assert_eq!(m.route, Route::Raw { sub_channel: 2 });
    }
}
