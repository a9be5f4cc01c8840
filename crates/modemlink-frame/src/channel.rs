//! The three logical channels sharing the region.

/// A logical channel. Its index is also the ring index in the region layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Formatted control messages (AT-like command traffic). Fragmented.
    Control,
    /// Packet data, routed further by a one-byte sub-channel id.
    RawData,
    /// Remote file-system relay traffic.
    FsRelay,
}

impl Channel {
    /// Number of channels.
    pub const COUNT: usize = 3;

    /// Every channel in index order.
    pub const ALL: [Channel; Self::COUNT] = [Channel::Control, Channel::RawData, Channel::FsRelay];

    pub fn index(self) -> usize {
        match self {
            Channel::Control => 0,
            Channel::RawData => 1,
            Channel::FsRelay => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Channel> {
        Self::ALL.get(index).copied()
    }

    /// Short name used in logs, dumps and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::RawData => "raw",
            Channel::FsRelay => "fs-relay",
        }
    }

    /// Bytes of channel-specific header between the start marker and payload.
    pub fn header_size(self) -> usize {
        match self {
            Channel::Control => 3,
            Channel::RawData => 4,
            Channel::FsRelay => 2,
        }
    }

    /// Total framing bytes around a payload: markers plus header.
    pub fn overhead(self) -> usize {
        self.header_size() + 2
    }

    /// Largest payload one frame can carry (the `len` field is 16 bits).
    pub fn max_payload(self) -> usize {
        u16::MAX as usize - self.header_size()
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "control" | "fmt" => Ok(Channel::Control),
            "raw" | "rawdata" => Ok(Channel::RawData),
            "fs-relay" | "fs" | "rfs" => Ok(Channel::FsRelay),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips() {
        for ch in Channel::ALL {
            assert_eq!(Channel::from_index(ch.index()), Some(ch));
        }
        assert_eq!(Channel::from_index(3), None);
    }

    #[test]
    fn header_sizes() {
        assert_eq!(Channel::Control.overhead(), 5);
        assert_eq!(Channel::RawData.overhead(), 6);
        assert_eq!(Channel::FsRelay.overhead(), 4);
        assert_eq!(Channel::RawData.max_payload(), 65531);
    }

    #[test]
    fn parses_legacy_names() {
        assert_eq!("FMT".parse::<Channel>().unwrap(), Channel::Control);
        assert_eq!("rfs".parse::<Channel>().unwrap(), Channel::FsRelay);
        assert!("pdp".parse::<Channel>().is_err());
    }
}
