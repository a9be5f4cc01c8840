use std::path::Path;
use std::time::Duration;

use modemlink_frame::{Channel, DEFAULT_MAX_MESSAGE_SIZE};
use modemlink_shm::{RegionLayout, Side};
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::mailbox::{BootMode, HostOs};

/// Default wait for the semaphore before an operation gives up.
pub const DEFAULT_AUTHORITY_TIMEOUT_MS: u64 = 1000;

/// Smallest control fragment worth sending; less room than this means "full".
pub const DEFAULT_MIN_FRAGMENT: usize = 64;

/// Settings for one end of the link.
///
/// Every field has a default, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Which processor this engine runs on.
    pub side: Side,
    /// Control ring capacity per direction (power of two).
    pub control_capacity: usize,
    /// Raw-data ring capacity per direction (power of two).
    pub raw_capacity: usize,
    /// Fs-relay ring capacity per direction (power of two).
    pub fs_relay_capacity: usize,
    pub authority_timeout_ms: u64,
    /// Sleep between semaphore polls while waiting.
    pub authority_poll_us: u64,
    pub min_fragment: usize,
    /// Ceiling on a reassembled control message.
    pub max_message_size: usize,
    /// Fs-relay segments delivered per pump.
    pub fs_relay_burst: usize,
    /// Zero the indices and write the magic on open, instead of checking it.
    pub init_region: bool,
    /// Reported in `INIT_END`.
    pub boot_mode: BootMode,
    /// Reported in `INIT_END`.
    pub host_os: HostOs,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            side: Side::Application,
            control_capacity: 8 * 1024,
            raw_capacity: 256 * 1024,
            fs_relay_capacity: 256 * 1024,
            authority_timeout_ms: DEFAULT_AUTHORITY_TIMEOUT_MS,
            authority_poll_us: 50,
            min_fragment: DEFAULT_MIN_FRAGMENT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fs_relay_burst: 4,
            init_region: true,
            boot_mode: BootMode::default(),
            host_os: HostOs::default(),
        }
    }
}

impl LinkConfig {
    /// Defaults for `side`. Only the application side initializes the region.
    pub fn for_side(side: Side) -> Self {
        Self {
            side,
            init_region: side == Side::Application,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn capacity(&self, channel: Channel) -> usize {
        match channel {
            Channel::Control => self.control_capacity,
            Channel::RawData => self.raw_capacity,
            Channel::FsRelay => self.fs_relay_capacity,
        }
    }

    /// Region layout with one ring per channel, in channel order.
    pub fn layout(&self) -> Result<RegionLayout> {
        Channel::ALL
            .iter()
            .fold(RegionLayout::builder(), |b, &ch| b.ring(self.capacity(ch)))
            .build()
            .map_err(LinkError::from)
    }

    pub fn authority_timeout(&self) -> Duration {
        Duration::from_millis(self.authority_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.authority_poll_us)
    }

    /// Check values the layout builder does not cover.
    pub fn validate(&self) -> Result<()> {
        self.layout()?;
        let control_room = self.control_capacity - 1 - Channel::Control.overhead();
        if self.min_fragment == 0 || self.min_fragment > control_room {
            return Err(LinkError::InvalidArgument(format!(
                "min_fragment {} must be between 1 and {control_room}",
                self.min_fragment
            )));
        }
        if self.fs_relay_burst == 0 {
            return Err(LinkError::InvalidArgument(
                "fs_relay_burst must be at least 1".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(LinkError::InvalidArgument(
                "max_message_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LinkConfig::default();
        config.validate().unwrap();
        assert_eq!(config.authority_timeout(), Duration::from_secs(1));
        assert_eq!(config.layout().unwrap().rings().len(), 3);
    }

    #[test]
    fn modem_side_does_not_initialize() {
        let config = LinkConfig::for_side(Side::Modem);
        assert_eq!(config.side, Side::Modem);
        assert!(!config.init_region);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            LinkConfig::from_json_str(r#"{"side": "modem", "control_capacity": 1024, "boot_mode": "online"}"#)
                .unwrap();
        assert_eq!(config.side, Side::Modem);
        assert_eq!(config.control_capacity, 1024);
        assert_eq!(config.boot_mode, BootMode::Online);
        assert_eq!(config.raw_capacity, 256 * 1024);
    }

    #[test]
    fn rejects_unknown_field() {
        let err = LinkConfig::from_json_str(r#"{"sidee": "modem"}"#).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn rejects_bad_capacity() {
        let err = LinkConfig::from_json_str(r#"{"raw_capacity": 3000}"#).unwrap_err();
        assert!(matches!(err, LinkError::Shm(_)));
    }

    #[test]
    fn rejects_min_fragment_larger_than_ring() {
        let err =
            LinkConfig::from_json_str(r#"{"control_capacity": 64, "min_fragment": 64}"#).unwrap_err();
        assert!(matches!(err, LinkError::InvalidArgument(_)));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("modemlink-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"fs_relay_burst": 8}"#).unwrap();
        let config = LinkConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.fs_relay_burst, 8);
    }
}
