//! The 32-bit mailbox word exchanged between the processors.
//!
//! ```text
//!   31      30        29 .. 16     15 .. 8         7 .. 0
//! ┌───────┬─────────┬──────────┬───────────────┬────────────┐
//! │ VALID │ COMMAND │    -     │ command flags │ opcode     │   command word
//! ├───────┼─────────┼──────────┴───────────────┴────────────┤
//! │ VALID │    0    │ per-channel SEND / RES_ACK / REQ_ACK   │   data word
//! └───────┴─────────┴────────────────────────────────────────┘
//! ```

use bitflags::bitflags;
use modemlink_frame::Channel;
use serde::{Deserialize, Serialize};

/// Set on every meaningful word.
pub const MB_VALID: u32 = 1 << 31;

/// Set on command words, clear on data words.
pub const MB_COMMAND: u32 = 1 << 30;

const OPCODE_MASK: u32 = 0xFF;
const COMMAND_FLAGS_MASK: u32 = 0x3FFF_FF00;

bitflags! {
    /// Per-channel bits of a data word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataFlags: u16 {
        const SEND_RAW = 0x0001;
        const SEND_CONTROL = 0x0002;
        const RES_ACK_RAW = 0x0004;
        const RES_ACK_CONTROL = 0x0008;
        const REQ_ACK_RAW = 0x0010;
        const REQ_ACK_CONTROL = 0x0020;
        const SEND_FS = 0x0100;
        const RES_ACK_FS = 0x0200;
        const REQ_ACK_FS = 0x0400;
    }
}

impl DataFlags {
    /// "New bytes pending" for `channel`.
    pub fn send(channel: Channel) -> Self {
        match channel {
            Channel::Control => Self::SEND_CONTROL,
            Channel::RawData => Self::SEND_RAW,
            Channel::FsRelay => Self::SEND_FS,
        }
    }

    /// "Your ring drained, resume writing" for `channel`.
    pub fn res_ack(channel: Channel) -> Self {
        match channel {
            Channel::Control => Self::RES_ACK_CONTROL,
            Channel::RawData => Self::RES_ACK_RAW,
            Channel::FsRelay => Self::RES_ACK_FS,
        }
    }

    /// "Tell me when my ring drains" for `channel`.
    pub fn req_ack(channel: Channel) -> Self {
        match channel {
            Channel::Control => Self::REQ_ACK_CONTROL,
            Channel::RawData => Self::REQ_ACK_RAW,
            Channel::FsRelay => Self::REQ_ACK_FS,
        }
    }

    /// Whether the word asks the receiver to take the semaphore and read.
    pub fn wants_read(self) -> bool {
        Channel::ALL
            .iter()
            .any(|&ch| self.intersects(Self::send(ch) | Self::req_ack(ch)))
    }
}

/// Mailbox command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    InitStart,
    InitEnd,
    ReqActive,
    ResActive,
    TimeSync,
    PowerOff,
    Reset,
    PhoneStart,
    ErrDisplay,
    Suspend,
    Resume,
    EmerDown,
    ReqSem,
    ResSem,
    /// Anything else. Received unknown opcodes are ignored.
    Unknown(u8),
}

impl Opcode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Opcode::InitStart,
            0x02 => Opcode::InitEnd,
            0x03 => Opcode::ReqActive,
            0x04 => Opcode::ResActive,
            0x05 => Opcode::TimeSync,
            0x06 => Opcode::PowerOff,
            0x07 => Opcode::Reset,
            0x08 => Opcode::PhoneStart,
            0x09 => Opcode::ErrDisplay,
            0x0A => Opcode::Suspend,
            0x0B => Opcode::Resume,
            0x0C => Opcode::EmerDown,
            0x0D => Opcode::ReqSem,
            0x0E => Opcode::ResSem,
            other => Opcode::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Opcode::InitStart => 0x01,
            Opcode::InitEnd => 0x02,
            Opcode::ReqActive => 0x03,
            Opcode::ResActive => 0x04,
            Opcode::TimeSync => 0x05,
            Opcode::PowerOff => 0x06,
            Opcode::Reset => 0x07,
            Opcode::PhoneStart => 0x08,
            Opcode::ErrDisplay => 0x09,
            Opcode::Suspend => 0x0A,
            Opcode::Resume => 0x0B,
            Opcode::EmerDown => 0x0C,
            Opcode::ReqSem => 0x0D,
            Opcode::ResSem => 0x0E,
            Opcode::Unknown(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::InitStart => "INIT_START",
            Opcode::InitEnd => "INIT_END",
            Opcode::ReqActive => "REQ_ACTIVE",
            Opcode::ResActive => "RES_ACTIVE",
            Opcode::TimeSync => "TIME_SYNC",
            Opcode::PowerOff => "POWER_OFF",
            Opcode::Reset => "RESET",
            Opcode::PhoneStart => "PHONE_START",
            Opcode::ErrDisplay => "ERR_DISPLAY",
            Opcode::Suspend => "SUSPEND",
            Opcode::Resume => "RESUME",
            Opcode::EmerDown => "EMER_DOWN",
            Opcode::ReqSem => "REQ_SEM",
            Opcode::ResSem => "RES_SEM",
            Opcode::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Modem boot mode announced in `INIT_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    Online,
    #[default]
    Airplane,
}

impl BootMode {
    pub fn bits(self) -> u32 {
        match self {
            BootMode::Online => 0x0000,
            BootMode::Airplane => 0x1000,
        }
    }
}

/// Application-processor OS announced in `INIT_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    #[default]
    Android,
    Linux,
}

impl HostOs {
    pub fn bits(self) -> u32 {
        match self {
            HostOs::Android => 0x0100,
            HostOs::Linux => 0x0300,
        }
    }
}

/// A decoded command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    /// Bits 8..29 of the word, in place.
    pub flags: u32,
}

/// A decoded mailbox word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxWord {
    /// `VALID` clear. Carries the raw word for logging.
    Invalid(u32),
    Command(Command),
    Data(DataFlags),
}

impl MailboxWord {
    pub fn decode(word: u32) -> Self {
        if word & MB_VALID == 0 {
            return MailboxWord::Invalid(word);
        }
        if word & MB_COMMAND != 0 {
            return MailboxWord::Command(Command {
                opcode: Opcode::from_code((word & OPCODE_MASK) as u8),
                flags: word & COMMAND_FLAGS_MASK,
            });
        }
        MailboxWord::Data(DataFlags::from_bits_truncate(word as u16))
    }

    pub fn encode(self) -> u32 {
        match self {
            MailboxWord::Invalid(word) => word & !MB_VALID,
            MailboxWord::Command(cmd) => encode_command(cmd.opcode, cmd.flags),
            MailboxWord::Data(flags) => encode_data(flags),
        }
    }
}

impl std::fmt::Display for MailboxWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxWord::Invalid(word) => write!(f, "invalid 0x{word:08x}"),
            MailboxWord::Command(cmd) => {
                write!(f, "command {} (0x{:02x})", cmd.opcode.name(), cmd.opcode.code())?;
                if cmd.flags != 0 {
                    write!(f, " flags 0x{:08x}", cmd.flags)?;
                }
                Ok(())
            }
            MailboxWord::Data(flags) => {
                f.write_str("data")?;
                for (name, _) in flags.iter_names() {
                    write!(f, " {name}")?;
                }
                Ok(())
            }
        }
    }
}

/// Encode a data word.
pub fn encode_data(flags: DataFlags) -> u32 {
    MB_VALID | u32::from(flags.bits())
}

/// Encode a command word. `flags` must only use bits 8..29.
pub fn encode_command(opcode: Opcode, flags: u32) -> u32 {
    MB_VALID | MB_COMMAND | (flags & COMMAND_FLAGS_MASK) | u32::from(opcode.code())
}

/// Shorthand for [`MailboxWord::decode`].
pub fn decode(word: u32) -> MailboxWord {
    MailboxWord::decode(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_word() {
        let word = decode(0x8000_0022);
        assert_eq!(
            word,
            MailboxWord::Data(DataFlags::SEND_CONTROL | DataFlags::REQ_ACK_CONTROL)
        );
    }

    #[test]
    fn decodes_command_word() {
        let word = decode(0xC000_000D);
        assert!(matches!(
            word,
            MailboxWord::Command(Command {
                opcode: Opcode::ReqSem,
                flags: 0
            })
        ));
    }

    #[test]
    fn missing_valid_bit_is_invalid() {
        assert_eq!(decode(0x4000_0008), MailboxWord::Invalid(0x4000_0008));
        assert_eq!(decode(0), MailboxWord::Invalid(0));
    }

    #[test]
    fn unknown_opcode_survives_round_trip() {
        let word = encode_command(Opcode::Unknown(0x42), 0);
        assert_eq!(
            decode(word),
            MailboxWord::Command(Command {
                opcode: Opcode::Unknown(0x42),
                flags: 0
            })
        );
    }

    #[test]
    fn init_end_carries_boot_flags() {
        let word = encode_command(
            Opcode::InitEnd,
            BootMode::Airplane.bits() | HostOs::Android.bits(),
        );
        assert_eq!(word, 0xC000_1102);
    }

    #[test]
    fn per_channel_masks() {
        assert_eq!(DataFlags::send(Channel::FsRelay).bits(), 0x0100);
        assert_eq!(DataFlags::res_ack(Channel::RawData).bits(), 0x0004);
        assert_eq!(DataFlags::req_ack(Channel::Control).bits(), 0x0020);
        assert_eq!(encode_data(DataFlags::SEND_RAW | DataFlags::SEND_FS), 0x8000_0101);
    }

    #[test]
    fn wants_read_ignores_res_ack_only_words() {
        assert!(DataFlags::SEND_RAW.wants_read());
        assert!(DataFlags::REQ_ACK_FS.wants_read());
        assert!(!(DataFlags::RES_ACK_CONTROL | DataFlags::RES_ACK_FS).wants_read());
    }

    #[test]
    fn display_names_flags() {
        assert_eq!(
            decode(0x8000_0006).to_string(),
            "data SEND_CONTROL RES_ACK_RAW"
        );
        assert_eq!(
            decode(0xC000_1102).to_string(),
            "command INIT_END (0x02) flags 0x00001100"
        );
    }
}
