use clap::{Args, Subcommand};
use modemlink::LinkConfig;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod layout;
pub mod loopback;
pub mod mailbox;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the shared-region layout for the configured ring sizes.
    Layout(LayoutArgs),
    /// Decode a 32-bit mailbox word.
    Mailbox(MailboxArgs),
    /// Run two in-memory engines against each other and report what crossed.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: LinkConfig) -> CliResult<i32> {
    match command {
        Command::Layout(args) => layout::run(args, format, &config),
        Command::Mailbox(args) => mailbox::run(args, format),
        Command::Loopback(args) => loopback::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct LayoutArgs {}

#[derive(Args, Debug)]
pub struct MailboxArgs {
    /// Word to decode, hex (0x prefix) or decimal.
    pub word: String,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Size of the control message to send (0 to skip).
    #[arg(long, default_value_t = 1024)]
    pub control: usize,
    /// Size of the raw packet to send (0 to skip).
    #[arg(long, default_value_t = 100)]
    pub raw: usize,
    /// Raw sub-channel id.
    #[arg(long, default_value_t = 1)]
    pub sub_channel: u8,
    /// Size of the fs-relay message to send (0 to skip).
    #[arg(long, default_value_t = 0)]
    pub fs: usize,
    /// Send from the modem side instead of the application side.
    #[arg(long)]
    pub from_modem: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
