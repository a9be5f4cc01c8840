use std::io;

use modemlink::frame::FrameError;
use modemlink::shm::ShmError;
use modemlink::LinkError;

// Exit codes follow the sysexits-style table the other tools use.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failed command: the message for stderr and the process exit code.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn shm_error(context: &str, err: ShmError) -> CliError {
    match err {
        ShmError::Map { source, .. } => io_error(context, source),
        ShmError::NotPowerOfTwo { .. } | ShmError::EmptyLayout => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::NoSpace { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::OutOfMemory { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Io(source) => io_error(context, source),
        LinkError::Shm(err) => shm_error(context, err),
        LinkError::Frame(err) => frame_error(context, err),
        LinkError::AuthorityTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LinkError::InvalidArgument(_) => CliError::new(USAGE, format!("{context}: {err}")),
        LinkError::Config(_) | LinkError::CorruptFrame { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        LinkError::NoSpace { .. } | LinkError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
