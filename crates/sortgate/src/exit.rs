use std::fmt;
use std::io;

use sortgate_control::ControlError;
use sortgate_frame::{CaptureError, ChannelError, ValidationError};
use sortgate_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
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

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(io_code(err.kind()), format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Io(source) => io_code(source.kind()),
        other if other.is_permission_denied() => PERMISSION_DENIED,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    let code = match &err {
        ChannelError::Timeout { .. } => TIMEOUT,
        ChannelError::Eof { .. } | ChannelError::Closed => TRANSPORT_ERROR,
        ChannelError::LineTooLong { .. } => DATA_INVALID,
        ChannelError::Io(source) => io_code(source.kind()),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn capture_error(context: &str, err: CaptureError) -> CliError {
    match err {
        CaptureError::Channel(err) => channel_error(context, err),
        CaptureError::Protocol(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn validation_error(context: &str, err: ValidationError) -> CliError {
    CliError::usage(format!("{context}: {err}"))
}

pub fn control_error(context: &str, err: ControlError) -> CliError {
    match err {
        ControlError::Connect(err) => transport_error(context, err),
        ControlError::Config(err) => validation_error(context, err),
        ControlError::Close(err) => channel_error(context, err),
    }
}
