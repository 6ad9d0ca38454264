use std::time::Duration;

use bytes::Bytes;

/// Errors from timed channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The deadline passed before the operation completed.
    ///
    /// `partial` holds whatever bytes arrived before the deadline.
    #[error("timed out after {after:?} ({} bytes partial)", .partial.len())]
    Timeout { after: Duration, partial: Bytes },

    /// The link reported end-of-stream before the operation completed.
    #[error("link reached end of stream ({} bytes partial)", .partial.len())]
    Eof { partial: Bytes },

    /// A line grew past the configured maximum without a terminator.
    #[error("line exceeds {max} bytes without a terminator")]
    LineTooLong { max: usize },

    /// An I/O error occurred on the link.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    /// True when the error means the peripheral is gone rather than slow.
    pub fn is_link_lost(&self) -> bool {
        match self {
            ChannelError::Eof { .. } | ChannelError::Closed => true,
            ChannelError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotFound
            ),
            _ => false,
        }
    }

    /// True when the error is an expired deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }
}

impl From<sortgate_transport::TransportError> for ChannelError {
    fn from(err: sortgate_transport::TransportError) -> Self {
        match err {
            sortgate_transport::TransportError::Io(io) => ChannelError::Io(io),
            sortgate_transport::TransportError::Closed => ChannelError::Closed,
            other => ChannelError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

/// The capture response did not follow the wire format.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The first response line was not `SIZE:<non-negative integer>`.
    #[error("expected size header, got {line:?}")]
    MissingSizeHeader { line: String },

    /// The second response line did not start with `DATA:`.
    #[error("expected data header, got {line:?}")]
    MissingDataHeader { line: String },

    /// The data line already carried more bytes than the declared size.
    #[error("declared size {declared} is smaller than the {inline} bytes inline after the data marker")]
    SizeMismatch { declared: usize, inline: usize },

    /// The channel stopped delivering before the declared size was reached.
    #[error("payload truncated: received {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    /// The declared size exceeds the configured maximum.
    #[error("declared payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The decoder was fed input its current state does not accept.
    #[error("unexpected {input} while {state}")]
    UnexpectedInput {
        input: &'static str,
        state: &'static str,
    },
}

/// Any failure while receiving a capture response.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The channel failed while reading header lines.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The response was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A value was rejected before anything reached the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The category is not in the configured label set.
    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    /// A label cannot be sent as a single command line.
    #[error("invalid category label {0:?}")]
    InvalidLabel(String),

    /// A confidence threshold outside `[0, 1]`.
    #[error("confidence threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
