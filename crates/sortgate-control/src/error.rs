use sortgate_frame::{ChannelError, ValidationError};
use sortgate_transport::TransportError;

/// The image decoder could not turn payload bytes into pixels.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Nothing to decode.
    #[error("empty image payload")]
    Empty,

    /// The bytes are not a readable image.
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// The classifier produced no usable result.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The pixel buffer could not be handed to the classifier.
    #[error("failed to encode frame for classifier: {0}")]
    Encode(#[source] image::ImageError),

    /// The classifier process could not be started or fed.
    #[error("classifier process I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The classifier process exited unsuccessfully.
    #[error("classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The classifier's output was not a result object.
    #[error("unreadable classifier output: {0}")]
    Parse(#[from] serde_json::Error),

    /// The classifier did not finish in time and was killed.
    #[error("classifier timed out after {0:?}")]
    TimedOut(std::time::Duration),

    /// The reported confidence is not a probability.
    #[error("classifier confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    /// Any other model failure.
    #[error("classifier failed: {0}")]
    Model(String),
}

/// Errors that escape the control loop.
///
/// Everything else is absorbed at the cycle boundary.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The link could not be opened; the loop cannot start.
    #[error("connect failed: {0}")]
    Connect(#[from] TransportError),

    /// The loop configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    /// Releasing the channel failed.
    #[error("close failed: {0}")]
    Close(#[source] ChannelError),
}

pub type Result<T> = std::result::Result<T, ControlError>;
