//! Capture framing over a timed serial channel.
//!
//! The camera peripheral answers a `capture` command with two text headers
//! followed by raw image bytes:
//!
//! ```text
//! SIZE:<n>\r\n
//! DATA:<first bytes of payload ... up to the first newline>
//! <remaining bytes until n total>
//! ```
//!
//! [`FrameChannel`] provides deadline-bounded `read_line` / `read_exact` /
//! `write_line` over any [`sortgate_transport::Transport`], and the codec turns
//! those reads into a validated [`ImagePayload`] through an explicit
//! [`CaptureDecoder`] state machine. No operation blocks past its deadline and
//! a short payload is never returned as complete.

pub mod channel;
pub mod codec;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::{ChannelConfig, FrameChannel, DEFAULT_SETTLE, LINE_TERMINATOR};
pub use codec::{
    decode_ack, decode_capture_response, encode_capture_request, encode_command, ActuationAck,
    CaptureDecoder, CategorySet, CodecConfig, DecodeState, ImagePayload, Progress, ACK_PREFIX,
    CAPTURE_COMMAND, DATA_PREFIX, DEFAULT_ACK_TIMEOUT, DEFAULT_CATEGORIES,
    DEFAULT_HEADER_TIMEOUT, DEFAULT_MAX_PAYLOAD, DEFAULT_PAYLOAD_TIMEOUT, SIZE_PREFIX,
};
pub use error::{CaptureError, ChannelError, ProtocolError, Result, ValidationError};
