use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use sortgate_transport::Transport;
use tracing::{debug, trace};

use crate::channel::{FrameChannel, LINE_TERMINATOR};
use crate::error::{CaptureError, ChannelError, ProtocolError, ValidationError};

/// Command token that asks the peripheral for a capture.
pub const CAPTURE_COMMAND: &[u8] = b"capture";

/// Prefix of the first response line.
pub const SIZE_PREFIX: &[u8] = b"SIZE:";

/// Prefix of the second response line; payload bytes follow on the same line.
pub const DATA_PREFIX: &[u8] = b"DATA:";

/// Prefix the firmware puts before the category in its actuation ack.
pub const ACK_PREFIX: &str = "Gate:";

/// Categories the sorting firmware knows how to route.
pub const DEFAULT_CATEGORIES: [&str; 3] = ["plastic", "paper", "Aluminium"];

/// Default maximum declared payload size: 4 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Default wait for the size and data header lines.
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(3);

/// Default wait for the whole payload (data line plus remainder).
///
/// A VGA JPEG at 115200 baud takes a few seconds on the wire.
pub const DEFAULT_PAYLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the actuation ack. The firmware holds the gate open for
/// about 4.5 s before it answers.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(6);

/// How long to wait for the terminator that follows a payload.
const TERMINATOR_WAIT: Duration = Duration::from_millis(50);

const PREVIEW_LEN: usize = 48;

/// Exactly the declared number of encoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload(Bytes);

impl ImagePayload {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for ImagePayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The peripheral's response line to an actuation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuationAck(String);

impl ActuationAck {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Ack text with the terminator and surrounding whitespace removed.
    pub fn text(&self) -> &str {
        &self.0
    }

    /// Whether this ack confirms `category` (`Gate:<category>`).
    pub fn matches(&self, category: &str) -> bool {
        self.0
            .strip_prefix(ACK_PREFIX)
            .is_some_and(|rest| rest == category)
    }
}

impl fmt::Display for ActuationAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of labels that may be sent as actuation commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    labels: Vec<String>,
}

impl CategorySet {
    /// Build a set, rejecting labels that cannot travel as one command line.
    pub fn new<I, S>(labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Vec::new();
        for label in labels {
            let label = label.into();
            if label.is_empty()
                || label == String::from_utf8_lossy(CAPTURE_COMMAND)
                || label.chars().any(|c| c.is_whitespace() || c.is_control())
            {
                return Err(ValidationError::InvalidLabel(label));
            }
            if !set.contains(&label) {
                set.push(label);
            }
        }
        if set.is_empty() {
            return Err(ValidationError::InvalidLabel(String::new()));
        }
        Ok(Self { labels: set })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            labels: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FromStr for CategorySet {
    type Err = ValidationError;

    /// Parse a comma-separated label list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.split(',').map(str::trim))
    }
}

impl fmt::Display for CategorySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels.join(","))
    }
}

/// Configuration for the capture codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Wait for each header line.
    pub header_timeout: Duration,
    /// Wait for the data line and the rest of the payload, combined.
    pub payload_timeout: Duration,
    /// Wait for the actuation ack.
    pub ack_timeout: Duration,
    /// Largest accepted declared size.
    pub max_payload_size: usize,
    /// Labels accepted by `encode_command`.
    pub categories: CategorySet,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            payload_timeout: DEFAULT_PAYLOAD_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            categories: CategorySet::default(),
        }
    }
}

/// Encode the capture command line.
pub fn encode_capture_request() -> Bytes {
    let mut out = BytesMut::with_capacity(CAPTURE_COMMAND.len() + 1);
    out.extend_from_slice(CAPTURE_COMMAND);
    out.extend_from_slice(&[LINE_TERMINATOR]);
    out.freeze()
}

/// Encode an actuation command for `category`.
pub fn encode_command(category: &str, categories: &CategorySet) -> Result<Bytes, ValidationError> {
    if !categories.contains(category) {
        return Err(ValidationError::UnknownCategory(category.to_string()));
    }
    let mut out = BytesMut::with_capacity(category.len() + 1);
    out.extend_from_slice(category.as_bytes());
    out.extend_from_slice(&[LINE_TERMINATOR]);
    Ok(out.freeze())
}

/// Where a [`CaptureDecoder`] is in the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeState {
    AwaitingSize,
    AwaitingDataHeader { declared: usize },
    AwaitingPayload { declared: usize, received: usize },
    Complete,
}

/// Result of feeding input to a [`CaptureDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// This many more payload bytes are needed.
    NeedMore(usize),
    /// The payload is complete.
    Complete(ImagePayload),
}

/// Framing state machine for one capture response.
///
/// `AwaitingSize → AwaitingDataHeader → AwaitingPayload → Complete`. The
/// decoder never reads; it is fed lines and byte chunks by whoever owns the
/// channel, which keeps partial-read handling independent of I/O.
#[derive(Debug)]
pub struct CaptureDecoder {
    state: DecodeState,
    buf: BytesMut,
    max_payload: usize,
}

impl CaptureDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::AwaitingSize,
            buf: BytesMut::new(),
            max_payload,
        }
    }

    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    /// Parse `SIZE:<n>`. Returns the declared size.
    pub fn on_size_line(&mut self, line: &[u8]) -> Result<usize, ProtocolError> {
        self.expect_state("size line", |s| matches!(s, DecodeState::AwaitingSize))?;

        let missing = || ProtocolError::MissingSizeHeader {
            line: preview(line),
        };
        let digits = line
            .strip_prefix(SIZE_PREFIX)
            .ok_or_else(missing)?
            .trim_ascii();
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(missing());
        }
        let declared: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(missing)?;

        if declared > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size: declared,
                max: self.max_payload,
            });
        }

        trace!(declared, "size header parsed");
        self.state = DecodeState::AwaitingDataHeader { declared };
        Ok(declared)
    }

    /// Parse `DATA:<chunk>`; the chunk is the start of the payload.
    pub fn on_data_line(&mut self, line: &[u8]) -> Result<Progress, ProtocolError> {
        let declared = match self.state {
            DecodeState::AwaitingDataHeader { declared } => declared,
            _ => return Err(self.out_of_order("data line")),
        };

        let mut chunk = line
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| ProtocolError::MissingDataHeader {
                line: preview(line),
            })?;

        if chunk.len() > declared {
            // A payload without a newline arrives whole on the data line,
            // followed by the terminator the firmware prints after it.
            let excess = &chunk[declared..];
            if excess == b"\n" || excess == b"\r\n" {
                chunk = &chunk[..declared];
            } else {
                return Err(ProtocolError::SizeMismatch {
                    declared,
                    inline: chunk.len(),
                });
            }
        }

        self.buf = BytesMut::with_capacity(declared);
        self.buf.extend_from_slice(chunk);
        self.state = DecodeState::AwaitingPayload {
            declared,
            received: chunk.len(),
        };
        Ok(self.progress(declared))
    }

    /// Append payload bytes received after the data line.
    pub fn on_payload(&mut self, bytes: &[u8]) -> Result<Progress, ProtocolError> {
        let declared = match self.state {
            DecodeState::AwaitingPayload { declared, .. } => declared,
            _ => return Err(self.out_of_order("payload")),
        };

        if self.buf.len() + bytes.len() > declared {
            return Err(ProtocolError::SizeMismatch {
                declared,
                inline: self.buf.len() + bytes.len(),
            });
        }

        self.buf.extend_from_slice(bytes);
        self.state = DecodeState::AwaitingPayload {
            declared,
            received: self.buf.len(),
        };
        Ok(self.progress(declared))
    }

    /// Bytes still needed to complete the payload.
    pub fn remaining(&self) -> usize {
        match self.state {
            DecodeState::AwaitingPayload { declared, received } => declared - received,
            _ => 0,
        }
    }

    /// Build the error for a transfer that stopped after `extra` more bytes.
    pub fn truncated(&self, extra: usize) -> ProtocolError {
        let (expected, received) = match self.state {
            DecodeState::AwaitingPayload { declared, received } => (declared, received + extra),
            DecodeState::AwaitingDataHeader { declared } => (declared, extra),
            _ => (0, extra),
        };
        ProtocolError::Truncated { expected, received }
    }

    fn progress(&mut self, declared: usize) -> Progress {
        if self.buf.len() == declared {
            self.state = DecodeState::Complete;
            Progress::Complete(ImagePayload(self.buf.split().freeze()))
        } else {
            Progress::NeedMore(declared - self.buf.len())
        }
    }

    fn expect_state(
        &self,
        input: &'static str,
        ok: impl Fn(&DecodeState) -> bool,
    ) -> Result<(), ProtocolError> {
        if ok(&self.state) {
            Ok(())
        } else {
            Err(self.out_of_order(input))
        }
    }

    fn out_of_order(&self, input: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedInput {
            input,
            state: state_name(&self.state),
        }
    }
}

fn state_name(state: &DecodeState) -> &'static str {
    match state {
        DecodeState::AwaitingSize => "awaiting-size",
        DecodeState::AwaitingDataHeader { .. } => "awaiting-data-header",
        DecodeState::AwaitingPayload { .. } => "awaiting-payload",
        DecodeState::Complete => "complete",
    }
}

/// Receive one capture response from `channel`.
///
/// Header lines are each bounded by `header_timeout`; the data line and the
/// remainder share one `payload_timeout` deadline. The data line is read up
/// to its first newline or to the declared size, whichever comes first, so a
/// payload with no newline never waits on a terminator. The firmware's
/// trailing terminator is consumed when it arrives but is not required.
pub fn decode_capture_response<T: Transport>(
    channel: &mut FrameChannel<T>,
    config: &CodecConfig,
) -> Result<ImagePayload, CaptureError> {
    let mut decoder = CaptureDecoder::new(config.max_payload_size);

    let size_line = channel.read_line(config.header_timeout)?;
    let declared = decoder.on_size_line(&size_line)?;

    let deadline = Instant::now() + config.payload_timeout;
    let cap = DATA_PREFIX.len() + declared;
    let data_line = match channel.read_line_capped(config.payload_timeout, cap) {
        Ok(line) => line,
        Err(ChannelError::Timeout { partial, .. }) | Err(ChannelError::Eof { partial })
            if partial.starts_with(DATA_PREFIX) =>
        {
            // Whatever arrived is the inline chunk; the remainder read below
            // reports the shortfall.
            trace!(bytes = partial.len(), "data line ended without terminator");
            partial
        }
        Err(err) => return Err(err.into()),
    };
    let whole_line_inline = data_line.len() == cap && data_line.last() != Some(&LINE_TERMINATOR);
    let mut progress = decoder.on_data_line(&data_line)?;

    loop {
        match progress {
            Progress::Complete(payload) => {
                finish_frame(channel, declared, whole_line_inline)?;
                debug!(bytes = payload.len(), "capture payload complete");
                return Ok(payload);
            }
            Progress::NeedMore(remaining) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                match channel.read_exact(remaining, budget) {
                    Ok(bytes) => progress = decoder.on_payload(&bytes)?,
                    Err(ChannelError::Timeout { partial, .. })
                    | Err(ChannelError::Eof { partial }) => {
                        return Err(decoder.truncated(partial.len()).into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        trace!(remaining = decoder.remaining(), "awaiting payload bytes");
    }
}

/// Consume the terminator the firmware prints after the payload.
///
/// When the whole payload sat on the data line, anything other than a
/// terminator right after it means the line was longer than declared.
fn finish_frame<T: Transport>(
    channel: &mut FrameChannel<T>,
    declared: usize,
    whole_line_inline: bool,
) -> Result<(), ProtocolError> {
    match channel.skip_terminator(TERMINATOR_WAIT) {
        Ok(Some(extra)) if whole_line_inline => Err(ProtocolError::SizeMismatch {
            declared,
            inline: declared + extra,
        }),
        Ok(_) => Ok(()),
        Err(err) => {
            // The payload is whole; a dead link shows up on the next write.
            debug!(%err, "trailing terminator unreadable");
            Ok(())
        }
    }
}

/// Read the peripheral's ack line.
///
/// Blank lines ahead of the ack are skipped; the whole wait is bounded by
/// `timeout`.
pub fn decode_ack<T: Transport>(
    channel: &mut FrameChannel<T>,
    timeout: Duration,
) -> Result<ActuationAck, ChannelError> {
    let deadline = Instant::now() + timeout;
    loop {
        let budget = deadline.saturating_duration_since(Instant::now());
        let line = channel.read_line(budget).map_err(|err| match err {
            ChannelError::Timeout { partial, .. } => ChannelError::Timeout {
                after: timeout,
                partial,
            },
            other => other,
        })?;
        let text = String::from_utf8_lossy(&line).trim().to_string();
        if text.is_empty() {
            trace!("blank line before ack skipped");
            continue;
        }
        trace!(ack = %text, "ack received");
        return Ok(ActuationAck(text));
    }
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    if text.chars().count() > PREVIEW_LEN {
        let cut: String = text.chars().take(PREVIEW_LEN).collect();
        format!("{cut}…")
    } else {
        text.to_string()
    }
}
