use std::io::ErrorKind;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use sortgate_transport::{SerialTransport, Transport, TransportError};
use tracing::{debug, trace};

use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::error::{ChannelError, Result};

/// Terminator for every text line on the link.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Time the peripheral needs after the port opens before it accepts input.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// Default bound on a single write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Configuration for a [`FrameChannel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Grace period after open during which nothing is read or written.
    pub settle: Duration,
    /// Bound on each `write_line`.
    pub write_timeout: Duration,
    /// Longest line buffered while waiting for a terminator.
    ///
    /// A data line can carry a whole payload, so this must exceed the
    /// maximum payload size.
    pub max_line_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_line_len: DEFAULT_MAX_PAYLOAD + 64,
        }
    }
}

/// Duplex byte channel over a [`Transport`] with deadline-bounded operations.
///
/// Reads are buffered internally: bytes that arrive past a line terminator
/// stay available for the next `read_line` or `read_exact`, so callers never
/// depend on how the link splits its reads.
///
/// The channel owns its transport. `close` releases it exactly once and is
/// also run on drop.
pub struct FrameChannel<T: Transport> {
    inner: Option<T>,
    buf: BytesMut,
    config: ChannelConfig,
    ready_at: Instant,
}

impl FrameChannel<SerialTransport> {
    /// Open a serial device and wrap it in a channel.
    ///
    /// The settle period starts now; the first operation waits it out.
    pub fn open(
        port: &str,
        baud_rate: u32,
        config: ChannelConfig,
    ) -> std::result::Result<Self, TransportError> {
        let transport = SerialTransport::open(port, baud_rate)?;
        Ok(Self::with_config(transport, config))
    }
}

impl<T: Transport> FrameChannel<T> {
    /// Create a channel with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, ChannelConfig::default())
    }

    /// Create a channel with explicit configuration.
    pub fn with_config(inner: T, config: ChannelConfig) -> Self {
        debug!(link = %inner.describe(), settle = ?config.settle, "channel opened");
        Self {
            ready_at: Instant::now() + config.settle,
            inner: Some(inner),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Block until the settle period after open has elapsed.
    pub fn wait_ready(&self) {
        let now = Instant::now();
        if now < self.ready_at {
            std::thread::sleep(self.ready_at - now);
        }
    }

    /// Write `bytes` followed by a line terminator.
    ///
    /// Bytes that already end with the terminator are written unchanged.
    pub fn write_line(&mut self, bytes: &[u8]) -> Result<()> {
        self.wait_ready();
        let timeout = self.config.write_timeout;
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        inner.set_timeout(timeout)?;

        write_all(inner, bytes, timeout)?;
        if bytes.last() != Some(&LINE_TERMINATOR) {
            write_all(inner, &[LINE_TERMINATOR], timeout)?;
        }

        loop {
            match inner.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout_kind(err.kind()) => {
                    return Err(ChannelError::Timeout {
                        after: timeout,
                        partial: Bytes::new(),
                    })
                }
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }

        trace!(bytes = bytes.len(), "line written");
        Ok(())
    }

    /// Read up to and including the next line terminator.
    ///
    /// On timeout or end-of-stream the error carries the unterminated bytes.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Bytes> {
        self.read_line_capped(timeout, usize::MAX)
    }

    /// Like [`read_line`](Self::read_line), but stop after `limit` bytes.
    ///
    /// A line that reaches `limit` bytes without a terminator is returned
    /// unterminated; the rest stays buffered.
    pub fn read_line_capped(&mut self, timeout: Duration, limit: usize) -> Result<Bytes> {
        self.wait_ready();
        let deadline = Instant::now() + timeout;
        let mut scanned = 0usize;

        loop {
            let window = self.buf.len().min(limit);
            if let Some(pos) = self.buf[scanned..window]
                .iter()
                .position(|&b| b == LINE_TERMINATOR)
            {
                let line = self.buf.split_to(scanned + pos + 1).freeze();
                trace!(bytes = line.len(), "line received");
                return Ok(line);
            }
            if self.buf.len() >= limit {
                let line = self.buf.split_to(limit).freeze();
                trace!(bytes = line.len(), "line capped without terminator");
                return Ok(line);
            }
            scanned = window;

            if self.buf.len() > self.config.max_line_len {
                self.buf.clear();
                return Err(ChannelError::LineTooLong {
                    max: self.config.max_line_len,
                });
            }

            self.fill(deadline, timeout)?;
        }
    }

    /// Consume one `\n` or `\r\n` if it is next in the input.
    ///
    /// Waits up to `timeout` for input. Returns `None` when a terminator was
    /// consumed or nothing arrived. When other bytes come first they stay
    /// buffered and the count of buffered bytes up to and including the next
    /// terminator (or all of them, if none) is returned.
    pub fn skip_terminator(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.wait_ready();
        let deadline = Instant::now() + timeout;

        loop {
            match self.buf.first().copied() {
                Some(LINE_TERMINATOR) => {
                    self.buf.advance(1);
                    return Ok(None);
                }
                Some(b'\r') if self.buf.len() >= 2 => {
                    let len = if self.buf[1] == LINE_TERMINATOR { 2 } else { 1 };
                    self.buf.advance(len);
                    return Ok(None);
                }
                Some(b'\r') => {}
                Some(_) => {
                    let pending = self
                        .buf
                        .iter()
                        .position(|&b| b == LINE_TERMINATOR)
                        .map_or(self.buf.len(), |pos| pos + 1);
                    return Ok(Some(pending));
                }
                None => {}
            }

            match self.fill(deadline, timeout) {
                Ok(_) => {}
                // Only an empty buffer or a lone `\r` can be handed back here.
                Err(ChannelError::Timeout { .. }) | Err(ChannelError::Eof { .. }) => {
                    return Ok(None)
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read exactly `n` bytes, accumulating across link reads.
    ///
    /// On timeout or end-of-stream the error carries the bytes that did
    /// arrive; they are never returned as if complete.
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Bytes> {
        self.wait_ready();
        let deadline = Instant::now() + timeout;

        while self.buf.len() < n {
            self.fill(deadline, timeout)?;
        }

        let bytes = self.buf.split_to(n).freeze();
        trace!(bytes = bytes.len(), "exact read complete");
        Ok(bytes)
    }

    /// Drop buffered bytes and any input pending on the link.
    pub fn discard_input(&mut self) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "discarding buffered input");
            self.buf.clear();
        }
        inner.discard_input()?;
        Ok(())
    }

    /// Release the transport. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        self.buf.clear();
        let flushed = inner.flush();
        let link = inner.describe();
        drop(inner);
        debug!(%link, "channel closed");
        flushed.map_err(ChannelError::Io)
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Description of the underlying link.
    pub fn describe(&self) -> String {
        self.inner
            .as_ref()
            .map(Transport::describe)
            .unwrap_or_else(|| "closed".to_string())
    }

    fn fill(&mut self, deadline: Instant, timeout: Duration) -> Result<usize> {
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout {
                    after: timeout,
                    partial: self.buf.split().freeze(),
                });
            }
            inner.set_timeout(remaining)?;

            match inner.read(&mut chunk) {
                Ok(0) => {
                    return Err(ChannelError::Eof {
                        partial: self.buf.split().freeze(),
                    })
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // The link may wake early; only the deadline ends the wait.
                Err(err) if is_timeout_kind(err.kind()) => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }
}

impl<T: Transport> Drop for FrameChannel<T> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<T: Transport> std::fmt::Debug for FrameChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameChannel")
            .field("link", &self.describe())
            .field("buffered", &self.buf.len())
            .finish()
    }
}

fn write_all<T: Transport>(inner: &mut T, mut data: &[u8], timeout: Duration) -> Result<()> {
    while !data.is_empty() {
        match inner.write(data) {
            Ok(0) => {
                return Err(ChannelError::Io(std::io::Error::from(
                    ErrorKind::WriteZero,
                )))
            }
            Ok(n) => data = &data[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if is_timeout_kind(err.kind()) => {
                return Err(ChannelError::Timeout {
                    after: timeout,
                    partial: Bytes::new(),
                })
            }
            Err(err) => return Err(ChannelError::Io(err)),
        }
    }
    Ok(())
}

fn is_timeout_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::testing::ScriptedTransport;

    fn instant_config() -> ChannelConfig {
        ChannelConfig {
            settle: Duration::ZERO,
            ..ChannelConfig::default()
        }
    }

    const SHORT: Duration = Duration::from_millis(30);

    #[test]
    fn read_line_across_chunks() {
        let link = ScriptedTransport::new().data(b"SIZ").data(b"E:1").data(b"0\r\nDATA");
        let mut channel = FrameChannel::with_config(link, instant_config());

        let line = channel.read_line(SHORT).unwrap();
        assert_eq!(line.as_ref(), b"SIZE:10\r\n");
        assert_eq!(channel.buffered(), 4);
    }

    #[test]
    fn read_line_keeps_bytes_after_terminator() {
        let link = ScriptedTransport::new().data(b"one\ntwo\n");
        let mut channel = FrameChannel::with_config(link, instant_config());

        assert_eq!(channel.read_line(SHORT).unwrap().as_ref(), b"one\n");
        assert_eq!(channel.read_line(SHORT).unwrap().as_ref(), b"two\n");
    }

    #[test]
    fn read_line_times_out_with_partial() {
        let link = ScriptedTransport::new().data(b"SIZE:12");
        let mut channel = FrameChannel::with_config(link, instant_config());

        let start = Instant::now();
        let err = channel.read_line(SHORT).unwrap_err();
        assert!(start.elapsed() >= SHORT);
        match err {
            ChannelError::Timeout { after, partial } => {
                assert_eq!(after, SHORT);
                assert_eq!(partial.as_ref(), b"SIZE:12");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn read_line_rejects_unbounded_line() {
        let link = ScriptedTransport::new().data(vec![b'x'; 64]);
        let cfg = ChannelConfig {
            max_line_len: 16,
            ..instant_config()
        };
        let mut channel = FrameChannel::with_config(link, cfg);

        let err = channel.read_line(SHORT).unwrap_err();
        assert!(matches!(err, ChannelError::LineTooLong { max: 16 }));
        assert_eq!(channel.buffered(), 0);
    }

    #[test]
    fn capped_line_returns_without_terminator() {
        let link = ScriptedTransport::new().data(b"DATA:AB").data(b"CDEFG");
        let mut channel = FrameChannel::with_config(link, instant_config());

        let start = Instant::now();
        let line = channel.read_line_capped(SHORT, 10).unwrap();
        assert_eq!(line.as_ref(), b"DATA:ABCDE");
        assert!(start.elapsed() < SHORT, "a full cap must not wait for a newline");
        assert_eq!(channel.buffered(), 2);
    }

    #[test]
    fn capped_line_still_stops_at_terminator() {
        let link = ScriptedTransport::new().data(b"DATA:A\nBCDEF");
        let mut channel = FrameChannel::with_config(link, instant_config());

        let line = channel.read_line_capped(SHORT, 10).unwrap();
        assert_eq!(line.as_ref(), b"DATA:A\n");
        assert_eq!(channel.buffered(), 5);
    }

    #[test]
    fn skip_terminator_consumes_crlf_and_lf() {
        let link = ScriptedTransport::new().data(b"\r\n\nGate:paper\r\n");
        let mut channel = FrameChannel::with_config(link, instant_config());

        assert_eq!(channel.skip_terminator(SHORT).unwrap(), None);
        assert_eq!(channel.skip_terminator(SHORT).unwrap(), None);
        assert_eq!(channel.read_line(SHORT).unwrap().as_ref(), b"Gate:paper\r\n");
    }

    #[test]
    fn skip_terminator_waits_for_split_crlf() {
        let link = ScriptedTransport::new().data(b"\r").data(b"\nnext\n");
        let mut channel = FrameChannel::with_config(link, instant_config());

        assert_eq!(channel.skip_terminator(SHORT).unwrap(), None);
        assert_eq!(channel.read_line(SHORT).unwrap().as_ref(), b"next\n");
    }

    #[test]
    fn skip_terminator_tolerates_silence_and_eof() {
        let mut silent = FrameChannel::with_config(ScriptedTransport::new(), instant_config());
        assert_eq!(silent.skip_terminator(SHORT).unwrap(), None);

        let mut closed =
            FrameChannel::with_config(ScriptedTransport::new().data(b"\r").eof(), instant_config());
        assert_eq!(closed.skip_terminator(SHORT).unwrap(), None);
    }

    #[test]
    fn skip_terminator_leaves_other_bytes() {
        let link = ScriptedTransport::new().data(b"DEFG\nrest");
        let mut channel = FrameChannel::with_config(link, instant_config());

        assert_eq!(channel.skip_terminator(SHORT).unwrap(), Some(5));
        assert_eq!(channel.buffered(), 9);
    }

    #[test]
    fn read_exact_accumulates_byte_by_byte() {
        let mut link = ScriptedTransport::new();
        for b in b"ABCDEFGHIJ" {
            link = link.data([*b]);
        }
        let mut channel = FrameChannel::with_config(link, instant_config());

        let bytes = channel.read_exact(10, SHORT).unwrap();
        assert_eq!(bytes.as_ref(), b"ABCDEFGHIJ");
    }

    #[test]
    fn read_exact_zero_returns_empty() {
        let link = ScriptedTransport::new();
        let mut channel = FrameChannel::with_config(link, instant_config());
        assert!(channel.read_exact(0, SHORT).unwrap().is_empty());
    }

    #[test]
    fn read_exact_timeout_returns_partial() {
        let link = ScriptedTransport::new().data(b"FGH").stall();
        let mut channel = FrameChannel::with_config(link, instant_config());

        let err = channel.read_exact(5, SHORT).unwrap_err();
        match err {
            ChannelError::Timeout { partial, .. } => assert_eq!(partial.as_ref(), b"FGH"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(channel.buffered(), 0);
    }

    #[test]
    fn read_exact_eof_returns_partial() {
        let link = ScriptedTransport::new().data(b"FG").eof();
        let mut channel = FrameChannel::with_config(link, instant_config());

        let err = channel.read_exact(5, SHORT).unwrap_err();
        assert!(err.is_link_lost());
        assert!(matches!(err, ChannelError::Eof { partial } if partial.as_ref() == b"FG"));
    }

    #[test]
    fn read_propagates_io_error() {
        let link = ScriptedTransport::new().fail(ErrorKind::PermissionDenied);
        let mut channel = FrameChannel::with_config(link, instant_config());

        let err = channel.read_line(SHORT).unwrap_err();
        assert!(matches!(err, ChannelError::Io(e) if e.kind() == ErrorKind::PermissionDenied));
    }

    #[test]
    fn interrupted_read_retries() {
        let link = ScriptedTransport::new()
            .fail(ErrorKind::Interrupted)
            .data(b"ok\n");
        let mut channel = FrameChannel::with_config(link, instant_config());
        assert_eq!(channel.read_line(SHORT).unwrap().as_ref(), b"ok\n");
    }

    #[test]
    fn write_line_appends_terminator_once() {
        let link = ScriptedTransport::new();
        let handle = link.handle();
        let mut channel = FrameChannel::with_config(link, instant_config());

        channel.write_line(b"capture").unwrap();
        channel.write_line(b"plastic\n").unwrap();

        assert_eq!(handle.written(), b"capture\nplastic\n");
    }

    #[test]
    fn write_line_reports_broken_link() {
        let link = ScriptedTransport::new().fail_writes(ErrorKind::BrokenPipe);
        let mut channel = FrameChannel::with_config(link, instant_config());

        let err = channel.write_line(b"capture").unwrap_err();
        assert!(err.is_link_lost());
    }

    #[test]
    fn first_operation_waits_for_settle() {
        let link = ScriptedTransport::new();
        let cfg = ChannelConfig {
            settle: Duration::from_millis(40),
            ..ChannelConfig::default()
        };
        let opened = Instant::now();
        let mut channel = FrameChannel::with_config(link, cfg);

        channel.write_line(b"capture").unwrap();
        assert!(opened.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn discard_input_clears_buffer() {
        let link = ScriptedTransport::new().data(b"System ready!\r\nSIZE");
        let handle = link.handle();
        let mut channel = FrameChannel::with_config(link, instant_config());

        channel.read_line(SHORT).unwrap();
        assert_eq!(channel.buffered(), 4);

        channel.discard_input().unwrap();
        assert_eq!(channel.buffered(), 0);
        assert_eq!(handle.discards(), 1);
    }

    #[test]
    fn close_is_idempotent_and_releases_once() {
        let link = ScriptedTransport::new();
        let handle = link.handle();
        let mut channel = FrameChannel::with_config(link, instant_config());

        channel.close().unwrap();
        channel.close().unwrap();
        assert!(channel.is_closed());
        drop(channel);

        assert_eq!(handle.drops(), 1);
    }

    #[test]
    fn drop_releases_transport() {
        let link = ScriptedTransport::new();
        let handle = link.handle();
        {
            let _channel = FrameChannel::with_config(link, instant_config());
        }
        assert_eq!(handle.drops(), 1);
    }

    #[test]
    fn operations_after_close_fail() {
        let link = ScriptedTransport::new().data(b"late\n");
        let mut channel = FrameChannel::with_config(link, instant_config());
        channel.close().unwrap();

        assert!(matches!(
            channel.read_line(SHORT),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            channel.write_line(b"capture"),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            channel.discard_input(),
            Err(ChannelError::Closed)
        ));
        assert_eq!(channel.describe(), "closed");
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, mut right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut channel = FrameChannel::with_config(left, instant_config());

        let peer = std::thread::spawn(move || {
            right.write_all(b"SIZE:4\r\nDA").unwrap();
            std::thread::sleep(Duration::from_millis(5));
            right.write_all(b"TA:\x00\x01\x02\x03").unwrap();
            right
        });

        assert_eq!(
            channel.read_line(Duration::from_secs(1)).unwrap().as_ref(),
            b"SIZE:4\r\n"
        );
        let rest = channel.read_exact(9, Duration::from_secs(1)).unwrap();
        assert_eq!(rest.as_ref(), b"DATA:\x00\x01\x02\x03");

        let _right = peer.join().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn socket_pair_read_times_out() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut channel = FrameChannel::with_config(left, instant_config());

        let err = channel.read_line(SHORT).unwrap_err();
        assert!(err.is_timeout());
    }
}
