use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Smallest timeout handed to an underlying link.
///
/// Several platforms reject a zero read timeout (std sockets return
/// `InvalidInput`), so shorter deadlines are rounded up to this.
pub const MIN_LINK_TIMEOUT: Duration = Duration::from_millis(1);

/// A connected duplex byte link.
///
/// Reads block for at most the timeout set by [`Transport::set_timeout`] and
/// report an expired timeout as `ErrorKind::TimedOut` or
/// `ErrorKind::WouldBlock`. A read returning `Ok(0)` means the peer is gone.
pub trait Transport: Read + Write + Send {
    /// Bound the duration of the next reads and writes.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Drop any input the link has received but not yet delivered.
    fn discard_input(&mut self) -> Result<()>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_LINK_TIMEOUT);
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.set_nonblocking(true)?;
        let mut scratch = [0u8; 1024];
        let drained = loop {
            match self.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        self.set_nonblocking(false)?;
        drained.map_err(Into::into)
    }

    fn describe(&self) -> String {
        "unix-stream".to_string()
    }
}
