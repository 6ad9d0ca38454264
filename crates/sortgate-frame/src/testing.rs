//! Scripted in-memory transport for exercising channels without hardware.
//!
//! A [`ScriptedTransport`] replays a queue of read steps. Once the script is
//! exhausted it behaves like a silent peripheral: every read waits for the
//! configured timeout and then reports `TimedOut`.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sortgate_transport::Transport;

#[derive(Debug)]
enum Step {
    Data(Vec<u8>),
    Stall,
    Fail(ErrorKind),
    Eof,
}

/// Shared view of what a [`ScriptedTransport`] observed.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    written: Arc<Mutex<Vec<u8>>>,
    reads: Arc<AtomicUsize>,
    discards: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl ScriptHandle {
    /// Every byte written to the transport so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Written bytes split into lines, terminators removed.
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Number of read calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `discard_input` calls.
    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    /// Number of times the transport was dropped.
    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// In-memory [`Transport`] that replays scripted reads and records writes.
#[derive(Debug)]
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    timeout: Duration,
    write_error: Option<ErrorKind>,
    handle: ScriptHandle,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            timeout: Duration::from_millis(10),
            write_error: None,
            handle: ScriptHandle::default(),
        }
    }

    /// Deliver `bytes` on the next read (split if the caller's buffer is smaller).
    ///
    /// Empty input adds no step; a zero-length read would mean end-of-stream.
    pub fn data(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        if !bytes.is_empty() {
            self.steps.push_back(Step::Data(bytes.to_vec()));
        }
        self
    }

    /// Deliver a text line with a `\r\n` terminator, as the firmware prints it.
    pub fn line(self, text: &str) -> Self {
        self.data(format!("{text}\r\n"))
    }

    /// Wait for the current timeout, then report `TimedOut`.
    pub fn stall(mut self) -> Self {
        self.steps.push_back(Step::Stall);
        self
    }

    /// Fail the next read with `kind`.
    pub fn fail(mut self, kind: ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }

    /// Report end-of-stream from here on.
    pub fn eof(mut self) -> Self {
        self.steps.push_back(Step::Eof);
        self
    }

    /// Fail every write with `kind`.
    pub fn fail_writes(mut self, kind: ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }

    /// Handle for inspecting the transport after it has been moved.
    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    fn wait_out_timeout(&self) -> std::io::Result<usize> {
        std::thread::sleep(self.timeout);
        Err(std::io::Error::from(ErrorKind::TimedOut))
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.handle.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(Step::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Stall) | None => self.wait_out_timeout(),
            Some(Step::Fail(kind)) => Err(std::io::Error::from(kind)),
            Some(Step::Eof) => {
                self.steps.push_front(Step::Eof);
                Ok(0)
            }
        }
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(std::io::Error::from(kind));
        }
        self.handle
            .written
            .lock()
            .map_err(|_| std::io::Error::other("write log poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn set_timeout(&mut self, timeout: Duration) -> sortgate_transport::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn discard_input(&mut self) -> sortgate_transport::Result<()> {
        self.handle.discards.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.handle.drops.fetch_add(1, Ordering::SeqCst);
    }
}
