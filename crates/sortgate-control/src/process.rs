//! Classifier backed by an external program.
//!
//! The program receives one PNG frame on stdin and must print a single JSON
//! object `{"label": "...", "confidence": 0.93}` on stdout before exiting.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ClassifyError;
use crate::gate::ClassificationResult;
use crate::pipeline::{Classifier, PixelBuffer};

/// Default bound on one classifier run, model loading included.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_POLL: Duration = Duration::from_millis(10);

type PipeReader = JoinHandle<std::io::Result<Vec<u8>>>;

/// Runs `program args...` once per frame.
///
/// A run that outlives its timeout is killed and reported as
/// [`ClassifyError::TimedOut`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessClassifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_CLASSIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Split a whitespace-separated command line. Returns `None` when empty.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Classifier for ProcessClassifier {
    fn classify(&self, frame: &PixelBuffer) -> Result<ClassificationResult, ClassifyError> {
        let png = frame.to_png().map_err(ClassifyError::Encode)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // The child may answer before draining stdin, and may fill either
        // output pipe first; every pipe gets its own thread.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&png) {
                    Err(err) if err.kind() != std::io::ErrorKind::BrokenPipe => return Err(err),
                    _ => {}
                }
            }
            Ok(())
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(program = %self.program, timeout = ?self.timeout, "classifier killed");
                return Err(ClassifyError::TimedOut(self.timeout));
            }
            std::thread::sleep(EXIT_POLL);
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        writer
            .join()
            .map_err(|_| ClassifyError::Model("stdin writer panicked".to_string()))??;

        if !status.success() {
            return Err(ClassifyError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        let result: ClassificationResult = serde_json::from_slice(&stdout)?;
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(ClassifyError::InvalidConfidence(result.confidence));
        }
        debug!(
            program = %self.program,
            label = %result.label,
            confidence = result.confidence,
            "classifier answered"
        );
        Ok(result)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> PipeReader {
    std::thread::spawn(move || {
        let mut out = Vec::new();
        pipe.read_to_end(&mut out)?;
        Ok(out)
    })
}

fn collect(reader: Option<PipeReader>) -> Result<Vec<u8>, ClassifyError> {
    match reader {
        Some(reader) => reader
            .join()
            .map_err(|_| ClassifyError::Model("pipe reader panicked".to_string()))?
            .map_err(ClassifyError::Io),
        None => Ok(Vec::new()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn frame() -> PixelBuffer {
        PixelBuffer::from_rgb(2, 2, vec![200; 12]).unwrap()
    }

    fn shell(script: &str) -> ProcessClassifier {
        ProcessClassifier::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn parses_json_answer() {
        let classifier = shell(r#"cat >/dev/null; echo '{"label":"plastic","confidence":0.93}'"#);
        let result = classifier.classify(&frame()).unwrap();
        assert_eq!(result, ClassificationResult::new("plastic", 0.93));
    }

    #[test]
    fn receives_png_on_stdin() {
        let classifier = shell(
            r#"head -c 4 | od -An -c | grep -q P && echo '{"label":"paper","confidence":0.5}'"#,
        );
        let result = classifier.classify(&frame()).unwrap();
        assert_eq!(result.label, "paper");
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let classifier = shell("cat >/dev/null; echo model missing >&2; exit 3");
        match classifier.classify(&frame()).unwrap_err() {
            ClassifyError::Failed { stderr, .. } => assert_eq!(stderr, "model missing"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn garbage_output_is_parse_error() {
        let classifier = shell("cat >/dev/null; echo not-json");
        assert!(matches!(
            classifier.classify(&frame()),
            Err(ClassifyError::Parse(_))
        ));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let classifier = shell(r#"cat >/dev/null; echo '{"label":"paper","confidence":1.5}'"#);
        assert!(matches!(
            classifier.classify(&frame()),
            Err(ClassifyError::InvalidConfidence(c)) if c == 1.5
        ));
    }

    #[test]
    fn noisy_stderr_does_not_stall() {
        // More than a pipe buffer of log output before the answer.
        let classifier = shell(
            r#"cat >/dev/null; head -c 200000 /dev/zero >&2; echo '{"label":"paper","confidence":0.8}'"#,
        )
        .with_timeout(Duration::from_secs(10));
        let start = Instant::now();
        let result = classifier.classify(&frame()).unwrap();
        assert_eq!(result.label, "paper");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn hung_classifier_is_killed_at_timeout() {
        let classifier =
            shell("cat >/dev/null; exec sleep 30").with_timeout(Duration::from_millis(200));
        let start = Instant::now();
        match classifier.classify(&frame()).unwrap_err() {
            ClassifyError::TimedOut(after) => assert_eq!(after, Duration::from_millis(200)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_is_io_error() {
        let classifier = ProcessClassifier::new("/nonexistent/sortgate-model", Vec::new());
        assert!(matches!(
            classifier.classify(&frame()),
            Err(ClassifyError::Io(_))
        ));
    }

    #[test]
    fn command_line_splitting() {
        let c = ProcessClassifier::from_command_line("python3 model.py --fast").unwrap();
        assert_eq!(c.program(), "python3");
        assert_eq!(c.args, vec!["model.py", "--fast"]);
        assert!(ProcessClassifier::from_command_line("   ").is_none());
    }
}
