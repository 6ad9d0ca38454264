//! The capture → decode → classify → gate → actuate loop.
//!
//! Every recoverable failure is absorbed at the cycle boundary and turned into
//! a [`CycleReport`]; only connect, configuration and close failures escape.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use sortgate_frame::{
    decode_ack, decode_capture_response, encode_capture_request, encode_command, CaptureError,
    ChannelConfig, ChannelError, CodecConfig, FrameChannel, ValidationError,
};
use sortgate_transport::{SerialTransport, Transport};

use crate::error::{ControlError, Result};
use crate::gate::{ActuationDecision, ClassificationResult, ConfidenceGate, SkipReason};
use crate::gate::{validate_threshold, DEFAULT_THRESHOLD};
use crate::pipeline::{CycleObserver, PixelBuffer, Pipeline};

/// Consecutive link-lost cycles tolerated before the loop gives up.
pub const DEFAULT_LINK_LOSS_LIMIT: u32 = 5;

/// Longest uninterrupted sleep between cycles; bounds stop latency.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Control loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Minimum confidence to actuate, exclusive.
    pub threshold: f64,
    /// Framing timeouts, size limit and category set.
    pub codec: CodecConfig,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
    /// Pause between cycles.
    pub interval: Duration,
    /// Exit after this many consecutive link-lost cycles; 0 never exits.
    pub link_loss_limit: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            codec: CodecConfig::default(),
            max_cycles: None,
            interval: Duration::ZERO,
            link_loss_limit: DEFAULT_LINK_LOSS_LIMIT,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_threshold(self.threshold)?;
        if self.codec.categories.is_empty() {
            return Err(ValidationError::InvalidLabel(String::new()));
        }
        Ok(())
    }
}

/// Where the loop is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Capturing,
    Decoding,
    Classifying,
    Gating,
    Actuating,
    Closed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Capturing => "capturing",
            CycleState::Decoding => "decoding",
            CycleState::Classifying => "classifying",
            CycleState::Gating => "gating",
            CycleState::Actuating => "actuating",
            CycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad class of a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Io,
    Disconnected,
    Protocol,
    Decode,
    Classify,
}

impl FailureKind {
    fn from_channel(err: &ChannelError) -> Self {
        if err.is_link_lost() {
            FailureKind::Disconnected
        } else if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Io
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Io => "io",
            FailureKind::Disconnected => "disconnected",
            FailureKind::Protocol => "protocol",
            FailureKind::Decode => "decode",
            FailureKind::Classify => "classify",
        }
    }
}

/// What the peripheral said after an actuation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckStatus {
    /// `Gate:<category>` for the category sent.
    Confirmed { text: String },
    /// A line arrived but did not confirm the category.
    Mismatch { text: String },
    /// Nothing arrived before the ack timeout.
    Missing,
}

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Actuated {
        category: String,
        ack: AckStatus,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        stage: CycleState,
        kind: FailureKind,
        reason: String,
    },
}

/// Record of one finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    pub classification: Option<ClassificationResult>,
    pub payload_bytes: Option<usize>,
    pub elapsed_ms: u64,
}

/// Running counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub actuated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub acks_missing: u64,
    pub acks_mismatched: u64,
}

/// Why [`ControlLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The stop flag was raised.
    Stopped,
    /// `max_cycles` cycles ran.
    CycleLimit,
    /// Too many consecutive cycles found the link gone.
    LinkLost,
}

/// Final counters and exit reason of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopSummary {
    #[serde(flatten)]
    pub stats: LoopStats,
    pub exit: ExitReason,
}

/// Drives one peripheral through repeated cycles.
pub struct ControlLoop<T: Transport> {
    channel: FrameChannel<T>,
    config: LoopConfig,
    gate: ConfidenceGate,
    state: CycleState,
    stats: LoopStats,
    link_failures: u32,
}

impl ControlLoop<SerialTransport> {
    /// Open `port` and build a loop over it.
    pub fn connect(
        port: &str,
        baud_rate: u32,
        channel: ChannelConfig,
        config: LoopConfig,
    ) -> Result<Self> {
        config.validate()?;
        let channel = FrameChannel::open(port, baud_rate, channel)?;
        Self::new(channel, config)
    }
}

impl<T: Transport> ControlLoop<T> {
    pub fn new(channel: FrameChannel<T>, config: LoopConfig) -> Result<Self> {
        config.validate()?;
        let gate = ConfidenceGate::new(config.threshold)?;
        Ok(Self {
            channel,
            config,
            gate,
            state: CycleState::Idle,
            stats: LoopStats::default(),
            link_failures: 0,
        })
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one full cycle and return its report with the decoded frame.
    pub fn run_cycle(&mut self, pipeline: &Pipeline<'_>) -> (CycleReport, Option<PixelBuffer>) {
        let started = Instant::now();
        self.stats.cycles += 1;
        let cycle = self.stats.cycles;

        let mut classification = None;
        let mut payload_bytes = None;
        let mut frame = None;
        let outcome = self.cycle_outcome(
            pipeline,
            &mut classification,
            &mut payload_bytes,
            &mut frame,
        );
        self.state = if self.channel.is_closed() {
            CycleState::Closed
        } else {
            CycleState::Idle
        };

        self.account(cycle, &outcome);

        let report = CycleReport {
            cycle,
            outcome,
            classification,
            payload_bytes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        (report, frame)
    }

    fn cycle_outcome(
        &mut self,
        pipeline: &Pipeline<'_>,
        classification: &mut Option<ClassificationResult>,
        payload_bytes: &mut Option<usize>,
        frame: &mut Option<PixelBuffer>,
    ) -> CycleOutcome {
        self.state = CycleState::Capturing;
        if let Err(err) = self.send_capture() {
            return channel_failure(CycleState::Capturing, &err);
        }
        let payload = match decode_capture_response(&mut self.channel, &self.config.codec) {
            Ok(payload) => payload,
            Err(CaptureError::Protocol(err)) => {
                return failed(CycleState::Capturing, FailureKind::Protocol, err.to_string())
            }
            Err(CaptureError::Channel(err)) => return channel_failure(CycleState::Capturing, &err),
        };
        *payload_bytes = Some(payload.len());

        self.state = CycleState::Decoding;
        let decoded = match pipeline.decoder.decode(payload.as_bytes()) {
            Ok(decoded) => decoded,
            Err(err) => return failed(CycleState::Decoding, FailureKind::Decode, err.to_string()),
        };

        self.state = CycleState::Classifying;
        let frame = frame.insert(decoded);
        let result = match pipeline.classifier.classify(frame) {
            Ok(result) => result,
            Err(err) => {
                return failed(
                    CycleState::Classifying,
                    FailureKind::Classify,
                    err.to_string(),
                )
            }
        };

        self.state = CycleState::Gating;
        let decision = self.gate.decide(&result);
        *classification = Some(result);
        let category = match decision {
            ActuationDecision::Actuate(category) => category,
            ActuationDecision::Skip(reason) => return CycleOutcome::Skipped { reason },
        };

        self.state = CycleState::Actuating;
        let command = match encode_command(&category, &self.config.codec.categories) {
            Ok(command) => command,
            Err(err) => {
                debug!(%err, "classifier label not actuatable");
                return CycleOutcome::Skipped {
                    reason: SkipReason::UnknownCategory { label: category },
                };
            }
        };
        if let Err(err) = self.channel.write_line(&command) {
            return channel_failure(CycleState::Actuating, &err);
        }
        let ack = match decode_ack(&mut self.channel, self.config.codec.ack_timeout) {
            Ok(ack) if ack.matches(&category) => AckStatus::Confirmed {
                text: ack.text().to_string(),
            },
            Ok(ack) => AckStatus::Mismatch {
                text: ack.text().to_string(),
            },
            Err(err) => {
                debug!(%err, "no ack line");
                AckStatus::Missing
            }
        };
        CycleOutcome::Actuated { category, ack }
    }

    fn send_capture(&mut self) -> std::result::Result<(), ChannelError> {
        self.channel.discard_input()?;
        self.channel.write_line(&encode_capture_request())
    }

    fn account(&mut self, cycle: u64, outcome: &CycleOutcome) {
        let mut link_lost = false;
        match outcome {
            CycleOutcome::Actuated { category, ack } => {
                self.stats.actuated += 1;
                match ack {
                    AckStatus::Confirmed { .. } => {
                        info!(cycle, %category, "gate actuated")
                    }
                    AckStatus::Mismatch { text } => {
                        self.stats.acks_mismatched += 1;
                        warn!(cycle, %category, ack = %text, "gate ack does not match command");
                    }
                    AckStatus::Missing => {
                        self.stats.acks_missing += 1;
                        warn!(cycle, %category, "gate ack missing");
                    }
                }
            }
            CycleOutcome::Skipped { reason } => {
                self.stats.skipped += 1;
                match reason {
                    SkipReason::BelowThreshold {
                        confidence,
                        threshold,
                    } => debug!(cycle, confidence, threshold, "below threshold, skipping"),
                    SkipReason::UnknownCategory { label } => {
                        warn!(cycle, %label, "unknown category, skipping")
                    }
                }
            }
            CycleOutcome::Failed {
                stage,
                kind,
                reason,
            } => {
                self.stats.failed += 1;
                link_lost = *kind == FailureKind::Disconnected;
                warn!(cycle, %stage, kind = kind.as_str(), %reason, "cycle failed");
            }
        }
        self.link_failures = if link_lost { self.link_failures + 1 } else { 0 };
    }

    fn link_lost(&self) -> bool {
        self.config.link_loss_limit > 0 && self.link_failures >= self.config.link_loss_limit
    }

    fn cycle_limit_reached(&self) -> bool {
        self.config
            .max_cycles
            .is_some_and(|max| self.stats.cycles >= max)
    }

    /// Run cycles until `stop` is raised, the cycle limit is reached or the
    /// link is lost, then close the channel.
    ///
    /// `stop` is checked only between cycles.
    pub fn run(
        mut self,
        pipeline: &Pipeline<'_>,
        stop: &AtomicBool,
        observer: &mut dyn CycleObserver,
    ) -> Result<LoopSummary> {
        info!(
            link = %self.channel.describe(),
            threshold = self.config.threshold,
            categories = %self.config.codec.categories,
            "control loop started"
        );

        let exit = loop {
            if stop.load(Ordering::SeqCst) {
                break ExitReason::Stopped;
            }
            if self.cycle_limit_reached() {
                break ExitReason::CycleLimit;
            }

            let (report, frame) = self.run_cycle(pipeline);
            observer.on_cycle(&report, frame.as_ref());

            if self.link_lost() {
                warn!(
                    failures = self.link_failures,
                    "peripheral unreachable, giving up"
                );
                break ExitReason::LinkLost;
            }
            if !self.cycle_limit_reached() {
                pause(self.config.interval, stop);
            }
        };

        self.close()?;
        let summary = LoopSummary {
            stats: self.stats.clone(),
            exit,
        };
        info!(
            exit = ?summary.exit,
            cycles = summary.stats.cycles,
            actuated = summary.stats.actuated,
            failed = summary.stats.failed,
            "control loop stopped"
        );
        Ok(summary)
    }

    /// Release the channel. Further cycles fail as disconnected.
    pub fn close(&mut self) -> Result<()> {
        self.state = CycleState::Closed;
        self.channel.close().map_err(ControlError::Close)
    }
}

impl<T: Transport> fmt::Debug for ControlLoop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("link", &self.channel.describe())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

fn failed(stage: CycleState, kind: FailureKind, reason: String) -> CycleOutcome {
    CycleOutcome::Failed {
        stage,
        kind,
        reason,
    }
}

fn channel_failure(stage: CycleState, err: &ChannelError) -> CycleOutcome {
    failed(stage, FailureKind::from_channel(err), err.to_string())
}

fn pause(interval: Duration, stop: &AtomicBool) {
    let until = Instant::now() + interval;
    loop {
        let left = until.saturating_duration_since(Instant::now());
        if left.is_zero() || stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(left.min(STOP_POLL));
    }
}
