//! Confidence-gated control loop for the sortgate camera peripheral.
//!
//! A [`ControlLoop`] owns one [`sortgate_frame::FrameChannel`] and runs
//! cycles of capture, decode, classify, gate and actuate. Decoding and
//! classification are delegated to the [`ImageDecoder`] and [`Classifier`]
//! collaborators bundled in a [`Pipeline`]; each finished cycle is handed to
//! a [`CycleObserver`].
//!
//! The gate never actuates unless the classifier's confidence is strictly
//! above the threshold and the label is one of the configured categories.

pub mod control;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod process;

pub use control::{
    AckStatus, ControlLoop, CycleOutcome, CycleReport, CycleState, ExitReason, FailureKind,
    LoopConfig, LoopStats, LoopSummary, DEFAULT_LINK_LOSS_LIMIT,
};
pub use error::{ClassifyError, ControlError, DecodeError, Result};
pub use gate::{
    decide, validate_threshold, ActuationDecision, ClassificationResult, ConfidenceGate,
    SkipReason, DEFAULT_THRESHOLD,
};
pub use pipeline::{
    Classifier, CycleObserver, ImageDecoder, JpegDecoder, NoopObserver, PixelBuffer, Pipeline,
};
pub use process::{ProcessClassifier, DEFAULT_CLASSIFY_TIMEOUT};
