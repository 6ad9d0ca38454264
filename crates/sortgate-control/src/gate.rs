//! Confidence gate between the classifier and the actuator.
//!
//! A result actuates only when its confidence is strictly above the
//! threshold. At exactly the threshold the gate stays shut.

use serde::{Deserialize, Serialize};
use sortgate_frame::ValidationError;

/// Default minimum confidence, exclusive.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Output of the classifier for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Why a cycle did not actuate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Confidence did not clear the threshold.
    BelowThreshold { confidence: f64, threshold: f64 },
    /// The label is not a category the peripheral accepts.
    UnknownCategory { label: String },
}

/// What to do with a classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationDecision {
    Actuate(String),
    Skip(SkipReason),
}

impl ActuationDecision {
    pub fn is_actuate(&self) -> bool {
        matches!(self, ActuationDecision::Actuate(_))
    }
}

/// Map a classification to a decision under `threshold`.
///
/// Total over all inputs: a NaN confidence compares false and skips.
pub fn decide(result: &ClassificationResult, threshold: f64) -> ActuationDecision {
    if result.confidence > threshold {
        ActuationDecision::Actuate(result.label.clone())
    } else {
        ActuationDecision::Skip(SkipReason::BelowThreshold {
            confidence: result.confidence,
            threshold,
        })
    }
}

/// Check that `threshold` is a probability.
pub fn validate_threshold(threshold: f64) -> Result<f64, ValidationError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ValidationError::ThresholdOutOfRange(threshold))
    }
}

/// A gate bound to a validated threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    threshold: f64,
}

impl ConfidenceGate {
    pub fn new(threshold: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            threshold: validate_threshold(threshold)?,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn decide(&self, result: &ClassificationResult) -> ActuationDecision {
        decide(result, self.threshold)
    }
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}
