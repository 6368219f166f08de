//! Error types for Synheart Sleep

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),
}

/// Reasons a phase timeline could not be produced.
///
/// `InsufficientDuration`, `ExcessiveDuration` and `MissingAnchor` describe
/// input-data problems; callers fall back to a non-timeline representation.
/// `Invariant` means the redistribution math produced a corrupt timeline and is
/// never recoverable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    #[error("total duration of {0} minutes is too short for a cycle timeline")]
    InsufficientDuration(i64),

    #[error("total duration of {0} minutes is longer than one day")]
    ExcessiveDuration(i64),

    #[error("timeline has no usable start time")]
    MissingAnchor,

    #[error("timeline invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl TimelineError {
    /// True for internal contract violations (a bug, not bad input)
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimelineError::Invariant(_))
    }
}

/// Internal contract violations detected by the timeline invariant check
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("timeline sums to {actual} minutes, expected {expected} (±1)")]
    DurationMismatch { expected: i64, actual: i64 },

    #[error("event {index} has non-positive duration {duration}")]
    NonPositiveDuration { index: usize, duration: i64 },

    #[error("event {index} claims {duration} minutes but spans {span}")]
    SpanMismatch {
        index: usize,
        duration: i64,
        span: i64,
    },

    #[error("event {index} ends at {end} but event {next} starts at {start}")]
    NonContiguous {
        index: usize,
        next: usize,
        end: String,
        start: String,
    },

    #[error("timeline does not open with a cycle-0 awake latency event")]
    MissingLatency,
}
