//! Synheart Sleep - Deterministic sleep architecture engine
//!
//! Sleep turns a night's summary record into a 0-100 quality score, a stage
//! distribution, and a minute-resolution phase timeline through a deterministic
//! pipeline: feature derivation → baseline computation → stage prediction →
//! cycle synthesis → scoring.
//!
//! ## Modules
//!
//! - **Scoring**: Six weighted components with reliability and completeness adjustments
//! - **Timeline**: Cycle-by-cycle phase events that always add up to the night
//! - **Hypnogram**: Cleanup of persisted phase rows for chart rendering

pub mod age_norms;
pub mod baseline;
pub mod config;
pub mod error;
pub mod features;
pub mod hypnogram;
pub mod physiology;
pub mod pipeline;
pub mod prediction;
pub mod redistribute;
pub mod score;
pub mod timeline;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::{ComputeError, InvariantViolation, TimelineError};
pub use pipeline::{
    analyze_night_json, normalize_hypnogram_json, score_night_json, timeline_night_json,
    NightAnalysis, NightRequest, SleepEngine,
};

// Stage and timeline exports
pub use hypnogram::{HypnogramNormalizer, HypnogramResult, PhaseRow};
pub use prediction::StageDistributionPredictor;
pub use score::{ScoreBreakdown, ScoreCalculator, ScoreComponent, ScoreFlag};
pub use timeline::{SleepTimeline, StrategyKind, TimelineContext};
pub use types::{
    ConfidenceTier, DataSource, PhaseEvent, SleepRecord, SleepStage, StageDistribution,
    UserProfile,
};

/// Engine version embedded in every output envelope
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for output envelopes
pub const PRODUCER_NAME: &str = "synheart-sleep";
