//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Sleep. Every call takes its
//! inputs explicitly (record, history, profile, clock) and returns fresh
//! results; nothing is cached between calls.
//!
//! Stages:
//! 1. BaselineCalculator / PhysiologyEstimator - personal and population context
//! 2. StageDistributionPredictor - measured or predicted stage shares
//! 3. Cycle timeline - aggregate or prediction strategy
//! 4. ScoreCalculator - score breakdown

use crate::baseline::{sleep_debt_minutes, BaselineCalculator, UserBaseline};
use crate::config::EngineConfig;
use crate::error::{ComputeError, TimelineError};
use crate::hypnogram::{HypnogramNormalizer, HypnogramResult, PhaseRow};
use crate::physiology::{EstimatedPhysiology, PhysiologyEstimator};
use crate::prediction::{PredictionInput, StageDistributionPredictor};
use crate::score::{ScoreBreakdown, ScoreCalculator};
use crate::timeline::{
    budget_from_record, distribute_sleep_cycles, generate_phase_timeline, SleepTimeline,
    TimelineContext,
};
use crate::types::{deserialize_lenient_timestamp, SleepRecord, StageDistribution, UserProfile};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Everything needed to evaluate one night
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NightRequest {
    pub record: SleepRecord,
    #[serde(default)]
    pub history: Vec<SleepRecord>,
    #[serde(default)]
    pub profile: UserProfile,
    /// Injected clock for the score timestamp and age calculations
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub now: Option<DateTime<FixedOffset>>,
}

impl NightRequest {
    /// The injected clock, else the record's own end or start, else the epoch.
    /// Never the wall clock.
    pub fn reference_time(&self) -> DateTime<FixedOffset> {
        self.now
            .or(self.record.end_time)
            .or(self.record.start_time)
            .unwrap_or_default()
    }
}

/// Full evaluation of one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightAnalysis {
    pub score: ScoreBreakdown,
    pub distribution: StageDistribution,
    pub physiology: EstimatedPhysiology,
    pub baseline: UserBaseline,
    /// Net deficit over the recent window (minutes)
    pub recent_sleep_debt_minutes: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<SleepTimeline>,
    /// Why no timeline was produced, when one was expected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_error: Option<String>,
}

/// Output wrapper carrying producer metadata
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub producer: &'static str,
    pub engine_version: &'static str,
    pub result: T,
}

impl<T> Envelope<T> {
    pub fn new(result: T) -> Self {
        Self {
            producer: PRODUCER_NAME,
            engine_version: ENGINE_VERSION,
            result,
        }
    }
}

/// Stateless engine holding only configuration
#[derive(Debug, Clone, Default)]
pub struct SleepEngine {
    config: EngineConfig,
}

impl SleepEngine {
    /// Create an engine with a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn goal_minutes(&self, request: &NightRequest) -> f64 {
        request
            .profile
            .goal_minutes_or(self.config.default_sleep_goal_minutes)
    }

    /// Baseline from the request history
    pub fn baseline(&self, request: &NightRequest) -> UserBaseline {
        BaselineCalculator::calculate(&request.history, self.goal_minutes(request))
    }

    /// Estimated physiology, overridden by any plausible measured values
    pub fn physiology(&self, request: &NightRequest) -> EstimatedPhysiology {
        let as_of = request.reference_time().date_naive();
        PhysiologyEstimator::estimate(&request.profile, as_of).with_measurements(&request.record)
    }

    /// Net sleep debt over the recent window
    pub fn recent_debt(&self, request: &NightRequest) -> f64 {
        sleep_debt_minutes(
            &request.history,
            self.goal_minutes(request),
            self.config.recent_debt_window_nights,
        )
    }

    pub fn score(&self, request: &NightRequest) -> ScoreBreakdown {
        ScoreCalculator::calculate(
            &request.record,
            &request.history,
            &request.profile,
            request.reference_time(),
            &self.config,
        )
    }

    pub fn predict(&self, request: &NightRequest) -> StageDistribution {
        let physiology = self.physiology(request);
        let baseline = self.baseline(request);
        self.predict_with(request, &physiology, &baseline, self.recent_debt(request))
    }

    fn predict_with(
        &self,
        request: &NightRequest,
        physiology: &EstimatedPhysiology,
        baseline: &UserBaseline,
        debt: f64,
    ) -> StageDistribution {
        let personal = |pct: f64| Some(pct).filter(|p| *p > 0.0);
        StageDistributionPredictor::predict(&PredictionInput {
            record: &request.record,
            physiology,
            sleep_debt_minutes: debt,
            chronotype: request.profile.chronotype.unwrap_or_default(),
            personal_deep_percent: personal(baseline.avg_deep_percent),
            personal_rem_percent: personal(baseline.avg_rem_percent),
        })
    }

    /// Phase timeline for the night.
    ///
    /// `Ok(None)` when the record has no usable anchor time. Valid measured
    /// stages take the aggregate strategy; anything else is predicted first.
    pub fn timeline(&self, request: &NightRequest) -> Result<Option<SleepTimeline>, TimelineError> {
        let physiology = self.physiology(request);
        let baseline = self.baseline(request);
        let debt = self.recent_debt(request);
        self.timeline_with(request, &physiology, &baseline, debt)
    }

    fn timeline_with(
        &self,
        request: &NightRequest,
        physiology: &EstimatedPhysiology,
        baseline: &UserBaseline,
        debt: f64,
    ) -> Result<Option<SleepTimeline>, TimelineError> {
        let ctx = match TimelineContext::from_record(&request.record, physiology, debt, &self.config)
        {
            Ok(ctx) => ctx,
            Err(TimelineError::MissingAnchor) => return Ok(None),
            Err(e) => return Err(e),
        };

        let measured = StageDistributionPredictor::measured(&request.record).is_some();
        let timeline = match budget_from_record(&request.record) {
            Some(budget) if measured => distribute_sleep_cycles(&ctx, budget)?,
            _ => {
                let distribution = self.predict_with(request, physiology, baseline, debt);
                generate_phase_timeline(&ctx, &distribution)?
            }
        };
        Ok(Some(timeline))
    }

    /// Score, distribution, physiology, baseline and timeline in one pass
    pub fn analyze(&self, request: &NightRequest) -> NightAnalysis {
        let physiology = self.physiology(request);
        let baseline = self.baseline(request);
        let debt = self.recent_debt(request);

        let distribution = self.predict_with(request, &physiology, &baseline, debt);
        let (timeline, timeline_error) =
            match self.timeline_with(request, &physiology, &baseline, debt) {
                Ok(timeline) => (timeline, None),
                Err(e) => (None, Some(e.to_string())),
            };

        NightAnalysis {
            score: self.score(request),
            distribution,
            physiology,
            baseline,
            recent_sleep_debt_minutes: debt,
            timeline,
            timeline_error,
        }
    }
}

fn engine_from(config_json: Option<&str>) -> Result<SleepEngine, ComputeError> {
    match config_json {
        Some(json) if !json.trim().is_empty() => SleepEngine::new(EngineConfig::from_json(json)?),
        _ => Ok(SleepEngine::default()),
    }
}

fn parse_request(json: &str) -> Result<NightRequest, ComputeError> {
    serde_json::from_str(json).map_err(ComputeError::from)
}

/// Score a night from a JSON `NightRequest`.
///
/// # Example
/// ```ignore
/// let out = score_night_json(r#"{"record": {"duration_minutes": 450}}"#, None)?;
/// ```
pub fn score_night_json(json: &str, config_json: Option<&str>) -> Result<String, ComputeError> {
    let engine = engine_from(config_json)?;
    let request = parse_request(json)?;
    Ok(serde_json::to_string(&Envelope::new(engine.score(&request)))?)
}

/// Analyze a night from a JSON `NightRequest`
pub fn analyze_night_json(json: &str, config_json: Option<&str>) -> Result<String, ComputeError> {
    let engine = engine_from(config_json)?;
    let request = parse_request(json)?;
    Ok(serde_json::to_string(&Envelope::new(engine.analyze(&request)))?)
}

/// Phase timeline from a JSON `NightRequest`; `result` is null without an anchor
pub fn timeline_night_json(json: &str, config_json: Option<&str>) -> Result<String, ComputeError> {
    let engine = engine_from(config_json)?;
    let request = parse_request(json)?;
    let timeline = engine.timeline(&request)?;
    Ok(serde_json::to_string(&Envelope::new(timeline))?)
}

/// Normalize a JSON array of phase rows
pub fn normalize_hypnogram_json(json: &str) -> Result<String, ComputeError> {
    let rows: Vec<PhaseRow> = serde_json::from_str(json)?;
    let result: HypnogramResult = HypnogramNormalizer::normalize(&rows);
    Ok(serde_json::to_string(&Envelope::new(result))?)
}
