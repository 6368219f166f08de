//! Cycle timeline synthesis
//!
//! Produces a minute-resolution phase timeline (awake, light, deep, REM) whose
//! events are contiguous, positive and sum to the night's duration. Two entry
//! points share one synthesizer:
//!
//! - [`distribute_sleep_cycles`] spreads aggregate per-stage minutes
//! - [`generate_phase_timeline`] spreads a predicted stage distribution
//!
//! Input problems surface as [`TimelineError::InsufficientDuration`],
//! [`TimelineError::ExcessiveDuration`] or [`TimelineError::MissingAnchor`]. A broken timeline is never returned; it
//! surfaces as [`TimelineError::Invariant`].

pub mod strategy;
pub mod synth;
pub mod validate;

pub use strategy::{CycleStrategy, StrategyKind};
pub use synth::{MAX_TIMELINE_MINUTES, MIN_TIMELINE_MINUTES};
pub use validate::validate_timeline;

use crate::config::EngineConfig;
use crate::error::TimelineError;
use crate::physiology::EstimatedPhysiology;
use crate::redistribute::apportion;
use crate::types::{CycleBreakdown, PhaseEvent, SleepRecord, StageDistribution, StageTally};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A synthesized night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepTimeline {
    pub strategy: StrategyKind,
    pub events: Vec<PhaseEvent>,
    pub cycles: Vec<CycleBreakdown>,
    pub cycle_count: u32,
    pub sleep_onset_latency_minutes: u32,
    /// Sum of event durations (minutes)
    pub total_minutes: u32,
    /// End-time drift that was too large to absorb (minutes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_minutes: Option<i64>,
}

impl SleepTimeline {
    /// Minutes per stage across the whole timeline, latency included
    pub fn stage_totals(&self) -> StageTally {
        let mut totals = StageTally::default();
        for event in &self.events {
            totals.add(event.stage, event.duration_minutes);
        }
        totals
    }

    pub fn cycle(&self, number: u32) -> Option<&CycleBreakdown> {
        self.cycles.iter().find(|c| c.cycle == number)
    }
}

/// Everything the synthesizer needs besides the stage budget
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineContext {
    /// Time the user went to bed
    pub start: DateTime<FixedOffset>,
    /// Recorded end time, used for drift correction
    pub end: Option<DateTime<FixedOffset>>,
    pub total_minutes: u32,
    pub resting_hr: f64,
    pub age_years: u32,
    /// Recent net sleep debt (minutes)
    pub sleep_debt_minutes: f64,
    pub drift_window_minutes: i64,
}

impl TimelineContext {
    /// Build a context from a night's record.
    ///
    /// Fails with `MissingAnchor` when neither a start time nor an end time plus
    /// duration is known, with `InsufficientDuration` for nights under 30
    /// minutes, and with `ExcessiveDuration` for spans over a day.
    pub fn from_record(
        record: &SleepRecord,
        physiology: &EstimatedPhysiology,
        sleep_debt_minutes: f64,
        config: &EngineConfig,
    ) -> Result<Self, TimelineError> {
        let duration = record.duration_minutes;
        if !duration.is_finite() || duration.round() < f64::from(MIN_TIMELINE_MINUTES) {
            let minutes = if duration.is_finite() {
                duration.round() as i64
            } else {
                0
            };
            return Err(TimelineError::InsufficientDuration(minutes));
        }
        if duration.round() > f64::from(MAX_TIMELINE_MINUTES) {
            return Err(TimelineError::ExcessiveDuration(duration.round() as i64));
        }
        let start = record.anchor_start().ok_or(TimelineError::MissingAnchor)?;

        Ok(Self {
            start,
            end: record.end_time.filter(|end| *end > start),
            total_minutes: duration.round() as u32,
            resting_hr: physiology.resting_hr,
            age_years: physiology.age_years,
            sleep_debt_minutes,
            drift_window_minutes: config.drift_correction_window_minutes,
        })
    }
}

/// Timeline from aggregate stage minutes (real or estimated)
pub fn distribute_sleep_cycles(
    ctx: &TimelineContext,
    budget: StageTally,
) -> Result<SleepTimeline, TimelineError> {
    synth::synthesize(ctx, budget, &CycleStrategy::AGGREGATE)
}

/// Timeline from a predicted stage distribution
pub fn generate_phase_timeline(
    ctx: &TimelineContext,
    distribution: &StageDistribution,
) -> Result<SleepTimeline, TimelineError> {
    let minutes = apportion(
        ctx.total_minutes,
        &[
            distribution.deep_percent,
            distribution.rem_percent,
            distribution.light_percent,
            distribution.awake_percent,
        ],
    );
    let budget = StageTally {
        deep: minutes[0],
        rem: minutes[1],
        light: minutes[2],
        awake: minutes[3],
    };
    synth::synthesize(ctx, budget, &CycleStrategy::PREDICTION)
}

/// Whole-minute stage budget from a record's stage fields, when all are present.
/// Each stage is capped at one day.
pub fn budget_from_record(record: &SleepRecord) -> Option<StageTally> {
    let stages = record.stage_minutes()?;
    let minutes = |value: f64| value.min(f64::from(MAX_TIMELINE_MINUTES)).round() as u32;
    Some(StageTally {
        deep: minutes(stages.deep),
        rem: minutes(stages.rem),
        light: minutes(stages.light),
        awake: minutes(stages.awake),
    })
}

/// Per-cycle aggregates for every sleep cycle (latency excluded)
pub fn cycle_breakdowns(events: &[PhaseEvent]) -> Vec<CycleBreakdown> {
    let mut cycles: Vec<CycleBreakdown> = Vec::new();
    for event in events.iter().filter(|e| e.cycle > 0) {
        match cycles.last_mut() {
            Some(current) if current.cycle == event.cycle => {
                current.end = event.end;
                current.duration_minutes += event.duration_minutes;
                current.minutes.add(event.stage, event.duration_minutes);
            }
            _ => {
                let mut minutes = StageTally::default();
                minutes.add(event.stage, event.duration_minutes);
                cycles.push(CycleBreakdown {
                    cycle: event.cycle,
                    start: event.start,
                    end: event.end,
                    duration_minutes: event.duration_minutes,
                    dominant_stage: event.stage,
                    minutes,
                });
            }
        }
    }
    for cycle in &mut cycles {
        cycle.dominant_stage = cycle.minutes.dominant();
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physiology::PhysiologyEstimator;
    use crate::types::{parse_timestamp, SleepStage, UserProfile};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn physiology(age: u32) -> EstimatedPhysiology {
        let profile = UserProfile {
            age: Some(age),
            ..Default::default()
        };
        PhysiologyEstimator::estimate(&profile, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
    }

    fn record(duration: f64) -> SleepRecord {
        SleepRecord {
            duration_minutes: duration,
            start_time: parse_timestamp("2024-01-15T23:00:00Z"),
            end_time: parse_timestamp("2024-01-16T07:00:00Z"),
            deep_minutes: Some(96.0),
            rem_minutes: Some(106.0),
            light_minutes: Some(258.0),
            awake_minutes: Some(20.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_context_requires_anchor() {
        let mut night = record(480.0);
        night.start_time = None;
        night.end_time = None;
        let err = TimelineContext::from_record(
            &night,
            &physiology(30),
            0.0,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, TimelineError::MissingAnchor);
    }

    #[test]
    fn test_context_anchor_from_end_time() {
        let mut night = record(480.0);
        night.start_time = None;
        let ctx = TimelineContext::from_record(
            &night,
            &physiology(30),
            0.0,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(ctx.start, parse_timestamp("2024-01-15T23:00:00Z").unwrap());
    }

    #[test]
    fn test_context_rejects_short_nights() {
        let err = TimelineContext::from_record(
            &record(12.0),
            &physiology(30),
            0.0,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, TimelineError::InsufficientDuration(12));
    }

    #[test]
    fn test_context_rejects_day_long_spans() {
        for duration in [1441.0, 1e12] {
            let err = TimelineContext::from_record(
                &record(duration),
                &physiology(30),
                0.0,
                &EngineConfig::default(),
            )
            .unwrap_err();
            assert!(matches!(err, TimelineError::ExcessiveDuration(_)), "{err:?}");
        }
    }

    #[test]
    fn test_budget_caps_absurd_stage_minutes() {
        let mut night = record(480.0);
        night.deep_minutes = Some(1e15);
        let budget = budget_from_record(&night).unwrap();
        assert_eq!(budget.deep, MAX_TIMELINE_MINUTES);
        assert_eq!(budget.total(), MAX_TIMELINE_MINUTES + 106 + 258 + 20);
    }

    #[test]
    fn test_budget_from_record() {
        let budget = budget_from_record(&record(480.0)).unwrap();
        assert_eq!(budget.total(), 480);

        let mut partial = record(480.0);
        partial.rem_minutes = None;
        assert!(budget_from_record(&partial).is_none());
    }

    #[test]
    fn test_prediction_timeline_matches_duration() {
        let ctx = TimelineContext::from_record(
            &record(480.0),
            &physiology(30),
            0.0,
            &EngineConfig::default(),
        )
        .unwrap();
        let distribution = StageDistribution {
            deep_percent: 18.0,
            rem_percent: 22.0,
            light_percent: 53.0,
            awake_percent: 7.0,
            confidence: Default::default(),
            basis: Vec::new(),
        };
        let timeline = generate_phase_timeline(&ctx, &distribution).unwrap();

        assert_eq!(timeline.strategy, StrategyKind::Prediction);
        assert_eq!(timeline.total_minutes, 480);
        assert!((4..=5).contains(&timeline.cycle_count));
    }

    #[test]
    fn test_first_cycle_rem_stays_low_after_late_bedtime() {
        let mut night = record(480.0);
        night.start_time = parse_timestamp("2024-01-16T02:00:00Z");
        night.end_time = parse_timestamp("2024-01-16T10:00:00Z");
        let ctx =
            TimelineContext::from_record(&night, &physiology(30), 0.0, &EngineConfig::default())
                .unwrap();
        let distribution = StageDistribution {
            deep_percent: 15.0,
            rem_percent: 35.0,
            light_percent: 45.0,
            awake_percent: 5.0,
            confidence: Default::default(),
            basis: Vec::new(),
        };
        let budget = StageTally {
            deep: 72,
            rem: 168,
            light: 216,
            awake: 24,
        };

        let predicted = generate_phase_timeline(&ctx, &distribution).unwrap();
        let aggregate = distribute_sleep_cycles(&ctx, budget).unwrap();
        for timeline in [predicted, aggregate] {
            let first = timeline.cycle(1).unwrap();
            assert!(
                first.minutes.rem <= 8,
                "{} cycle-1 REM was {}",
                timeline.strategy.as_str(),
                first.minutes.rem
            );
            assert_eq!(timeline.total_minutes, 480);
        }
    }

    #[test]
    fn test_cycle_breakdowns_cover_each_cycle() {
        let ctx = TimelineContext::from_record(
            &record(480.0),
            &physiology(30),
            0.0,
            &EngineConfig::default(),
        )
        .unwrap();
        let timeline =
            distribute_sleep_cycles(&ctx, budget_from_record(&record(480.0)).unwrap()).unwrap();

        let cycle_sum: u32 = timeline.cycles.iter().map(|c| c.duration_minutes).sum();
        assert_eq!(
            cycle_sum + timeline.sleep_onset_latency_minutes,
            timeline.total_minutes
        );
        for (i, cycle) in timeline.cycles.iter().enumerate() {
            assert_eq!(cycle.cycle, i as u32 + 1);
            assert_eq!(cycle.minutes.total(), cycle.duration_minutes);
        }
        // Deep is front-loaded
        let first = timeline.cycle(1).unwrap();
        assert_eq!(first.dominant_stage, SleepStage::Deep);
    }
}
