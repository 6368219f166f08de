//! Diagnostic flags attached to a score

use crate::age_norms::AgeNorm;
use crate::baseline::UserBaseline;
use crate::config::EngineConfig;
use crate::features::NightFeatures;
use crate::score::components::bedtime_deviation;
use crate::types::SleepRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stage shares this far under target are flagged (percentage points)
const LOW_STAGE_MARGIN: f64 = 5.0;
const BEDTIME_DEVIATION_MINUTES: f64 = 60.0;
const BEDTIME_DEVIATION_SEVERE_MINUTES: f64 = 120.0;
/// Bedtime standard deviation treated as social jet lag (minutes)
const SOCIAL_JET_LAG_SPREAD_MINUTES: f64 = 90.0;
const LOW_RELIABILITY_THRESHOLD: f64 = 0.8;
const LATE_SCREEN_TIME_MINUTES: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFlag {
    #[serde(rename = "duration_below_5h")]
    DurationBelow5h,
    DurationBelowGoal,
    LowDeepRatio,
    LowRemRatio,
    HighWaso,
    BedtimeDeviation,
    BedtimeDeviationSevere,
    SocialJetLag,
    DataIncompleteStages,
    DataIncompleteTiming,
    DataIncomplete,
    LowReliabilitySource,
    LateScreenTime,
}

impl ScoreFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreFlag::DurationBelow5h => "duration_below_5h",
            ScoreFlag::DurationBelowGoal => "duration_below_goal",
            ScoreFlag::LowDeepRatio => "low_deep_ratio",
            ScoreFlag::LowRemRatio => "low_rem_ratio",
            ScoreFlag::HighWaso => "high_waso",
            ScoreFlag::BedtimeDeviation => "bedtime_deviation",
            ScoreFlag::BedtimeDeviationSevere => "bedtime_deviation_severe",
            ScoreFlag::SocialJetLag => "social_jet_lag",
            ScoreFlag::DataIncompleteStages => "data_incomplete_stages",
            ScoreFlag::DataIncompleteTiming => "data_incomplete_timing",
            ScoreFlag::DataIncomplete => "data_incomplete",
            ScoreFlag::LowReliabilitySource => "low_reliability_source",
            ScoreFlag::LateScreenTime => "late_screen_time",
        }
    }
}

/// Inputs the flag rules look at
pub(crate) struct FlagContext<'a> {
    pub record: &'a SleepRecord,
    pub features: &'a NightFeatures,
    pub baseline: &'a UserBaseline,
    pub age_norm: &'a AgeNorm,
    pub goal_minutes: f64,
    pub deep_target: f64,
    pub rem_target: f64,
    pub config: &'a EngineConfig,
}

/// Flags describing missing data; shared with the zero result
pub(crate) fn completeness_flags(record: &SleepRecord) -> BTreeSet<ScoreFlag> {
    let mut flags = BTreeSet::new();
    if record.missing_stage_fields() > 0 {
        flags.insert(ScoreFlag::DataIncompleteStages);
    }
    if !record.has_timing() {
        flags.insert(ScoreFlag::DataIncompleteTiming);
    }
    if !flags.is_empty() {
        flags.insert(ScoreFlag::DataIncomplete);
    }
    flags
}

pub(crate) fn compute_flags(ctx: &FlagContext<'_>) -> BTreeSet<ScoreFlag> {
    let mut flags = completeness_flags(ctx.record);
    let features = ctx.features;

    if features.total_sleep_minutes < 5.0 * 60.0 {
        flags.insert(ScoreFlag::DurationBelow5h);
    }
    if features.duration_minutes < ctx.goal_minutes {
        flags.insert(ScoreFlag::DurationBelowGoal);
    }
    if features
        .deep_percent
        .is_some_and(|pct| pct < ctx.deep_target - LOW_STAGE_MARGIN)
    {
        flags.insert(ScoreFlag::LowDeepRatio);
    }
    if features
        .rem_percent
        .is_some_and(|pct| pct < ctx.rem_target - LOW_STAGE_MARGIN)
    {
        flags.insert(ScoreFlag::LowRemRatio);
    }
    if features
        .waso_minutes
        .is_some_and(|waso| waso > ctx.age_norm.waso_acceptable_minutes)
    {
        flags.insert(ScoreFlag::HighWaso);
    }

    let enough_history = ctx.baseline.bedtime_nights as usize >= ctx.config.consistency_min_nights;
    if enough_history {
        if let Some(bedtime) = features.bedtime_minutes {
            let deviation = bedtime_deviation(bedtime, ctx.baseline.median_bedtime_minutes);
            if deviation > BEDTIME_DEVIATION_MINUTES {
                flags.insert(ScoreFlag::BedtimeDeviation);
            }
            if deviation > BEDTIME_DEVIATION_SEVERE_MINUTES {
                flags.insert(ScoreFlag::BedtimeDeviationSevere);
            }
        }
        if ctx.baseline.bedtime_variance.max(0.0).sqrt() > SOCIAL_JET_LAG_SPREAD_MINUTES {
            flags.insert(ScoreFlag::SocialJetLag);
        }
    }

    if ctx.record.source.reliability() < LOW_RELIABILITY_THRESHOLD {
        flags.insert(ScoreFlag::LowReliabilitySource);
    }
    if ctx
        .record
        .screen_time
        .as_ref()
        .and_then(|s| s.minutes_before_bed)
        .is_some_and(|m| m >= LATE_SCREEN_TIME_MINUTES)
    {
        flags.insert(ScoreFlag::LateScreenTime);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::age_norms::AgeNormProvider;
    use crate::features::FeatureDeriver;
    use crate::types::{parse_timestamp, DataSource, ScreenTimeSummary};

    fn flags_for(record: &SleepRecord, baseline: &UserBaseline) -> BTreeSet<ScoreFlag> {
        let features = FeatureDeriver::derive(record).unwrap();
        let config = EngineConfig::default();
        let age_norm = AgeNormProvider::for_age(Some(30));
        compute_flags(&FlagContext {
            record,
            features: &features,
            baseline,
            age_norm: &age_norm,
            goal_minutes: 480.0,
            deep_target: 18.0,
            rem_target: 22.0,
            config: &config,
        })
    }

    #[test]
    fn test_short_fragmented_night() {
        let record = SleepRecord {
            duration_minutes: 280.0,
            start_time: parse_timestamp("2024-01-15T23:00:00Z"),
            end_time: parse_timestamp("2024-01-16T03:40:00Z"),
            deep_minutes: Some(20.0),
            rem_minutes: Some(30.0),
            light_minutes: Some(180.0),
            awake_minutes: Some(50.0),
            source: DataSource::Wearable,
            ..Default::default()
        };
        let flags = flags_for(&record, &UserBaseline::default());

        assert!(flags.contains(&ScoreFlag::DurationBelow5h));
        assert!(flags.contains(&ScoreFlag::DurationBelowGoal));
        assert!(flags.contains(&ScoreFlag::LowDeepRatio));
        assert!(flags.contains(&ScoreFlag::LowRemRatio));
        assert!(flags.contains(&ScoreFlag::HighWaso));
        assert!(!flags.contains(&ScoreFlag::DataIncomplete));
        assert!(!flags.contains(&ScoreFlag::LowReliabilitySource));
    }

    #[test]
    fn test_bedtime_flags_need_history() {
        let record = SleepRecord {
            duration_minutes: 480.0,
            start_time: parse_timestamp("2024-01-16T02:00:00Z"),
            end_time: parse_timestamp("2024-01-16T10:00:00Z"),
            source: DataSource::Manual,
            screen_time: Some(ScreenTimeSummary {
                total_minutes: Some(300.0),
                minutes_before_bed: Some(45.0),
            }),
            ..Default::default()
        };
        let without_history = flags_for(&record, &UserBaseline::default());
        assert!(!without_history.contains(&ScoreFlag::BedtimeDeviation));

        let baseline = UserBaseline {
            median_bedtime_minutes: 23.0 * 60.0,
            bedtime_variance: 100.0 * 100.0,
            bedtime_nights: 10,
            ..Default::default()
        };
        let flags = flags_for(&record, &baseline);
        assert!(flags.contains(&ScoreFlag::BedtimeDeviation));
        assert!(flags.contains(&ScoreFlag::BedtimeDeviationSevere));
        assert!(flags.contains(&ScoreFlag::SocialJetLag));
        assert!(flags.contains(&ScoreFlag::LowReliabilitySource));
        assert!(flags.contains(&ScoreFlag::LateScreenTime));
        assert!(flags.contains(&ScoreFlag::DataIncompleteStages));
    }

    #[test]
    fn test_flag_names() {
        let json = serde_json::to_string(&ScoreFlag::DurationBelow5h).unwrap();
        assert_eq!(json, "\"duration_below_5h\"");
        assert_eq!(ScoreFlag::SocialJetLag.as_str(), "social_jet_lag");
    }
}
