//! Nightly feature derivation
//!
//! This module derives per-night features from a raw sleep record:
//! - Total sleep time and time in bed
//! - Sleep stage shares
//! - Wake after sleep onset
//! - Local bed and wake clock times

use crate::types::{minutes_from_midnight, SleepRecord};
use serde::{Deserialize, Serialize};

/// Time-in-bed multiplier used when start/end are unknown
pub const TIME_IN_BED_FALLBACK_FACTOR: f64 = 1.08;

/// Features derived from a single night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightFeatures {
    /// Session duration as reported (minutes)
    pub duration_minutes: f64,
    /// Duration minus awake time, when awake time is known (minutes)
    pub total_sleep_minutes: f64,
    /// Start-to-end span (minutes), when both timestamps are known
    pub measured_time_in_bed_minutes: Option<f64>,
    /// Awake minutes during the session
    pub waso_minutes: Option<f64>,
    /// Deep sleep share of the session (%)
    pub deep_percent: Option<f64>,
    /// REM share of the session (%)
    pub rem_percent: Option<f64>,
    /// Local bedtime, minutes past midnight
    pub bedtime_minutes: Option<f64>,
    /// Local wake time, minutes past midnight
    pub wake_minutes: Option<f64>,
}

/// Feature deriver for sleep records
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive features from a record; `None` when the duration is not positive
    pub fn derive(record: &SleepRecord) -> Option<NightFeatures> {
        let duration = record.duration_minutes;
        if !duration.is_finite() || duration <= 0.0 {
            return None;
        }

        let waso_minutes = valid_minutes(record.awake_minutes);

        Some(NightFeatures {
            duration_minutes: duration,
            total_sleep_minutes: compute_total_sleep(duration, waso_minutes),
            measured_time_in_bed_minutes: record.time_span_minutes(),
            waso_minutes,
            deep_percent: compute_stage_percent(valid_minutes(record.deep_minutes), duration),
            rem_percent: compute_stage_percent(valid_minutes(record.rem_minutes), duration),
            bedtime_minutes: record.start_time.as_ref().map(minutes_from_midnight),
            wake_minutes: record.end_time.as_ref().map(minutes_from_midnight),
        })
    }
}

impl NightFeatures {
    /// Time in bed for scoring: measured span, else duration × 1.08
    pub fn scoring_time_in_bed(&self) -> f64 {
        self.measured_time_in_bed_minutes
            .unwrap_or(self.duration_minutes * TIME_IN_BED_FALLBACK_FACTOR)
    }

    /// Efficiency for scoring (0-1)
    pub fn scoring_efficiency(&self) -> f64 {
        compute_efficiency(self.total_sleep_minutes, self.scoring_time_in_bed())
    }

    /// Efficiency for baselines: measured span, else TST + awake.
    /// `None` when neither the span nor awake time is known.
    pub fn baseline_efficiency(&self) -> Option<f64> {
        let time_in_bed = self
            .measured_time_in_bed_minutes
            .or_else(|| self.waso_minutes.map(|awake| self.total_sleep_minutes + awake))?;
        Some(compute_efficiency(self.total_sleep_minutes, time_in_bed))
    }
}

fn valid_minutes(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Total sleep: duration minus awake minutes, never below zero
fn compute_total_sleep(duration: f64, awake: Option<f64>) -> f64 {
    match awake {
        Some(awake) if awake < duration => duration - awake,
        Some(_) => 0.0,
        None => duration,
    }
}

/// Efficiency: total sleep / time in bed, clamped to 0-1
fn compute_efficiency(total_sleep: f64, time_in_bed: f64) -> f64 {
    if time_in_bed <= 0.0 || !time_in_bed.is_finite() {
        return 0.0;
    }
    (total_sleep / time_in_bed).clamp(0.0, 1.0)
}

/// Stage share of the whole session, as a percentage
fn compute_stage_percent(stage_minutes: Option<f64>, duration: f64) -> Option<f64> {
    stage_minutes.map(|minutes| (minutes / duration * 100.0).clamp(0.0, 100.0))
}
