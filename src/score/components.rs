//! Component sub-scores
//!
//! Every function here is total: any finite or non-finite input maps to a value
//! in [0, 1] (or a non-negative penalty), never a panic.

use crate::baseline::UserBaseline;
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};

/// Full credit within this many percentage points of a stage target
pub const STAGE_FULL_CREDIT_BAND: f64 = 2.5;
/// Zero credit at this many points from a stage target
pub const STAGE_ZERO_CREDIT_DISTANCE: f64 = 15.0;

pub const WASO_FULL_CREDIT_MINUTES: f64 = 15.0;
pub const WASO_ZERO_CREDIT_MINUTES: f64 = 60.0;

/// Efficiency shortfall at which the efficiency score reaches zero
const EFFICIENCY_ZERO_CREDIT_SHORTFALL: f64 = 0.25;

/// Bedtime deviation σ (minutes)
const BEDTIME_DEVIATION_SIGMA: f64 = 45.0;
/// Bedtime standard deviation σ (minutes)
const BEDTIME_SPREAD_SIGMA: f64 = 60.0;
const DEVIATION_WEIGHT: f64 = 0.6;

/// Regularity score before enough history exists
pub const NEUTRAL_CONSISTENCY: f64 = 0.75;

const MAX_CHRONIC_DEBT_PENALTY: f64 = 10.0;
const CHRONIC_DEBT_POINTS_PER_HOUR: f64 = 0.5;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Scored components of a night
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Duration,
    Deep,
    Rem,
    Efficiency,
    Waso,
    Consistency,
}

impl ScoreComponent {
    pub const ALL: [ScoreComponent; 6] = [
        ScoreComponent::Duration,
        ScoreComponent::Deep,
        ScoreComponent::Rem,
        ScoreComponent::Efficiency,
        ScoreComponent::Waso,
        ScoreComponent::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreComponent::Duration => "duration",
            ScoreComponent::Deep => "deep",
            ScoreComponent::Rem => "rem",
            ScoreComponent::Efficiency => "efficiency",
            ScoreComponent::Waso => "waso",
            ScoreComponent::Consistency => "consistency",
        }
    }
}

/// Target deep share (%) by age tier (<25, 25-44, 45-64, 65+)
pub fn target_deep_percent(age: u32) -> f64 {
    match age {
        0..=24 => 20.0,
        25..=44 => 18.0,
        45..=64 => 15.0,
        _ => 12.0,
    }
}

/// Target REM share (%) by age tier
pub fn target_rem_percent(age: u32) -> f64 {
    match age {
        0..=24 => 23.0,
        25..=44 => 22.0,
        45..=64 => 20.0,
        _ => 18.0,
    }
}

/// Blend a population target with the personal average once enough nights exist
pub fn blend_norm(population: f64, personal: f64, nights: u32, config: &EngineConfig) -> f64 {
    let enough = nights as usize >= config.personal_blend_min_nights;
    if enough && personal.is_finite() && personal > 0.0 {
        let w = config.personal_blend_weight;
        (1.0 - w).mul_add(population, w * personal)
    } else {
        population
    }
}

/// Stage share score: full credit inside the ±2.5 point band, linear to zero at 15
pub fn stage_band_score(actual_percent: f64, target_percent: f64) -> f64 {
    let distance = (actual_percent - target_percent).abs();
    if !distance.is_finite() {
        return 0.0;
    }
    if distance <= STAGE_FULL_CREDIT_BAND {
        1.0
    } else if distance >= STAGE_ZERO_CREDIT_DISTANCE {
        0.0
    } else {
        1.0 - (distance - STAGE_FULL_CREDIT_BAND)
            / (STAGE_ZERO_CREDIT_DISTANCE - STAGE_FULL_CREDIT_BAND)
    }
}

/// WASO score: full credit under 15 minutes, none at 60
pub fn waso_score(waso_minutes: f64) -> f64 {
    if !waso_minutes.is_finite() {
        return 0.0;
    }
    if waso_minutes <= WASO_FULL_CREDIT_MINUTES {
        1.0
    } else if waso_minutes >= WASO_ZERO_CREDIT_MINUTES {
        0.0
    } else {
        1.0 - (waso_minutes - WASO_FULL_CREDIT_MINUTES)
            / (WASO_ZERO_CREDIT_MINUTES - WASO_FULL_CREDIT_MINUTES)
    }
}

/// J-curve over total sleep hours
pub fn duration_score(total_sleep_minutes: f64) -> f64 {
    let hours = total_sleep_minutes / 60.0;
    if !hours.is_finite() {
        return 0.2;
    }
    if (7.0..=9.0).contains(&hours) {
        1.0
    } else if (6.0..7.0).contains(&hours) || (hours > 9.0 && hours <= 10.0) {
        0.8
    } else if (5.0..6.0).contains(&hours) || (hours > 10.0 && hours <= 11.0) {
        0.5
    } else {
        0.2
    }
}

/// Efficiency score against the age-norm ideal
pub fn efficiency_score(efficiency: f64, ideal: f64) -> f64 {
    if !efficiency.is_finite() {
        return 0.0;
    }
    if efficiency >= ideal {
        1.0
    } else {
        (1.0 - (ideal - efficiency) / EFFICIENCY_ZERO_CREDIT_SHORTFALL).clamp(0.0, 1.0)
    }
}

/// Regularity from tonight's bedtime vs. the personal median, blended with the
/// spread of past bedtimes. Neutral until `consistency_min_nights` bedtimes exist.
pub fn consistency_score(
    bedtime_minutes: f64,
    baseline: &UserBaseline,
    config: &EngineConfig,
) -> f64 {
    if (baseline.bedtime_nights as usize) < config.consistency_min_nights {
        return NEUTRAL_CONSISTENCY;
    }
    let deviation = bedtime_deviation(bedtime_minutes, baseline.median_bedtime_minutes);
    let spread = baseline.bedtime_variance.max(0.0).sqrt();
    let score = DEVIATION_WEIGHT * gaussian(deviation, BEDTIME_DEVIATION_SIGMA)
        + (1.0 - DEVIATION_WEIGHT) * gaussian(spread, BEDTIME_SPREAD_SIGMA);
    score.clamp(0.0, 1.0)
}

/// Escalating penalty in score points: 10/h below 6h plus 15/h below 5h
pub fn short_sleep_penalty(total_sleep_minutes: f64) -> f64 {
    let hours = total_sleep_minutes / 60.0;
    if !hours.is_finite() {
        return 0.0;
    }
    10.0 * (6.0 - hours).max(0.0) + 15.0 * (5.0 - hours).max(0.0)
}

/// Half a point per hour of chronic debt, capped at 10
pub fn chronic_debt_penalty(debt_minutes: f64) -> f64 {
    if !debt_minutes.is_finite() {
        return 0.0;
    }
    (debt_minutes.max(0.0) / 60.0 * CHRONIC_DEBT_POINTS_PER_HOUR).min(MAX_CHRONIC_DEBT_PENALTY)
}

/// Minutes between two clock times, the short way around midnight
pub fn bedtime_deviation(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(MINUTES_PER_DAY);
    diff.min(MINUTES_PER_DAY - diff)
}

fn gaussian(x: f64, sigma: f64) -> f64 {
    (-(x * x) / (2.0 * sigma * sigma)).exp()
}
