//! Stage distribution prediction
//!
//! When a night has trustworthy per-stage minutes, the distribution is read off
//! directly. Otherwise it is predicted from an age-bucketed baseline adjusted by
//! physiology, sleep debt, chronotype and personal history. Either way the result
//! is clamped to physiological bounds and normalized to exactly 100%.

use crate::physiology::EstimatedPhysiology;
use crate::redistribute::correct_residual;
use crate::types::{
    minutes_from_midnight, Chronotype, ConfidenceTier, DistributionBasis, SleepRecord,
    StageDistribution,
};
use tracing::debug;

/// Measured stage sums must land within this fraction of the duration
const MEASURED_TOLERANCE: f64 = 0.05;

/// Weight of the model when blending with the personal average
const MODEL_BLEND_WEIGHT: f64 = 0.8;

/// Percentages are normalized in tenths of a percent
const TENTHS_TOTAL: i64 = 1000;

/// Physiological bounds in tenths of a percent, ordered deep, rem, light, awake
const BOUNDS_TENTHS: [(i64, i64); 4] = [(50, 350), (100, 350), (300, 600), (20, 250)];

/// Residual correction order: light, awake, rem, deep
const RESIDUAL_PRIORITY: [usize; 4] = [2, 3, 1, 0];

/// Inputs for a single prediction
#[derive(Debug, Clone)]
pub struct PredictionInput<'a> {
    pub record: &'a SleepRecord,
    pub physiology: &'a EstimatedPhysiology,
    /// Net deficit vs. goal over recent nights (minutes)
    pub sleep_debt_minutes: f64,
    pub chronotype: Chronotype,
    /// Recent personal average deep share (%), if known
    pub personal_deep_percent: Option<f64>,
    /// Recent personal average REM share (%), if known
    pub personal_rem_percent: Option<f64>,
}

/// Unnormalized working percentages
#[derive(Debug, Clone, Copy, PartialEq)]
struct Shares {
    deep: f64,
    rem: f64,
    light: f64,
    awake: f64,
}

/// Additive rule engine that records which rules fired
struct Model {
    shares: Shares,
    basis: Vec<DistributionBasis>,
}

impl Model {
    fn apply(&mut self, basis: DistributionBasis, deep: f64, rem: f64, light: f64, awake: f64) {
        self.shares.deep += deep;
        self.shares.rem += rem;
        self.shares.light += light;
        self.shares.awake += awake;
        self.basis.push(basis);
        debug!(rule = ?basis, deep, rem, light, awake, "stage adjustment applied");
    }
}

/// Stage distribution predictor
pub struct StageDistributionPredictor;

impl StageDistributionPredictor {
    /// Measured distribution when valid stage data exists, else a prediction
    pub fn predict(input: &PredictionInput<'_>) -> StageDistribution {
        Self::measured(input.record).unwrap_or_else(|| Self::estimate(input))
    }

    /// Distribution from real stage minutes.
    ///
    /// Requires all four stages and a stage sum within 5% of the duration.
    pub fn measured(record: &SleepRecord) -> Option<StageDistribution> {
        let stages = record.stage_minutes()?;
        let duration = record.duration_minutes;
        let sum = stages.total();
        if !(duration.is_finite() && duration > 0.0 && sum > 0.0) {
            return None;
        }
        if (sum - duration).abs() > duration * MEASURED_TOLERANCE {
            return None;
        }

        let raw = Shares {
            deep: stages.deep / sum * 100.0,
            rem: stages.rem / sum * 100.0,
            light: stages.light / sum * 100.0,
            awake: stages.awake / sum * 100.0,
        };
        Some(finish(
            raw,
            ConfidenceTier::High,
            vec![DistributionBasis::MeasuredStages],
        ))
    }

    /// Predicted distribution from physiology, debt, chronotype and history
    pub fn estimate(input: &PredictionInput<'_>) -> StageDistribution {
        let physiology = input.physiology;
        let mut model = Model {
            shares: age_baseline(physiology.age_years),
            basis: vec![DistributionBasis::AgeBaseline],
        };

        let hrv = physiology.hrv_rmssd;
        if hrv > 55.0 {
            model.apply(DistributionBasis::HrvHigh, 3.0, 0.0, -3.0, 0.0);
        } else if hrv >= 40.0 {
            model.apply(DistributionBasis::HrvGood, 1.5, 0.0, -1.5, 0.0);
        } else if hrv < 25.0 {
            model.apply(DistributionBasis::HrvLow, -3.0, 0.0, 3.0, 0.0);
        }

        let rhr = physiology.resting_hr;
        if rhr < 45.0 {
            model.apply(DistributionBasis::RestingHrAthletic, 2.5, 0.0, 0.0, -2.5);
        } else if rhr < 50.0 {
            model.apply(DistributionBasis::RestingHrLow, 1.5, 0.0, 0.0, -1.5);
        } else if rhr > 78.0 {
            model.apply(DistributionBasis::RestingHrVeryHigh, -3.0, 0.0, 0.0, 3.0);
        } else if rhr > 68.0 {
            model.apply(DistributionBasis::RestingHrElevated, -1.5, 0.0, 0.0, 1.5);
        }

        let vo2max = physiology.vo2max;
        if vo2max > 52.0 {
            model.apply(DistributionBasis::Vo2maxHigh, 0.0, 2.0, -2.0, 0.0);
        } else if vo2max < 35.0 {
            model.apply(DistributionBasis::Vo2maxLow, 0.0, -2.0, 2.0, 0.0);
        }

        let respiratory_rate = physiology.respiratory_rate;
        if (12.0..=14.0).contains(&respiratory_rate) {
            model.apply(DistributionBasis::RespiratoryRateIdeal, 1.0, -1.0, 0.0, 0.0);
        } else if respiratory_rate > 17.0 {
            model.apply(DistributionBasis::RespiratoryRateHigh, -2.0, 2.0, 0.0, 0.0);
        }

        let debt = input.sleep_debt_minutes;
        if debt > 240.0 {
            model.apply(DistributionBasis::SleepDebtSevere, 4.0, 2.0, -6.0, 0.0);
        } else if debt >= 120.0 {
            model.apply(DistributionBasis::SleepDebtModerate, 2.5, 1.5, -4.0, 0.0);
        } else if debt >= 60.0 {
            model.apply(DistributionBasis::SleepDebtMild, 1.0, 1.0, -2.0, 0.0);
        }

        let early_bedtime = input
            .record
            .start_time
            .as_ref()
            .map(minutes_from_midnight)
            .is_some_and(|m| (18.0 * 60.0..23.0 * 60.0).contains(&m));
        let late_wake = input
            .record
            .end_time
            .as_ref()
            .map(minutes_from_midnight)
            .is_some_and(|m| m > 8.0 * 60.0 && m < 14.0 * 60.0);
        match input.chronotype {
            Chronotype::Evening if early_bedtime => {
                model.apply(
                    DistributionBasis::EveningChronotypeEarlyBedtime,
                    0.0,
                    -2.0,
                    2.0,
                    0.0,
                );
            }
            Chronotype::Morning if late_wake => {
                model.apply(DistributionBasis::MorningChronotypeLateWake, -2.0, 0.0, 2.0, 0.0);
            }
            _ => {}
        }

        let personal_deep = input.personal_deep_percent.filter(|p| p.is_finite() && *p > 0.0);
        let personal_rem = input.personal_rem_percent.filter(|p| p.is_finite() && *p > 0.0);
        let calibrated = personal_deep.is_some() || personal_rem.is_some();
        if calibrated {
            let current = model.shares;
            let deep = personal_deep
                .map(|p| MODEL_BLEND_WEIGHT * current.deep + (1.0 - MODEL_BLEND_WEIGHT) * p)
                .unwrap_or(current.deep);
            let rem = personal_rem
                .map(|p| MODEL_BLEND_WEIGHT * current.rem + (1.0 - MODEL_BLEND_WEIGHT) * p)
                .unwrap_or(current.rem);
            let delta_deep = deep - current.deep;
            let delta_rem = rem - current.rem;
            model.apply(
                DistributionBasis::PersonalCalibration,
                delta_deep,
                delta_rem,
                -(delta_deep + delta_rem),
                0.0,
            );
        }

        let confidence = if calibrated {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        };
        finish(model.shares, confidence, model.basis)
    }
}

/// Age-bucketed starting point (<25, 25-44, 45-64, 65+)
fn age_baseline(age: u32) -> Shares {
    let (deep, rem, light, awake) = match age {
        0..=24 => (22.0, 23.0, 50.0, 5.0),
        25..=44 => (18.0, 22.0, 53.0, 7.0),
        45..=64 => (14.0, 20.0, 57.0, 9.0),
        _ => (10.0, 18.0, 58.0, 14.0),
    };
    Shares {
        deep,
        rem,
        light,
        awake,
    }
}

fn finish(
    raw: Shares,
    confidence: ConfidenceTier,
    basis: Vec<DistributionBasis>,
) -> StageDistribution {
    let [deep, rem, light, awake] = normalize_percentages([raw.deep, raw.rem, raw.light, raw.awake]);
    StageDistribution {
        deep_percent: deep,
        rem_percent: rem,
        light_percent: light,
        awake_percent: awake,
        confidence,
        basis,
    }
}

/// Clamp to physiological bounds, rescale to 100, then settle the rounding
/// residual in light → awake → rem → deep order without crossing a bound.
///
/// Input and output are ordered deep, rem, light, awake. Output has one decimal.
pub fn normalize_percentages(raw: [f64; 4]) -> [f64; 4] {
    let clamped: Vec<i64> = raw
        .iter()
        .zip(BOUNDS_TENTHS)
        .map(|(value, (min, max))| {
            if value.is_finite() {
                ((value * 10.0).round() as i64).clamp(min, max)
            } else {
                min
            }
        })
        .collect();

    let sum: i64 = clamped.iter().sum();
    let rescaled: Vec<i64> = clamped
        .iter()
        .zip(BOUNDS_TENTHS)
        .map(|(value, (min, max))| {
            let scaled = (*value as f64 * TENTHS_TOTAL as f64 / sum as f64).round() as i64;
            scaled.clamp(min, max)
        })
        .collect();

    let residual = TENTHS_TOTAL - rescaled.iter().sum::<i64>();
    let (corrected, _) = correct_residual(&rescaled, &BOUNDS_TENTHS, &RESIDUAL_PRIORITY, residual);

    let mut out = [0.0; 4];
    for (slot, tenths) in out.iter_mut().zip(corrected) {
        *slot = tenths as f64 / 10.0;
    }
    out
}
