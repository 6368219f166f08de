//! Physiology estimation
//!
//! Deterministic population formulas mapping age, sex and activity level to the
//! cardio-respiratory markers the stage predictor and timeline synthesizer need
//! when no measured values exist.
//!
//! - VO2max: activity × sex anchor table, de-rated 0.25%/yr above 25
//! - HRmax: Gellish et al. (2007), `207 − 0.7 × age`
//! - Resting HR: Uth–Sørensen inversion (`15.3 × HRmax / VO2max`) blended with an
//!   activity/age anchor
//! - HRV rMSSD: linear in resting HR with sex and age offsets
//! - Respiratory rate: linear in VO2max

use crate::types::{ActivityLevel, Sex, SleepRecord, UserProfile};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Age assumed when the profile carries none
pub const DEFAULT_AGE: u32 = 35;

const VO2MAX_RANGE: (f64, f64) = (10.0, 80.0);
const RESTING_HR_RANGE: (f64, f64) = (38.0, 90.0);
const HRV_RANGE: (f64, f64) = (12.0, 80.0);
const RESPIRATORY_RANGE: (f64, f64) = (12.0, 17.0);

/// Weight of the VO2max-derived resting HR in the blend (anchor gets the rest)
const RESTING_HR_VO2_WEIGHT: f64 = 0.12;

/// Estimated (or measured, where available) physiology for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedPhysiology {
    /// ml/kg/min
    pub vo2max: f64,
    /// bpm
    pub resting_hr: f64,
    /// ms
    pub hrv_rmssd: f64,
    /// bpm
    pub hr_max: f64,
    /// breaths/min
    pub respiratory_rate: f64,
    /// Age the estimate was computed for
    pub age_years: u32,
    /// Which inputs were supplied and which were assumed
    pub basis_notes: Vec<String>,
}

/// Population physiology estimator
pub struct PhysiologyEstimator;

impl PhysiologyEstimator {
    /// Estimate physiology from a profile as of `as_of`.
    ///
    /// Total: missing fields fall back to age 35, moderate activity and the mean of
    /// the male and female anchors, each recorded in `basis_notes`.
    pub fn estimate(profile: &UserProfile, as_of: NaiveDate) -> EstimatedPhysiology {
        let mut notes = Vec::new();

        let dob_age = profile
            .date_of_birth
            .filter(|dob| *dob <= as_of)
            .and_then(|_| profile.age_on(as_of));
        let age = if let Some(age) = dob_age {
            notes.push(format!("age {age} derived from date of birth"));
            age
        } else if let Some(age) = profile.age {
            notes.push(format!("age {age} from profile"));
            age
        } else {
            notes.push(format!("age {DEFAULT_AGE} assumed (not provided)"));
            DEFAULT_AGE
        };
        let age_f = f64::from(age);

        let activity = match profile.activity_level {
            Some(level) => {
                notes.push(format!("activity level '{}' from profile", level.as_str()));
                level
            }
            None => {
                notes.push("activity level 'moderate' assumed (not provided)".to_string());
                ActivityLevel::Moderate
            }
        };

        let (male_vo2, female_vo2) = base_vo2max(activity);
        let base_vo2 = match profile.sex {
            Some(Sex::Male) => {
                notes.push("male anchors used".to_string());
                male_vo2
            }
            Some(Sex::Female) => {
                notes.push("female anchors used".to_string());
                female_vo2
            }
            _ => {
                notes.push("sex not provided; mean of male and female anchors used".to_string());
                (male_vo2 + female_vo2) / 2.0
            }
        };

        let age_derating = if age_f > 25.0 {
            1.0 - 0.0025 * (age_f - 25.0)
        } else {
            1.0
        };
        let vo2max = clamp_finite(base_vo2 * age_derating, VO2MAX_RANGE);

        let hr_max = 207.0 - 0.7 * age_f;

        let vo2_resting_hr = 15.3 * hr_max / vo2max;
        let anchor = resting_hr_anchor(activity, age);
        let resting_hr = clamp_finite(
            RESTING_HR_VO2_WEIGHT * vo2_resting_hr + (1.0 - RESTING_HR_VO2_WEIGHT) * anchor,
            RESTING_HR_RANGE,
        );

        let mut hrv = 20.0 + (70.0 - resting_hr) * 0.9;
        if profile.sex == Some(Sex::Female) {
            hrv += 6.0;
        }
        if age_f > 30.0 {
            hrv -= 0.15 * (age_f - 30.0);
        }
        let hrv_rmssd = clamp_finite(hrv, HRV_RANGE);

        let respiratory_rate = clamp_finite(18.0 - 0.08 * vo2max, RESPIRATORY_RANGE);

        EstimatedPhysiology {
            vo2max: round1(vo2max),
            resting_hr: round1(resting_hr),
            hrv_rmssd: round1(hrv_rmssd),
            hr_max: round1(clamp_finite(hr_max, (100.0, 220.0))),
            respiratory_rate: round1(respiratory_rate),
            age_years: age,
            basis_notes: notes,
        }
    }
}

impl EstimatedPhysiology {
    /// Replace estimates with plausible measured values from a night's record
    pub fn with_measurements(mut self, record: &SleepRecord) -> Self {
        if let Some(rhr) = plausible(record.resting_hr_bpm, 30.0, 120.0) {
            self.resting_hr = round1(rhr);
            self.basis_notes.push("resting HR measured".to_string());
        }
        if let Some(hrv) = plausible(record.avg_hrv_ms, 5.0, 250.0) {
            self.hrv_rmssd = round1(hrv);
            self.basis_notes.push("HRV measured".to_string());
        }
        if let Some(rr) = plausible(record.respiratory_rate, 6.0, 30.0) {
            self.respiratory_rate = round1(rr);
            self.basis_notes.push("respiratory rate measured".to_string());
        }
        self
    }
}

/// (male, female) VO2max anchors in ml/kg/min
fn base_vo2max(activity: ActivityLevel) -> (f64, f64) {
    match activity {
        ActivityLevel::Sedentary => (35.0, 30.0),
        ActivityLevel::Light => (40.0, 34.0),
        ActivityLevel::Moderate => (45.0, 38.0),
        ActivityLevel::Active => (50.0, 43.0),
        ActivityLevel::VeryActive => (56.0, 48.0),
    }
}

fn resting_hr_anchor(activity: ActivityLevel, age: u32) -> f64 {
    let activity_anchor = match activity {
        ActivityLevel::Sedentary => 72.0,
        ActivityLevel::Light => 68.0,
        ActivityLevel::Moderate => 64.0,
        ActivityLevel::Active => 60.0,
        ActivityLevel::VeryActive => 55.0,
    };
    let age_offset = match age {
        0..=29 => -1.0,
        30..=49 => 0.0,
        50..=64 => 1.0,
        _ => 2.0,
    };
    activity_anchor + age_offset
}

fn plausible(value: Option<f64>, min: f64, max: f64) -> Option<f64> {
    value.filter(|v| v.is_finite() && (min..=max).contains(v))
}

fn clamp_finite(value: f64, (min, max): (f64, f64)) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
