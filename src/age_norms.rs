//! Population sleep norms by age bucket
//!
//! Static lookup tables derived from NSF duration recommendations and
//! polysomnography age curves (Ohayon et al. 2004). No side effects, no errors.

use serde::{Deserialize, Serialize};

/// Age bucket used for population norms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "under18")]
    Under18,
    #[serde(rename = "18-25")]
    Age18To25,
    #[serde(rename = "26-35")]
    Age26To35,
    #[serde(rename = "36-50")]
    Age36To50,
    #[serde(rename = "51-65")]
    Age51To65,
    #[serde(rename = "65plus")]
    Age65Plus,
}

impl AgeBucket {
    /// Bucket for an age; `26-35` when the age is unknown
    pub fn for_age(age: Option<u32>) -> Self {
        match age {
            None => AgeBucket::Age26To35,
            Some(a) if a < 18 => AgeBucket::Under18,
            Some(a) if a <= 25 => AgeBucket::Age18To25,
            Some(a) if a <= 35 => AgeBucket::Age26To35,
            Some(a) if a <= 50 => AgeBucket::Age36To50,
            Some(a) if a <= 65 => AgeBucket::Age51To65,
            Some(_) => AgeBucket::Age65Plus,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBucket::Under18 => "under18",
            AgeBucket::Age18To25 => "18-25",
            AgeBucket::Age26To35 => "26-35",
            AgeBucket::Age36To50 => "36-50",
            AgeBucket::Age51To65 => "51-65",
            AgeBucket::Age65Plus => "65plus",
        }
    }
}

/// Population sleep targets for one age bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeNorm {
    pub bucket: AgeBucket,
    /// Ideal total sleep (minutes)
    pub ideal_duration_minutes: f64,
    /// Ideal deep sleep share (%)
    pub ideal_deep_percent: f64,
    /// Ideal REM share (%)
    pub ideal_rem_percent: f64,
    /// Ideal sleep efficiency (0-1)
    pub efficiency_ideal: f64,
    /// Typical wake after sleep onset (minutes)
    pub waso_expected_minutes: f64,
    /// Upper bound of acceptable WASO (minutes)
    pub waso_acceptable_minutes: f64,
    /// Shortest healthy sleep (minutes)
    pub min_healthy_duration_minutes: f64,
}

const NORMS: [AgeNorm; 6] = [
    AgeNorm {
        bucket: AgeBucket::Under18,
        ideal_duration_minutes: 540.0,
        ideal_deep_percent: 22.0,
        ideal_rem_percent: 23.0,
        efficiency_ideal: 0.90,
        waso_expected_minutes: 10.0,
        waso_acceptable_minutes: 20.0,
        min_healthy_duration_minutes: 480.0,
    },
    AgeNorm {
        bucket: AgeBucket::Age18To25,
        ideal_duration_minutes: 480.0,
        ideal_deep_percent: 20.0,
        ideal_rem_percent: 23.0,
        efficiency_ideal: 0.90,
        waso_expected_minutes: 15.0,
        waso_acceptable_minutes: 30.0,
        min_healthy_duration_minutes: 420.0,
    },
    AgeNorm {
        bucket: AgeBucket::Age26To35,
        ideal_duration_minutes: 480.0,
        ideal_deep_percent: 18.0,
        ideal_rem_percent: 22.0,
        efficiency_ideal: 0.88,
        waso_expected_minutes: 20.0,
        waso_acceptable_minutes: 35.0,
        min_healthy_duration_minutes: 420.0,
    },
    AgeNorm {
        bucket: AgeBucket::Age36To50,
        ideal_duration_minutes: 450.0,
        ideal_deep_percent: 15.0,
        ideal_rem_percent: 21.0,
        efficiency_ideal: 0.86,
        waso_expected_minutes: 25.0,
        waso_acceptable_minutes: 40.0,
        min_healthy_duration_minutes: 420.0,
    },
    AgeNorm {
        bucket: AgeBucket::Age51To65,
        ideal_duration_minutes: 450.0,
        ideal_deep_percent: 13.0,
        ideal_rem_percent: 20.0,
        efficiency_ideal: 0.84,
        waso_expected_minutes: 30.0,
        waso_acceptable_minutes: 50.0,
        min_healthy_duration_minutes: 390.0,
    },
    AgeNorm {
        bucket: AgeBucket::Age65Plus,
        ideal_duration_minutes: 450.0,
        ideal_deep_percent: 10.0,
        ideal_rem_percent: 18.0,
        efficiency_ideal: 0.80,
        waso_expected_minutes: 40.0,
        waso_acceptable_minutes: 60.0,
        min_healthy_duration_minutes: 390.0,
    },
];

/// Static age-norm lookup
pub struct AgeNormProvider;

impl AgeNormProvider {
    /// Norms for an age, using the `26-35` bucket when age is unknown
    pub fn for_age(age: Option<u32>) -> AgeNorm {
        Self::for_bucket(AgeBucket::for_age(age))
    }

    pub fn for_bucket(bucket: AgeBucket) -> AgeNorm {
        NORMS
            .iter()
            .copied()
            .find(|norm| norm.bucket == bucket)
            .unwrap_or(NORMS[2])
    }
}
