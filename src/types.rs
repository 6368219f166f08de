//! Core types for the Synheart Sleep engine
//!
//! This module defines the data that flows into and out of every component:
//! nightly sleep records and user profiles on the way in, phase events, cycle
//! breakdowns and stage distributions on the way out.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize};

/// Where a night's data came from, ordered roughly by trustworthiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Apple Health / Health Connect session reads
    #[serde(alias = "apple_health", alias = "health_connect", alias = "healthkit")]
    HealthPlatform,
    /// Direct wearable vendor export
    Wearable,
    /// Phone accelerometer / microphone inference
    PhoneSensor,
    /// Derived by the app from partial data
    Estimated,
    /// Typed in by the user
    #[default]
    Manual,
    #[serde(other)]
    Other,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::HealthPlatform => "health_platform",
            DataSource::Wearable => "wearable",
            DataSource::PhoneSensor => "phone_sensor",
            DataSource::Estimated => "estimated",
            DataSource::Manual => "manual",
            DataSource::Other => "other",
        }
    }

    /// Reliability factor (0-1) used to dampen scores toward neutral
    pub fn reliability(&self) -> f64 {
        match self {
            DataSource::HealthPlatform => 1.0,
            DataSource::Wearable => 0.95,
            DataSource::PhoneSensor => 0.85,
            DataSource::Estimated => 0.75,
            DataSource::Other => 0.7,
            DataSource::Manual => 0.6,
        }
    }
}

/// Qualitative reliability label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    #[default]
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    #[serde(alias = "lightly_active")]
    Light,
    #[serde(alias = "moderately_active")]
    Moderate,
    Active,
    VeryActive,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLevel::Sedentary => "sedentary",
            ActivityLevel::Light => "light",
            ActivityLevel::Moderate => "moderate",
            ActivityLevel::Active => "active",
            ActivityLevel::VeryActive => "very_active",
        }
    }
}

/// Circadian preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chronotype {
    Morning,
    #[default]
    Intermediate,
    Evening,
}

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
        }
    }
}

/// Optional screen-time context attached to a night
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenTimeSummary {
    /// Total screen time for the day (minutes)
    #[serde(default)]
    pub total_minutes: Option<f64>,
    /// Screen time in the hour before bed (minutes)
    #[serde(default)]
    pub minutes_before_bed: Option<f64>,
}

/// Per-stage minutes as reported by a data source
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMinutes {
    pub deep: f64,
    pub rem: f64,
    pub light: f64,
    pub awake: f64,
}

impl StageMinutes {
    pub fn total(&self) -> f64 {
        self.deep + self.rem + self.light + self.awake
    }
}

/// Whole-minute stage totals for a cycle or timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    pub awake: u32,
    pub light: u32,
    pub deep: u32,
    pub rem: u32,
}

impl StageTally {
    pub fn add(&mut self, stage: SleepStage, minutes: u32) {
        match stage {
            SleepStage::Awake => self.awake += minutes,
            SleepStage::Light => self.light += minutes,
            SleepStage::Deep => self.deep += minutes,
            SleepStage::Rem => self.rem += minutes,
        }
    }

    pub fn get(&self, stage: SleepStage) -> u32 {
        match stage {
            SleepStage::Awake => self.awake,
            SleepStage::Light => self.light,
            SleepStage::Deep => self.deep,
            SleepStage::Rem => self.rem,
        }
    }

    pub fn total(&self) -> u32 {
        self.awake
            .saturating_add(self.light)
            .saturating_add(self.deep)
            .saturating_add(self.rem)
    }

    /// Stage with the most minutes; ties resolve toward the deeper stage
    pub fn dominant(&self) -> SleepStage {
        [
            SleepStage::Deep,
            SleepStage::Rem,
            SleepStage::Light,
            SleepStage::Awake,
        ]
        .into_iter()
        .fold(SleepStage::Deep, |best, stage| {
            if self.get(stage) > self.get(best) {
                stage
            } else {
                best
            }
        })
    }
}

/// One night of sleep. Never mutated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    /// Total session duration in minutes (stage minutes including awake)
    #[serde(default, deserialize_with = "deserialize_lenient_minutes")]
    pub duration_minutes: f64,
    /// Sleep session start (local offset preserved)
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_time: Option<DateTime<FixedOffset>>,
    /// Sleep session end
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub deep_minutes: Option<f64>,
    #[serde(default)]
    pub rem_minutes: Option<f64>,
    #[serde(default)]
    pub light_minutes: Option<f64>,
    #[serde(default)]
    pub awake_minutes: Option<f64>,
    #[serde(default)]
    pub source: DataSource,
    #[serde(default)]
    pub confidence: ConfidenceTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_time: Option<ScreenTimeSummary>,
    /// Measured overnight HRV (rMSSD, ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_hrv_ms: Option<f64>,
    /// Measured resting heart rate (bpm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_hr_bpm: Option<f64>,
    /// Measured respiratory rate (breaths/min)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<f64>,
}

impl SleepRecord {
    /// All four stage values, when every one of them is present and finite
    pub fn stage_minutes(&self) -> Option<StageMinutes> {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite() && *x >= 0.0);
        Some(StageMinutes {
            deep: finite(self.deep_minutes)?,
            rem: finite(self.rem_minutes)?,
            light: finite(self.light_minutes)?,
            awake: finite(self.awake_minutes)?,
        })
    }

    /// Number of stage fields that are missing
    pub fn missing_stage_fields(&self) -> usize {
        [
            self.deep_minutes,
            self.rem_minutes,
            self.light_minutes,
            self.awake_minutes,
        ]
        .iter()
        .filter(|v| !matches!(v, Some(x) if x.is_finite() && *x >= 0.0))
        .count()
    }

    pub fn has_timing(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_some()
    }

    /// Minutes between start and end, when both exist and are ordered
    pub fn time_span_minutes(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => {
                Some((end - start).num_seconds() as f64 / 60.0)
            }
            _ => None,
        }
    }

    /// Start time, falling back to end minus duration
    pub fn anchor_start(&self) -> Option<DateTime<FixedOffset>> {
        self.start_time.or_else(|| {
            let end = self.end_time?;
            if self.duration_minutes > 0.0 && self.duration_minutes.is_finite() {
                Some(end - chrono::Duration::minutes(self.duration_minutes.round() as i64))
            } else {
                None
            }
        })
    }

    /// Best known timestamp for ordering nights, newest last
    pub fn sort_key(&self) -> Option<DateTime<FixedOffset>> {
        self.end_time.or(self.start_time)
    }
}

/// User profile. Never mutated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub activity_level: Option<ActivityLevel>,
    #[serde(default)]
    pub chronotype: Option<Chronotype>,
    #[serde(default)]
    pub sleep_goal_minutes: Option<f64>,
}

impl UserProfile {
    /// Age in whole years as of `on`, preferring date of birth over the stored age
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        if let Some(dob) = self.date_of_birth {
            if dob <= on {
                let mut years = on.year() - dob.year();
                if (on.month(), on.day()) < (dob.month(), dob.day()) {
                    years -= 1;
                }
                return u32::try_from(years).ok();
            }
        }
        self.age
    }

    /// Sleep goal, falling back to `default_minutes` when unset or invalid
    pub fn goal_minutes_or(&self, default_minutes: f64) -> f64 {
        self.sleep_goal_minutes
            .filter(|g| g.is_finite() && *g > 0.0)
            .unwrap_or(default_minutes)
    }
}

/// A single contiguous phase of the synthesized timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub stage: SleepStage,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Whole minutes, always > 0
    pub duration_minutes: u32,
    /// 0 = sleep-onset latency, 1..N = sleep cycles
    pub cycle: u32,
}

/// Aggregate view of one sleep cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleBreakdown {
    pub cycle: u32,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_minutes: u32,
    pub dominant_stage: SleepStage,
    pub minutes: StageTally,
}

/// Why a stage distribution looks the way it does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionBasis {
    MeasuredStages,
    AgeBaseline,
    HrvHigh,
    HrvGood,
    HrvLow,
    RestingHrAthletic,
    RestingHrLow,
    RestingHrVeryHigh,
    RestingHrElevated,
    Vo2maxHigh,
    Vo2maxLow,
    RespiratoryRateIdeal,
    RespiratoryRateHigh,
    SleepDebtSevere,
    SleepDebtModerate,
    SleepDebtMild,
    EveningChronotypeEarlyBedtime,
    MorningChronotypeLateWake,
    PersonalCalibration,
}

/// Stage percentages that always sum to 100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDistribution {
    pub deep_percent: f64,
    pub rem_percent: f64,
    pub light_percent: f64,
    pub awake_percent: f64,
    pub confidence: ConfidenceTier,
    pub basis: Vec<DistributionBasis>,
}

impl StageDistribution {
    pub fn total(&self) -> f64 {
        self.deep_percent + self.rem_percent + self.light_percent + self.awake_percent
    }
}

/// Parse a timestamp in any of the accepted formats.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` or `YYYY-MM-DD HH:MM:SS`
/// (read as UTC), and bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }

    let utc = FixedOffset::east_opt(0)?;
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return utc.from_local_datetime(&naive).single();
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| utc.from_local_datetime(&naive).single())
}

/// Lenient deserializer: malformed or non-string values become `None`
pub(crate) fn deserialize_lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_timestamp(&s),
        _ => None,
    })
}

/// Lenient deserializer: null, strings and other non-numbers become `0.0`
pub(crate) fn deserialize_lenient_minutes<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_f64).unwrap_or(0.0))
}

/// Lenient date deserializer. Accepts `YYYY-MM-DD` or any timestamp format
/// [`parse_timestamp`] understands; anything else becomes `None`.
pub(crate) fn deserialize_lenient_date<'de, D>(
    deserializer: D,
) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .or_else(|| parse_timestamp(&s).map(|ts| ts.date_naive())),
        _ => None,
    })
}

/// Minutes past local midnight for a timestamp
pub fn minutes_from_midnight(ts: &DateTime<FixedOffset>) -> f64 {
    f64::from(ts.hour() * 60 + ts.minute()) + f64::from(ts.second()) / 60.0
}
