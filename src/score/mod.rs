//! Sleep quality scoring
//!
//! Combines tonight's record, a fresh baseline from history, the age norm and
//! the profile into a 0-100 score with an explainable breakdown:
//!
//! 1. Component sub-scores (duration, deep, REM, efficiency, WASO, consistency)
//! 2. Dynamic weights: a missing component scores a neutral 0.5 at half weight
//! 3. Short-sleep and chronic-debt penalties
//! 4. Reliability dampening toward 50, then a completeness multiplier

pub mod components;
pub mod flags;

pub use components::ScoreComponent;
pub use flags::ScoreFlag;

use crate::age_norms::{AgeNorm, AgeNormProvider};
use crate::baseline::{sleep_debt_minutes, BaselineCalculator, UserBaseline};
use crate::config::EngineConfig;
use crate::features::FeatureDeriver;
use crate::physiology::DEFAULT_AGE;
use crate::types::{ConfidenceTier, SleepRecord, UserProfile};
use chrono::{DateTime, FixedOffset};
use components::*;
use flags::{completeness_flags, compute_flags, FlagContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Score for a component with no data
const NEUTRAL_MISSING_SCORE: f64 = 0.5;
/// Score dampening pulls toward this value
const NEUTRAL_SCORE: f64 = 50.0;
const MISSING_STAGE_FIELD_COST: f64 = 0.05;
const MISSING_TIMING_COST: f64 = 0.02;

/// Component weights; always sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub duration: f64,
    pub deep: f64,
    pub rem: f64,
    pub efficiency: f64,
    pub waso: f64,
    pub consistency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            duration: 0.10,
            deep: 0.20,
            rem: 0.20,
            efficiency: 0.25,
            waso: 0.15,
            consistency: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn get(&self, component: ScoreComponent) -> f64 {
        match component {
            ScoreComponent::Duration => self.duration,
            ScoreComponent::Deep => self.deep,
            ScoreComponent::Rem => self.rem,
            ScoreComponent::Efficiency => self.efficiency,
            ScoreComponent::Waso => self.waso,
            ScoreComponent::Consistency => self.consistency,
        }
    }

    fn set(&mut self, component: ScoreComponent, weight: f64) {
        match component {
            ScoreComponent::Duration => self.duration = weight,
            ScoreComponent::Deep => self.deep = weight,
            ScoreComponent::Rem => self.rem = weight,
            ScoreComponent::Efficiency => self.efficiency = weight,
            ScoreComponent::Waso => self.waso = weight,
            ScoreComponent::Consistency => self.consistency = weight,
        }
    }

    pub fn sum(&self) -> f64 {
        ScoreComponent::ALL.iter().map(|c| self.get(*c)).sum()
    }

    /// Halve the weight of missing components, hand the freed weight to the
    /// available ones in proportion to their base weight, then renormalize.
    pub fn dynamic(missing: &[ScoreComponent]) -> Self {
        let base = Self::default();
        let mut weights = base;

        let freed: f64 = missing.iter().map(|c| base.get(*c) / 2.0).sum();
        let available_base: f64 = ScoreComponent::ALL
            .iter()
            .filter(|c| !missing.contains(*c))
            .map(|c| base.get(*c))
            .sum();

        for component in ScoreComponent::ALL {
            let weight = if missing.contains(&component) {
                base.get(component) / 2.0
            } else if available_base > 0.0 {
                base.get(component) + freed * base.get(component) / available_base
            } else {
                base.get(component)
            };
            weights.set(component, weight);
        }

        let total = weights.sum();
        for component in ScoreComponent::ALL {
            weights.set(component, weights.get(component) / total);
        }
        weights
    }
}

/// One scored component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub component: ScoreComponent,
    /// Measured value in the component's unit; `None` when missing
    pub raw_value: Option<f64>,
    /// Target the value was scored against (population or blended)
    pub norm: f64,
    /// Sub-score (0-1)
    pub normalized: f64,
    pub weight: f64,
    /// Percentage points this component adds to the raw score
    pub contribution: f64,
}

/// Multipliers and penalties applied after the weighted sum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentFactors {
    pub source_reliability: f64,
    pub completeness: f64,
    pub short_sleep_penalty: f64,
    pub chronic_debt_penalty: f64,
    /// Net deficit over the chronic window (minutes)
    pub chronic_debt_minutes: f64,
}

/// A scored night with everything needed to explain the number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: u8,
    pub confidence: ConfidenceTier,
    pub components: Vec<ComponentResult>,
    pub weights: ScoreWeights,
    pub adjustments: AdjustmentFactors,
    pub baseline: UserBaseline,
    pub age_norm: AgeNorm,
    pub flags: BTreeSet<ScoreFlag>,
    pub calculated_at: DateTime<FixedOffset>,
}

impl ScoreBreakdown {
    pub fn component(&self, component: ScoreComponent) -> Option<&ComponentResult> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// Sleep score calculator
pub struct ScoreCalculator;

impl ScoreCalculator {
    /// Score `record` against `history`.
    ///
    /// `now` stamps the breakdown; nothing else reads the clock. A record with a
    /// non-positive duration yields the zero result.
    pub fn calculate(
        record: &SleepRecord,
        history: &[SleepRecord],
        profile: &UserProfile,
        now: DateTime<FixedOffset>,
        config: &EngineConfig,
    ) -> ScoreBreakdown {
        let age = profile.age_on(now.date_naive());
        let age_norm = AgeNormProvider::for_age(age);
        let goal = profile.goal_minutes_or(config.default_sleep_goal_minutes);
        let baseline = BaselineCalculator::calculate(history, goal);

        let Some(features) = FeatureDeriver::derive(record) else {
            return Self::zero_result(record, baseline, age_norm, now);
        };

        let tier_age = age.unwrap_or(DEFAULT_AGE);
        let deep_target = blend_norm(
            target_deep_percent(tier_age),
            baseline.avg_deep_percent,
            baseline.nights_analysed,
            config,
        );
        let rem_target = blend_norm(
            target_rem_percent(tier_age),
            baseline.avg_rem_percent,
            baseline.nights_analysed,
            config,
        );

        let efficiency = features.scoring_efficiency();
        let scored: [(ScoreComponent, Option<f64>, f64, Option<f64>); 6] = [
            (
                ScoreComponent::Duration,
                Some(features.total_sleep_minutes),
                goal,
                Some(duration_score(features.total_sleep_minutes)),
            ),
            (
                ScoreComponent::Deep,
                features.deep_percent,
                deep_target,
                features
                    .deep_percent
                    .map(|pct| stage_band_score(pct, deep_target)),
            ),
            (
                ScoreComponent::Rem,
                features.rem_percent,
                rem_target,
                features
                    .rem_percent
                    .map(|pct| stage_band_score(pct, rem_target)),
            ),
            (
                ScoreComponent::Efficiency,
                Some(efficiency),
                age_norm.efficiency_ideal,
                Some(efficiency_score(efficiency, age_norm.efficiency_ideal)),
            ),
            (
                ScoreComponent::Waso,
                features.waso_minutes,
                WASO_FULL_CREDIT_MINUTES,
                features.waso_minutes.map(waso_score),
            ),
            (
                ScoreComponent::Consistency,
                features.bedtime_minutes,
                baseline.median_bedtime_minutes,
                features
                    .bedtime_minutes
                    .map(|bedtime| consistency_score(bedtime, &baseline, config)),
            ),
        ];

        let missing: Vec<ScoreComponent> = scored
            .iter()
            .filter(|(_, _, _, score)| score.is_none())
            .map(|(component, _, _, _)| *component)
            .collect();
        let weights = ScoreWeights::dynamic(&missing);

        let components: Vec<ComponentResult> = scored
            .into_iter()
            .map(|(component, raw_value, norm, score)| {
                let normalized = score.unwrap_or(NEUTRAL_MISSING_SCORE).clamp(0.0, 1.0);
                let weight = weights.get(component);
                ComponentResult {
                    component,
                    raw_value,
                    norm,
                    normalized,
                    weight,
                    contribution: normalized * weight * 100.0,
                }
            })
            .collect();

        let raw_score: f64 = components.iter().map(|c| c.contribution).sum();

        let short_penalty = short_sleep_penalty(features.total_sleep_minutes);
        let chronic_debt = sleep_debt_minutes(history, goal, config.chronic_debt_window_nights);
        let debt_penalty = chronic_debt_penalty(chronic_debt);
        let penalized = raw_score - short_penalty - debt_penalty;

        let reliability = record.source.reliability();
        let dampened = NEUTRAL_SCORE + (penalized - NEUTRAL_SCORE) * reliability;

        let completeness = completeness_multiplier(record);
        let final_score = (dampened * completeness).round().clamp(0.0, 100.0) as u8;

        let flags = compute_flags(&FlagContext {
            record,
            features: &features,
            baseline: &baseline,
            age_norm: &age_norm,
            goal_minutes: goal,
            deep_target,
            rem_target,
            config,
        });

        ScoreBreakdown {
            score: final_score,
            confidence: output_confidence(completeness, reliability, record.confidence),
            components,
            weights,
            adjustments: AdjustmentFactors {
                source_reliability: reliability,
                completeness,
                short_sleep_penalty: short_penalty,
                chronic_debt_penalty: debt_penalty,
                chronic_debt_minutes: chronic_debt,
            },
            baseline,
            age_norm,
            flags,
            calculated_at: now,
        }
    }

    /// Fixed breakdown for a night with no usable duration
    fn zero_result(
        record: &SleepRecord,
        baseline: UserBaseline,
        age_norm: AgeNorm,
        now: DateTime<FixedOffset>,
    ) -> ScoreBreakdown {
        let weights = ScoreWeights::default();
        let components = ScoreComponent::ALL
            .iter()
            .map(|component| ComponentResult {
                component: *component,
                raw_value: None,
                norm: 0.0,
                normalized: 0.0,
                weight: weights.get(*component),
                contribution: 0.0,
            })
            .collect();

        ScoreBreakdown {
            score: 0,
            confidence: ConfidenceTier::Low,
            components,
            weights,
            adjustments: AdjustmentFactors {
                source_reliability: record.source.reliability(),
                completeness: 0.0,
                short_sleep_penalty: 0.0,
                chronic_debt_penalty: 0.0,
                chronic_debt_minutes: 0.0,
            },
            baseline,
            age_norm,
            flags: completeness_flags(record),
            calculated_at: now,
        }
    }
}

/// 1 − 0.05 per missing stage field − 0.02 for missing start/end
fn completeness_multiplier(record: &SleepRecord) -> f64 {
    let mut multiplier = 1.0 - MISSING_STAGE_FIELD_COST * record.missing_stage_fields() as f64;
    if !record.has_timing() {
        multiplier -= MISSING_TIMING_COST;
    }
    multiplier.clamp(0.0, 1.0)
}

/// Tier from completeness × reliability, one step lower when the record itself
/// is tagged low confidence
fn output_confidence(
    completeness: f64,
    reliability: f64,
    record_confidence: ConfidenceTier,
) -> ConfidenceTier {
    let quality = completeness * reliability;
    let tier = if quality >= 0.85 {
        ConfidenceTier::High
    } else if quality >= 0.6 {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    };
    if record_confidence == ConfidenceTier::Low {
        match tier {
            ConfidenceTier::High => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        }
    } else {
        tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_timestamp, DataSource};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<FixedOffset> {
        parse_timestamp("2024-01-16T09:00:00Z").unwrap()
    }

    fn healthy_night() -> SleepRecord {
        SleepRecord {
            duration_minutes: 480.0,
            start_time: parse_timestamp("2024-01-15T23:00:00Z"),
            end_time: parse_timestamp("2024-01-16T07:00:00Z"),
            deep_minutes: Some(96.0),
            rem_minutes: Some(106.0),
            light_minutes: Some(258.0),
            awake_minutes: Some(20.0),
            source: DataSource::HealthPlatform,
            confidence: ConfidenceTier::High,
            ..Default::default()
        }
    }

    fn score(record: &SleepRecord) -> ScoreBreakdown {
        ScoreCalculator::calculate(
            record,
            &[],
            &UserProfile::default(),
            now(),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((ScoreWeights::default().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dynamic_weights() {
        let weights = ScoreWeights::dynamic(&[ScoreComponent::Deep, ScoreComponent::Rem]);
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!((weights.deep - 0.10).abs() < 1e-9);
        assert!(weights.efficiency > 0.25);
    }

    #[test]
    fn test_healthy_night_scores_high() {
        let breakdown = score(&healthy_night());

        assert!(breakdown.score > 90, "score was {}", breakdown.score);
        assert_eq!(breakdown.confidence, ConfidenceTier::High);
        assert!(breakdown.flags.is_empty(), "flags: {:?}", breakdown.flags);
        assert!((breakdown.weights.sum() - 1.0).abs() < 1e-6);
        assert_eq!(breakdown.calculated_at, now());
    }

    #[test]
    fn test_zero_duration_returns_zero_result() {
        let breakdown = score(&SleepRecord::default());

        assert_eq!(breakdown.score, 0);
        assert_eq!(breakdown.confidence, ConfidenceTier::Low);
        assert!(breakdown.flags.contains(&ScoreFlag::DataIncompleteStages));
        assert!(breakdown.flags.contains(&ScoreFlag::DataIncompleteTiming));
        assert!((breakdown.weights.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_stages_use_neutral_half_weight() {
        let record = SleepRecord {
            deep_minutes: None,
            rem_minutes: None,
            ..healthy_night()
        };
        let breakdown = score(&record);

        let deep = breakdown.component(ScoreComponent::Deep).unwrap();
        assert_eq!(deep.raw_value, None);
        assert_eq!(deep.normalized, 0.5);
        assert!((breakdown.adjustments.completeness - 0.9).abs() < 1e-9);
        assert!(breakdown.score < score(&healthy_night()).score);
    }

    #[test]
    fn test_low_reliability_pulls_toward_fifty() {
        let manual = SleepRecord {
            source: DataSource::Manual,
            ..healthy_night()
        };
        let breakdown = score(&manual);
        let reference = score(&healthy_night());

        assert!(breakdown.score < reference.score);
        assert!(breakdown.score > 50);
        assert!(breakdown.flags.contains(&ScoreFlag::LowReliabilitySource));
    }

    #[test]
    fn test_chronic_debt_penalty_applies() {
        let history: Vec<SleepRecord> = (1..=14)
            .map(|day| SleepRecord {
                duration_minutes: 360.0,
                end_time: parse_timestamp(&format!("2024-01-{day:02}T07:00:00Z")),
                ..Default::default()
            })
            .collect();
        let breakdown = ScoreCalculator::calculate(
            &healthy_night(),
            &history,
            &UserProfile::default(),
            now(),
            &EngineConfig::default(),
        );

        // 14 nights × 120 minutes short = 28 hours -> capped at 10 points
        assert_eq!(breakdown.adjustments.chronic_debt_penalty, 10.0);
        assert!(breakdown.score < score(&healthy_night()).score);
    }

    #[test]
    fn test_deterministic() {
        let a = serde_json::to_string(&score(&healthy_night())).unwrap();
        let b = serde_json::to_string(&score(&healthy_night())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_output_confidence() {
        assert_eq!(
            output_confidence(1.0, 1.0, ConfidenceTier::High),
            ConfidenceTier::High
        );
        assert_eq!(
            output_confidence(1.0, 1.0, ConfidenceTier::Low),
            ConfidenceTier::Medium
        );
        assert_eq!(
            output_confidence(0.78, 0.6, ConfidenceTier::Medium),
            ConfidenceTier::Low
        );
    }
}
