//! Baseline computation
//!
//! This module reduces a user's recent night history into the rolling statistics
//! used to personalize scoring targets and stage predictions. Baselines are
//! recomputed from scratch on every call and never persisted.

use crate::features::FeatureDeriver;
use crate::types::SleepRecord;
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: f64 = 1440.0;
const NOON_MINUTES: f64 = 720.0;

/// Rolling statistics derived from a night history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBaseline {
    /// Mean session duration (minutes); the sleep goal when no nights qualify
    pub avg_duration_minutes: f64,
    /// Mean deep share (%)
    pub avg_deep_percent: f64,
    /// Mean REM share (%)
    pub avg_rem_percent: f64,
    /// Mean sleep efficiency (0-1)
    pub avg_efficiency: f64,
    /// Mean wake after sleep onset (minutes)
    pub avg_waso_minutes: f64,
    /// Median local bedtime, minutes past midnight
    pub median_bedtime_minutes: f64,
    /// Median local wake time, minutes past midnight
    pub median_wake_minutes: f64,
    /// Variance of bedtime (minutes²), computed across midnight
    pub bedtime_variance: f64,
    /// 25th percentile of duration (minutes)
    pub duration_p25: f64,
    /// 75th percentile of duration (minutes)
    pub duration_p75: f64,
    /// Nights with a positive duration
    pub nights_analysed: u32,
    /// Nights that contributed a bedtime
    pub bedtime_nights: u32,
}

/// Stateless baseline calculator
pub struct BaselineCalculator;

impl BaselineCalculator {
    /// Compute a fresh baseline from `history` in a single pass.
    ///
    /// Nights with a non-positive duration are ignored. `goal_minutes` is the
    /// average duration reported when no night qualifies.
    pub fn calculate(history: &[SleepRecord], goal_minutes: f64) -> UserBaseline {
        let mut durations: Vec<f64> = Vec::with_capacity(history.len());
        let mut bedtimes: Vec<f64> = Vec::new();
        let mut wake_times: Vec<f64> = Vec::new();
        let mut bedtime_stats = RunningStats::default();
        let mut deep = Mean::default();
        let mut rem = Mean::default();
        let mut efficiency = Mean::default();
        let mut waso = Mean::default();

        for record in history {
            let Some(features) = FeatureDeriver::derive(record) else {
                continue;
            };

            insert_sorted(&mut durations, features.duration_minutes);

            if let Some(bedtime) = features.bedtime_minutes {
                let unwrapped = unwrap_bedtime(bedtime);
                insert_sorted(&mut bedtimes, unwrapped);
                bedtime_stats.push(unwrapped);
            }
            if let Some(wake) = features.wake_minutes {
                insert_sorted(&mut wake_times, wake);
            }
            if let Some(pct) = features.deep_percent {
                deep.push(pct);
            }
            if let Some(pct) = features.rem_percent {
                rem.push(pct);
            }
            if let Some(eff) = features.baseline_efficiency() {
                efficiency.push(eff);
            }
            if let Some(minutes) = features.waso_minutes {
                waso.push(minutes);
            }
        }

        let avg_duration_minutes = if durations.is_empty() {
            goal_minutes
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        UserBaseline {
            avg_duration_minutes,
            avg_deep_percent: deep.value(),
            avg_rem_percent: rem.value(),
            avg_efficiency: efficiency.value(),
            avg_waso_minutes: waso.value(),
            median_bedtime_minutes: percentile(&bedtimes, 0.5)
                .map(|m| m.rem_euclid(MINUTES_PER_DAY))
                .unwrap_or(0.0),
            median_wake_minutes: percentile(&wake_times, 0.5).unwrap_or(0.0),
            bedtime_variance: bedtime_stats.variance(),
            duration_p25: percentile(&durations, 0.25).unwrap_or(0.0),
            duration_p75: percentile(&durations, 0.75).unwrap_or(0.0),
            nights_analysed: durations.len() as u32,
            bedtime_nights: bedtimes.len() as u32,
        }
    }
}

/// Net sleep debt over the most recent `window` nights (minutes, never negative)
pub fn sleep_debt_minutes(history: &[SleepRecord], goal_minutes: f64, window: usize) -> f64 {
    let deficit: f64 = recent_nights(history, window)
        .iter()
        .map(|record| goal_minutes - record.duration_minutes)
        .sum();
    deficit.max(0.0)
}

/// The most recent `window` nights with a positive duration, oldest first.
///
/// Nights are ordered by end (or start) time; nights without timestamps sort
/// before timestamped ones and otherwise keep their input order.
pub fn recent_nights(history: &[SleepRecord], window: usize) -> Vec<&SleepRecord> {
    let mut nights: Vec<&SleepRecord> = history
        .iter()
        .filter(|r| r.duration_minutes.is_finite() && r.duration_minutes > 0.0)
        .collect();
    nights.sort_by_key(|r| r.sort_key());
    let skip = nights.len().saturating_sub(window);
    nights.split_off(skip)
}

/// Shift after-midnight bedtimes by a day so 23:30 and 00:30 are 60 minutes apart
fn unwrap_bedtime(minutes: f64) -> f64 {
    if minutes < NOON_MINUTES {
        minutes + MINUTES_PER_DAY
    } else {
        minutes
    }
}

fn insert_sorted(values: &mut Vec<f64>, value: f64) {
    let idx = values.partition_point(|v| *v <= value);
    values.insert(idx, value);
}

/// Linear-interpolated percentile of an already sorted slice
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f64;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
        }
    }
}

#[derive(Debug, Default)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// Welford running mean and variance
#[derive(Debug, Default)]
struct RunningStats {
    count: u32,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance; 0 with fewer than two samples
    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / f64::from(self.count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;

    fn night(date: &str, bed: &str, wake: &str, duration: f64) -> SleepRecord {
        SleepRecord {
            duration_minutes: duration,
            start_time: parse_timestamp(&format!("{date}T{bed}:00Z")),
            end_time: parse_timestamp(&format!("{date}T{wake}:00Z")),
            deep_minutes: Some(duration * 0.2),
            rem_minutes: Some(duration * 0.25),
            light_minutes: Some(duration * 0.5),
            awake_minutes: Some(duration * 0.05),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_history_defaults() {
        let baseline = BaselineCalculator::calculate(&[], 450.0);

        assert_eq!(baseline.avg_duration_minutes, 450.0);
        assert_eq!(baseline.avg_deep_percent, 0.0);
        assert_eq!(baseline.nights_analysed, 0);
        assert_eq!(baseline.bedtime_variance, 0.0);
    }

    #[test]
    fn test_excludes_non_positive_nights() {
        let history = vec![
            SleepRecord {
                duration_minutes: 420.0,
                ..Default::default()
            },
            SleepRecord {
                duration_minutes: 0.0,
                ..Default::default()
            },
            SleepRecord {
                duration_minutes: -30.0,
                ..Default::default()
            },
        ];
        let baseline = BaselineCalculator::calculate(&history, 480.0);

        assert_eq!(baseline.nights_analysed, 1);
        assert_eq!(baseline.avg_duration_minutes, 420.0);
    }

    #[test]
    fn test_stage_and_duration_statistics() {
        let history: Vec<SleepRecord> = [400.0, 420.0, 440.0, 460.0, 480.0]
            .iter()
            .map(|d| SleepRecord {
                duration_minutes: *d,
                deep_minutes: Some(d * 0.2),
                rem_minutes: Some(d * 0.25),
                awake_minutes: Some(d * 0.05),
                ..Default::default()
            })
            .collect();
        let baseline = BaselineCalculator::calculate(&history, 480.0);

        assert!((baseline.avg_duration_minutes - 440.0).abs() < 1e-9);
        assert!((baseline.avg_deep_percent - 20.0).abs() < 1e-9);
        assert!((baseline.avg_rem_percent - 25.0).abs() < 1e-9);
        assert!((baseline.avg_efficiency - 0.95).abs() < 1e-9);
        assert!((baseline.duration_p25 - 420.0).abs() < 1e-9);
        assert!((baseline.duration_p75 - 460.0).abs() < 1e-9);
    }

    #[test]
    fn test_bedtime_median_across_midnight() {
        let history = vec![
            night("2024-01-10", "23:30", "07:00", 420.0),
            night("2024-01-11", "00:30", "07:30", 400.0),
            night("2024-01-12", "23:00", "06:30", 430.0),
        ];
        let baseline = BaselineCalculator::calculate(&history, 480.0);

        assert!((baseline.median_bedtime_minutes - (23.0 * 60.0 + 30.0)).abs() < 1e-9);
        assert!((baseline.median_wake_minutes - 7.0 * 60.0).abs() < 1e-9);
        // Unwrapped bedtimes 1410, 1470, 1380 around a mean of 1420
        let expected_variance = (100.0 + 2500.0 + 1600.0) / 3.0;
        assert!((baseline.bedtime_variance - expected_variance).abs() < 1e-6);
        assert_eq!(baseline.bedtime_nights, 3);
    }

    #[test]
    fn test_input_not_mutated() {
        let history = vec![night("2024-01-10", "23:30", "07:00", 420.0)];
        let copy = history.clone();
        let _ = BaselineCalculator::calculate(&history, 480.0);
        assert_eq!(history, copy);
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 0.5), Some(25.0));
        assert_eq!(percentile(&sorted, 0.0), Some(10.0));
        assert_eq!(percentile(&sorted, 1.0), Some(40.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_sleep_debt_uses_most_recent_nights() {
        let history = vec![
            night("2024-01-12", "23:00", "05:00", 360.0),
            night("2024-01-10", "23:00", "07:00", 480.0),
            night("2024-01-11", "23:00", "06:00", 420.0),
        ];
        // Window of 2 -> the 11th and 12th: (480-420) + (480-360)
        assert_eq!(sleep_debt_minutes(&history, 480.0, 2), 180.0);
        // Surplus nights pay debt back
        assert_eq!(sleep_debt_minutes(&history, 400.0, 3), 0.0);
    }
}
