//! Engine configuration
//!
//! Tunables that are policy rather than physiology. Scientific constants (score
//! weights, stage bounds, cycle lengths) live next to the code that uses them.

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};

/// Configuration shared by every engine component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sleep goal used when the profile has none (minutes)
    pub default_sleep_goal_minutes: f64,
    /// Nights considered for the chronic sleep-debt penalty
    pub chronic_debt_window_nights: usize,
    /// Nights considered for "recent" sleep debt (prediction, timeline boost)
    pub recent_debt_window_nights: usize,
    /// Minimum history nights before regularity is scored
    pub consistency_min_nights: usize,
    /// Largest end-time drift absorbed into the final timeline event (minutes)
    pub drift_correction_window_minutes: i64,
    /// Minimum history nights before personal norms are blended into targets
    pub personal_blend_min_nights: usize,
    /// Weight of the personal average in blended norms (0-1)
    pub personal_blend_weight: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_sleep_goal_minutes: 480.0,
            chronic_debt_window_nights: 14,
            recent_debt_window_nights: 7,
            consistency_min_nights: 5,
            drift_correction_window_minutes: 5,
            personal_blend_min_nights: 7,
            personal_blend_weight: 0.3,
        }
    }
}

impl EngineConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(self.default_sleep_goal_minutes.is_finite() && self.default_sleep_goal_minutes > 0.0)
        {
            return Err(ComputeError::InvalidConfig(
                "default_sleep_goal_minutes must be positive".to_string(),
            ));
        }
        if self.chronic_debt_window_nights == 0 || self.recent_debt_window_nights == 0 {
            return Err(ComputeError::InvalidConfig(
                "debt windows must cover at least one night".to_string(),
            ));
        }
        if self.drift_correction_window_minutes < 0 {
            return Err(ComputeError::InvalidConfig(
                "drift_correction_window_minutes cannot be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.personal_blend_weight) {
            return Err(ComputeError::InvalidConfig(format!(
                "personal_blend_weight must be within [0, 1], got {}",
                self.personal_blend_weight
            )));
        }
        Ok(())
    }

    /// Load and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"consistency_min_nights": 3}"#).unwrap();
        assert_eq!(config.consistency_min_nights, 3);
        assert_eq!(config.chronic_debt_window_nights, 14);
    }

    #[test]
    fn test_rejects_bad_blend_weight() {
        let result = EngineConfig::from_json(r#"{"personal_blend_weight": 1.5}"#);
        assert!(matches!(result, Err(ComputeError::InvalidConfig(_))));
    }

    #[test]
    fn test_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
