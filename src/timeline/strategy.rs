//! Cycle synthesis strategies
//!
//! Both timeline call sites share one synthesizer but tune it differently: the
//! aggregate strategy works from real (or scaled) stage minutes, the prediction
//! strategy from a predicted percentage distribution.

use serde::{Deserialize, Serialize};

/// Which call site produced a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Driven by aggregate per-stage minutes
    Aggregate,
    /// Driven by a predicted stage distribution
    Prediction,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Aggregate => "aggregate",
            StrategyKind::Prediction => "prediction",
        }
    }
}

/// Weighting parameters for one strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleStrategy {
    pub kind: StrategyKind,
    /// `k` in the deep weights `e^(−k·i)`
    pub deep_decay: f64,
    /// Offset in the REM weights `ln(i + offset)`
    pub rem_log_offset: f64,
    /// Upper bound on cycle-1 REM (minutes)
    pub first_cycle_rem_ceiling: u32,
}

impl CycleStrategy {
    pub const AGGREGATE: CycleStrategy = CycleStrategy {
        kind: StrategyKind::Aggregate,
        deep_decay: 0.7,
        rem_log_offset: 2.0,
        first_cycle_rem_ceiling: 8,
    };

    pub const PREDICTION: CycleStrategy = CycleStrategy {
        kind: StrategyKind::Prediction,
        deep_decay: 0.65,
        rem_log_offset: 1.5,
        first_cycle_rem_ceiling: 8,
    };

    pub fn for_kind(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Aggregate => Self::AGGREGATE,
            StrategyKind::Prediction => Self::PREDICTION,
        }
    }

    /// Front-loading weights for deep sleep
    pub fn deep_weights(&self, cycles: usize) -> Vec<f64> {
        (0..cycles)
            .map(|i| (-self.deep_decay * i as f64).exp())
            .collect()
    }

    /// Back-loading weights for REM
    pub fn rem_weights(&self, cycles: usize) -> Vec<f64> {
        (0..cycles)
            .map(|i| (i as f64 + self.rem_log_offset).ln())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_weights_decay() {
        let weights = CycleStrategy::AGGREGATE.deep_weights(4);
        assert_eq!(weights[0], 1.0);
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_rem_weights_grow_and_stay_positive() {
        for strategy in [CycleStrategy::AGGREGATE, CycleStrategy::PREDICTION] {
            let weights = strategy.rem_weights(6);
            assert!(weights[0] > 0.0);
            assert!(weights.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_for_kind() {
        assert_eq!(
            CycleStrategy::for_kind(StrategyKind::Prediction),
            CycleStrategy::PREDICTION
        );
        assert_eq!(StrategyKind::Aggregate.as_str(), "aggregate");
    }
}
