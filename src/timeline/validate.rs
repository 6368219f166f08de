//! Timeline invariant check
//!
//! Runs on every synthesized timeline before it leaves the engine. A failure
//! here is a bug in the redistribution math, never a property of the input.

use crate::error::InvariantViolation;
use crate::types::{PhaseEvent, SleepStage};

/// Allowed difference between the timeline sum and its target (minutes)
pub const DURATION_TOLERANCE_MINUTES: i64 = 1;

/// Check the timeline contract:
/// - opens with a cycle-0 awake latency event
/// - every duration is positive and matches its start and end
/// - events are contiguous
/// - durations sum to `expected_total` ± 1
pub fn validate_timeline(
    events: &[PhaseEvent],
    expected_total: i64,
) -> Result<(), InvariantViolation> {
    match events.first() {
        Some(first) if first.stage == SleepStage::Awake && first.cycle == 0 => {}
        _ => return Err(InvariantViolation::MissingLatency),
    }

    for (index, event) in events.iter().enumerate() {
        let span = (event.end - event.start).num_minutes();
        if event.duration_minutes == 0 || span <= 0 {
            return Err(InvariantViolation::NonPositiveDuration {
                index,
                duration: span.min(i64::from(event.duration_minutes)),
            });
        }
        if span != i64::from(event.duration_minutes) {
            return Err(InvariantViolation::SpanMismatch {
                index,
                duration: i64::from(event.duration_minutes),
                span,
            });
        }
    }

    for (index, pair) in events.windows(2).enumerate() {
        if pair[0].end != pair[1].start {
            return Err(InvariantViolation::NonContiguous {
                index,
                next: index + 1,
                end: pair[0].end.to_rfc3339(),
                start: pair[1].start.to_rfc3339(),
            });
        }
    }

    let actual: i64 = events.iter().map(|e| i64::from(e.duration_minutes)).sum();
    if (actual - expected_total).abs() > DURATION_TOLERANCE_MINUTES {
        return Err(InvariantViolation::DurationMismatch {
            expected: expected_total,
            actual,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn build(parts: &[(SleepStage, u32, u32)]) -> Vec<PhaseEvent> {
        let mut cursor = parse_timestamp("2024-01-15T23:00:00Z").unwrap();
        parts
            .iter()
            .map(|(stage, minutes, cycle)| {
                let start = cursor;
                cursor = start + Duration::minutes(i64::from(*minutes));
                PhaseEvent {
                    stage: *stage,
                    start,
                    end: cursor,
                    duration_minutes: *minutes,
                    cycle: *cycle,
                }
            })
            .collect()
    }

    #[test]
    fn test_valid_timeline_passes() {
        let events = build(&[
            (SleepStage::Awake, 10, 0),
            (SleepStage::Light, 40, 1),
            (SleepStage::Deep, 40, 1),
        ]);
        assert_eq!(validate_timeline(&events, 90), Ok(()));
        assert_eq!(validate_timeline(&events, 91), Ok(()));
    }

    #[test]
    fn test_duration_mismatch() {
        let events = build(&[(SleepStage::Awake, 10, 0), (SleepStage::Light, 40, 1)]);
        assert_eq!(
            validate_timeline(&events, 60),
            Err(InvariantViolation::DurationMismatch {
                expected: 60,
                actual: 50
            })
        );
    }

    #[test]
    fn test_missing_latency() {
        let events = build(&[(SleepStage::Light, 40, 1)]);
        assert_eq!(
            validate_timeline(&events, 40),
            Err(InvariantViolation::MissingLatency)
        );
        assert_eq!(
            validate_timeline(&[], 0),
            Err(InvariantViolation::MissingLatency)
        );
    }

    #[test]
    fn test_gap_is_detected() {
        let mut events = build(&[(SleepStage::Awake, 10, 0), (SleepStage::Light, 40, 1)]);
        events[1].start += Duration::minutes(1);
        events[1].end += Duration::minutes(1);
        assert!(matches!(
            validate_timeline(&events, 50),
            Err(InvariantViolation::NonContiguous { index: 0, next: 1, .. })
        ));
    }

    #[test]
    fn test_duration_disagreeing_with_timestamps() {
        let mut events = build(&[(SleepStage::Awake, 10, 0), (SleepStage::Light, 40, 1)]);
        events[1].duration_minutes = 41;
        assert_eq!(
            validate_timeline(&events, 51),
            Err(InvariantViolation::SpanMismatch {
                index: 1,
                duration: 41,
                span: 40
            })
        );
    }

    #[test]
    fn test_zero_duration_is_detected() {
        let mut events = build(&[(SleepStage::Awake, 10, 0), (SleepStage::Light, 40, 1)]);
        events[1].duration_minutes = 0;
        assert!(matches!(
            validate_timeline(&events, 10),
            Err(InvariantViolation::NonPositiveDuration { index: 1, .. })
        ));
    }
}
