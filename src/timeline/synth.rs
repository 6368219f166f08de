//! Cycle timeline synthesis
//!
//! Splits a night's total minutes into a sleep-onset latency followed by 3-6
//! sleep cycles, spreads each stage budget across the cycles, and lays the
//! result out as contiguous phase events on a minute cursor.

use super::strategy::CycleStrategy;
use super::validate::validate_timeline;
use super::{cycle_breakdowns, SleepTimeline, TimelineContext};
use crate::error::TimelineError;
use crate::redistribute::{apportion, give_to_recipients, scale_to_total, take_from_donors};
use crate::types::{PhaseEvent, SleepStage, StageTally};
use chrono::{DateTime, Duration, FixedOffset, Timelike};
use tracing::{debug, error, warn};

/// Shortest night that can hold a latency and three cycles
pub const MIN_TIMELINE_MINUTES: u32 = 30;
/// Longest span treated as one night
pub const MAX_TIMELINE_MINUTES: u32 = 24 * 60;

const NOMINAL_CYCLE_MINUTES: f64 = 95.0;
const CYCLE_COUNT_RANGE: (u32, u32) = (3, 6);
const FIRST_CYCLE_RANGE: (i64, i64) = (70, 100);
const LATER_CYCLE_RANGE: (i64, i64) = (85, 120);
const FIRST_CYCLE_OFFSET: f64 = 0.3;
/// Below this the last cycle is not a cycle; lengths are rescaled instead
const MIN_LAST_CYCLE_MINUTES: i64 = 20;

const LIGHT_FLOOR_MINUTES: u32 = 5;

const LATENCY_RANGE: (f64, f64) = (5.0, 30.0);
const LATENCY_BASE_MINUTES: f64 = 12.0;

const DEBT_BOOST_THRESHOLD: f64 = 60.0;
const DEBT_BOOST_RAMP_MINUTES: f64 = 180.0;
const DEBT_BOOST_MAX_FRACTION: f64 = 0.25;

/// Budget split when no stage minutes are known (deep, rem, light, awake)
const DEFAULT_BUDGET_WEIGHTS: [f64; 4] = [18.0, 22.0, 53.0, 7.0];

/// Minutes planned for one cycle; always sums to `length`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CyclePlan {
    length: u32,
    deep: u32,
    rem: u32,
    light: u32,
    awake: u32,
}

/// Synthesize a validated timeline from stage budgets
pub fn synthesize(
    ctx: &TimelineContext,
    budget: StageTally,
    strategy: &CycleStrategy,
) -> Result<SleepTimeline, TimelineError> {
    let total = ctx.total_minutes;
    if total < MIN_TIMELINE_MINUTES {
        return Err(TimelineError::InsufficientDuration(i64::from(total)));
    }
    if total > MAX_TIMELINE_MINUTES {
        return Err(TimelineError::ExcessiveDuration(i64::from(total)));
    }

    let budget = rebalance_budget(budget, total);
    let latency = onset_latency(ctx.resting_hr, ctx.age_years, total);
    let budget = take_latency(budget, latency);
    let remaining = total - latency;

    let lengths = partition_cycles(remaining);
    let cycles = lengths.len();
    debug!(
        strategy = strategy.kind.as_str(),
        total,
        latency,
        cycles,
        lengths = ?lengths,
        "cycle partition"
    );

    let mut deep = apportion(budget.deep, &strategy.deep_weights(cycles));
    boost_first_cycle_deep(&mut deep, ctx.sleep_debt_minutes);
    let rem = distribute_rem(budget.rem, cycles, strategy, ctx.start.hour());
    let awake = apportion(budget.awake, &vec![1.0; cycles]);
    let plans = fill_cycles(&lengths, &deep, &rem, &awake);

    let mut events = assemble(ctx.start, latency, &plans);

    let mut target = i64::from(total);
    let mut drift_minutes = None;
    if let (Some(end), Some(last)) = (ctx.end, events.last_mut()) {
        let drift = (end - last.end).num_minutes();
        let absorbable = drift.abs() <= ctx.drift_window_minutes
            && i64::from(last.duration_minutes) + drift > 0;
        if drift != 0 && absorbable {
            last.duration_minutes = (i64::from(last.duration_minutes) + drift) as u32;
            last.end += Duration::minutes(drift);
            target += drift;
        } else if drift != 0 {
            warn!(
                drift_minutes = drift,
                window = ctx.drift_window_minutes,
                "timeline end drifts from recorded end time"
            );
            drift_minutes = Some(drift);
        }
    }

    validate_timeline(&events, target).map_err(|violation| {
        error!(%violation, strategy = strategy.kind.as_str(), "timeline invariant violated");
        TimelineError::Invariant(violation)
    })?;

    let cycle_list = cycle_breakdowns(&events);
    let total_minutes = events.iter().map(|e| e.duration_minutes).sum();
    Ok(SleepTimeline {
        strategy: strategy.kind,
        events,
        cycles: cycle_list,
        cycle_count: cycles as u32,
        sleep_onset_latency_minutes: latency,
        total_minutes,
        drift_minutes,
    })
}

/// Make the budget sum to exactly `total`
fn rebalance_budget(budget: StageTally, total: u32) -> StageTally {
    let parts = [budget.deep, budget.rem, budget.light, budget.awake];
    let sum: u64 = parts.iter().map(|p| u64::from(*p)).sum();
    let scaled = if sum == 0 {
        apportion(total, &DEFAULT_BUDGET_WEIGHTS)
    } else if sum == u64::from(total) {
        parts.to_vec()
    } else {
        scale_to_total(&parts, total)
    };
    StageTally {
        deep: scaled[0],
        rem: scaled[1],
        light: scaled[2],
        awake: scaled[3],
    }
}

/// Sleep-onset latency: longer with a higher resting HR and with age above 40.
/// Never more than a sixth of the night.
pub fn onset_latency(resting_hr: f64, age_years: u32, total: u32) -> u32 {
    let raw = LATENCY_BASE_MINUTES
        + (resting_hr - 60.0) * 0.3
        + (f64::from(age_years) - 40.0).max(0.0) * 0.2;
    let raw = if raw.is_finite() {
        raw
    } else {
        LATENCY_BASE_MINUTES
    };
    let latency = raw.clamp(LATENCY_RANGE.0, LATENCY_RANGE.1).round() as u32;
    latency.min(total / 6).max(1)
}

/// Fund the latency from awake, then light, then deep and REM
fn take_latency(budget: StageTally, latency: u32) -> StageTally {
    let mut budget = budget;
    let mut needed = latency;

    let from_awake = needed.min(budget.awake);
    budget.awake -= from_awake;
    needed -= from_awake;

    let from_light = needed.min(budget.light);
    budget.light -= from_light;
    needed -= from_light;

    if needed > 0 {
        let (rest, _) = take_from_donors(&[budget.deep, budget.rem], needed);
        budget.deep = rest[0];
        budget.rem = rest[1];
    }
    budget
}

/// Cycle lengths summing to `remaining`
pub fn partition_cycles(remaining: u32) -> Vec<u32> {
    let remaining_f = f64::from(remaining);
    let count = ((remaining_f / NOMINAL_CYCLE_MINUTES).round() as u32)
        .clamp(CYCLE_COUNT_RANGE.0, CYCLE_COUNT_RANGE.1);

    let first = ((remaining_f / (f64::from(count) + FIRST_CYCLE_OFFSET)).round() as i64)
        .clamp(FIRST_CYCLE_RANGE.0, FIRST_CYCLE_RANGE.1);
    let later = (((remaining_f - first as f64) / f64::from(count - 1)).round() as i64)
        .clamp(LATER_CYCLE_RANGE.0, LATER_CYCLE_RANGE.1);

    let mut lengths: Vec<i64> = std::iter::once(first)
        .chain(std::iter::repeat(later).take(count as usize - 2))
        .collect();
    let last = i64::from(remaining) - lengths.iter().sum::<i64>();

    if last >= MIN_LAST_CYCLE_MINUTES {
        lengths.push(last);
        lengths.into_iter().map(|l| l as u32).collect()
    } else {
        lengths.push(later);
        let nominal: Vec<u32> = lengths.into_iter().map(|l| l as u32).collect();
        scale_to_total(&nominal, remaining)
    }
}

/// Move up to a quarter of cycle 1's deep forward from later cycles when the
/// recent debt passes an hour
fn boost_first_cycle_deep(deep: &mut [u32], sleep_debt_minutes: f64) {
    if sleep_debt_minutes.is_nan() || sleep_debt_minutes <= DEBT_BOOST_THRESHOLD || deep.len() < 2
    {
        return;
    }
    let ramp = ((sleep_debt_minutes - DEBT_BOOST_THRESHOLD) / DEBT_BOOST_RAMP_MINUTES).min(1.0);
    let boost = (f64::from(deep[0]) * DEBT_BOOST_MAX_FRACTION * ramp).round() as u32;
    if boost == 0 {
        return;
    }

    let (rest, taken) = take_from_donors(&deep[1..], boost);
    deep[1..].copy_from_slice(&rest);
    deep[0] += taken;
    debug!(sleep_debt_minutes, boost = taken, "first-cycle deep rebound");
}

/// REM per cycle: back-loaded, with cycle 1 capped by the strategy ceiling and
/// the circadian window of the bedtime hour
fn distribute_rem(
    total_rem: u32,
    cycles: usize,
    strategy: &CycleStrategy,
    bedtime_hour: u32,
) -> Vec<u32> {
    let weights = strategy.rem_weights(cycles);
    let mut rem = apportion(total_rem, &weights);
    let Some(&initial) = rem.first() else {
        return rem;
    };

    let mut first = initial.min(strategy.first_cycle_rem_ceiling);
    match bedtime_hour {
        18..=21 => first /= 2,
        22 | 23 | 0 => first = first.min(10),
        _ => {}
    }

    let delta = initial - first;
    if delta > 0 && cycles > 1 {
        let later = give_to_recipients(&rem[1..], delta, &weights[1..]);
        rem[1..].copy_from_slice(&later);
        rem[0] = first;
    }
    rem
}

/// Turn per-cycle allocations into plans whose light sleep fills the rest.
///
/// A cycle whose light would fall under the floor gives up deep, then REM, then
/// awake. Deep taken this way moves to the earliest cycles with light to spare.
fn fill_cycles(lengths: &[u32], deep: &[u32], rem: &[u32], awake: &[u32]) -> Vec<CyclePlan> {
    let mut orphaned_deep = 0u32;
    let mut plans: Vec<CyclePlan> = lengths
        .iter()
        .enumerate()
        .map(|(i, &length)| {
            let floor = LIGHT_FLOOR_MINUTES.min(length);
            let mut deep = deep.get(i).copied().unwrap_or(0);
            let mut rem = rem.get(i).copied().unwrap_or(0);
            let mut awake = awake.get(i).copied().unwrap_or(0);

            let used = i64::from(deep) + i64::from(rem) + i64::from(awake);
            let light = i64::from(length) - used;
            if light < i64::from(floor) {
                let mut deficit = (i64::from(floor) - light) as u32;
                let cut = deficit.min(deep);
                deep -= cut;
                deficit -= cut;
                orphaned_deep += cut;

                let cut = deficit.min(rem);
                rem -= cut;
                deficit -= cut;

                let cut = deficit.min(awake);
                awake -= cut;
            }

            CyclePlan {
                length,
                deep,
                rem,
                light: length - deep - rem - awake,
                awake,
            }
        })
        .collect();

    for plan in plans.iter_mut() {
        if orphaned_deep == 0 {
            break;
        }
        let floor = LIGHT_FLOOR_MINUTES.min(plan.length);
        let moved = plan.light.saturating_sub(floor).min(orphaned_deep);
        plan.light -= moved;
        plan.deep += moved;
        orphaned_deep -= moved;
    }

    plans
}

/// Lay out latency and cycles on a minute cursor.
///
/// Each cycle runs light descent, deep, light ascent, REM, then awake.
fn assemble(start: DateTime<FixedOffset>, latency: u32, plans: &[CyclePlan]) -> Vec<PhaseEvent> {
    let mut events = Vec::with_capacity(1 + plans.len() * 5);
    let mut cursor = start;
    push_phase(&mut events, &mut cursor, SleepStage::Awake, latency, 0);

    for (i, plan) in plans.iter().enumerate() {
        let cycle = i as u32 + 1;
        let descent = plan.light.div_ceil(2);
        let ascent = plan.light - descent;
        for (stage, minutes) in [
            (SleepStage::Light, descent),
            (SleepStage::Deep, plan.deep),
            (SleepStage::Light, ascent),
            (SleepStage::Rem, plan.rem),
            (SleepStage::Awake, plan.awake),
        ] {
            push_phase(&mut events, &mut cursor, stage, minutes, cycle);
        }
    }

    events
}

/// Append a phase, merging into the previous one when stage and cycle match
fn push_phase(
    events: &mut Vec<PhaseEvent>,
    cursor: &mut DateTime<FixedOffset>,
    stage: SleepStage,
    minutes: u32,
    cycle: u32,
) {
    if minutes == 0 {
        return;
    }
    let end = *cursor + Duration::minutes(i64::from(minutes));
    match events.last_mut() {
        Some(last) if last.stage == stage && last.cycle == cycle => {
            last.end = end;
            last.duration_minutes += minutes;
        }
        _ => events.push(PhaseEvent {
            stage,
            start: *cursor,
            end,
            duration_minutes: minutes,
            cycle,
        }),
    }
    *cursor = end;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_timestamp;
    use pretty_assertions::assert_eq;

    fn context(total: u32) -> TimelineContext {
        let start = parse_timestamp("2024-01-15T23:00:00Z").unwrap();
        TimelineContext {
            start,
            end: Some(start + Duration::minutes(i64::from(total))),
            total_minutes: total,
            resting_hr: 60.0,
            age_years: 35,
            sleep_debt_minutes: 0.0,
            drift_window_minutes: 5,
        }
    }

    fn budget(deep: u32, rem: u32, light: u32, awake: u32) -> StageTally {
        StageTally {
            awake,
            light,
            deep,
            rem,
        }
    }

    #[test]
    fn test_partition_counts() {
        assert_eq!(partition_cycles(288).len(), 3);
        assert_eq!(partition_cycles(467).len(), 5);
        assert_eq!(partition_cycles(527).len(), 6);
        for remaining in [25, 100, 288, 467, 527, 700, 1000] {
            let lengths = partition_cycles(remaining);
            assert_eq!(lengths.iter().sum::<u32>(), remaining);
            assert!(lengths.iter().all(|l| *l > 0));
        }
    }

    #[test]
    fn test_partition_shapes_first_cycle_shorter() {
        let lengths = partition_cycles(467);
        assert_eq!(lengths, vec![88, 95, 95, 95, 94]);
    }

    #[test]
    fn test_onset_latency() {
        assert_eq!(onset_latency(60.0, 35, 480), 12);
        // 12 + 6 + 4 = 22
        assert_eq!(onset_latency(80.0, 60, 480), 22);
        assert_eq!(onset_latency(120.0, 90, 480), 30);
        assert_eq!(onset_latency(40.0, 20, 480), 6);
        // Capped at a sixth of a short night
        assert_eq!(onset_latency(80.0, 60, 60), 10);
    }

    #[test]
    fn test_latency_funded_from_awake_then_light() {
        let after = take_latency(budget(90, 100, 270, 20), 25);
        assert_eq!(after, budget(90, 100, 265, 0));
    }

    #[test]
    fn test_debt_boost_moves_deep_forward() {
        let mut deep = vec![48, 24, 12, 6];
        boost_first_cycle_deep(&mut deep, 300.0);
        assert_eq!(deep[0], 60);
        assert_eq!(deep.iter().sum::<u32>(), 90);

        let mut unchanged = vec![48, 24, 12, 6];
        boost_first_cycle_deep(&mut unchanged, 60.0);
        assert_eq!(unchanged, vec![48, 24, 12, 6]);
    }

    #[test]
    fn test_rem_first_cycle_ceiling_and_circadian_window() {
        let rem = distribute_rem(100, 5, &CycleStrategy::AGGREGATE, 2);
        assert!(rem[0] <= 8);
        assert_eq!(rem.iter().sum::<u32>(), 100);
        assert!(rem.windows(2).skip(1).all(|w| w[0] <= w[1]));

        let early = distribute_rem(100, 5, &CycleStrategy::AGGREGATE, 20);
        assert!(early[0] <= 4);
        assert_eq!(early.iter().sum::<u32>(), 100);

        let prediction = distribute_rem(120, 5, &CycleStrategy::PREDICTION, 23);
        assert!(prediction[0] <= 10);
        assert_eq!(prediction.iter().sum::<u32>(), 120);
    }

    #[test]
    fn test_light_floor_trims_deep_and_rehomes_it() {
        let plans = fill_cycles(&[60, 100], &[50, 10], &[8, 20], &[2, 2]);
        assert_eq!(plans[0].light, 5);
        assert_eq!(plans[0].deep, 45);
        // The trimmed 5 deep minutes land in cycle 2
        assert_eq!(plans[1].deep, 15);
        for plan in &plans {
            assert_eq!(
                plan.deep + plan.rem + plan.light + plan.awake,
                plan.length
            );
        }
    }

    #[test]
    fn test_synthesize_full_night() {
        let timeline =
            synthesize(&context(480), budget(96, 106, 258, 20), &CycleStrategy::AGGREGATE)
                .unwrap();

        assert_eq!(timeline.total_minutes, 480);
        assert_eq!(timeline.cycle_count, 5);
        assert_eq!(timeline.sleep_onset_latency_minutes, 12);
        assert_eq!(timeline.drift_minutes, None);
        assert_eq!(timeline.events[0].stage, SleepStage::Awake);
        assert_eq!(timeline.events[0].cycle, 0);
        assert_eq!(timeline.cycles.len(), 5);

        let totals = timeline.stage_totals();
        assert_eq!(totals.deep, 96);
        assert_eq!(totals.total(), 480);
    }

    #[test]
    fn test_small_drift_absorbed() {
        let mut ctx = context(480);
        ctx.end = Some(ctx.start + Duration::minutes(483));
        let timeline =
            synthesize(&ctx, budget(96, 106, 258, 20), &CycleStrategy::AGGREGATE).unwrap();

        assert_eq!(timeline.total_minutes, 483);
        assert_eq!(timeline.events.last().map(|e| e.end), ctx.end);
        assert_eq!(timeline.drift_minutes, None);
    }

    #[test]
    fn test_large_drift_flagged_not_absorbed() {
        let mut ctx = context(480);
        ctx.end = Some(ctx.start + Duration::minutes(510));
        let timeline =
            synthesize(&ctx, budget(96, 106, 258, 20), &CycleStrategy::AGGREGATE).unwrap();

        assert_eq!(timeline.total_minutes, 480);
        assert_eq!(timeline.drift_minutes, Some(30));
    }

    #[test]
    fn test_too_short_night() {
        let err = synthesize(&context(20), budget(0, 0, 20, 0), &CycleStrategy::AGGREGATE)
            .unwrap_err();
        assert_eq!(err, TimelineError::InsufficientDuration(20));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_day_long_span_rejected() {
        let err = synthesize(&context(1441), budget(0, 0, 0, 0), &CycleStrategy::AGGREGATE)
            .unwrap_err();
        assert_eq!(err, TimelineError::ExcessiveDuration(1441));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_oversized_budget_is_scaled_down() {
        let huge = budget(u32::MAX, u32::MAX, 10, 10);
        let timeline = synthesize(&context(480), huge, &CycleStrategy::AGGREGATE).unwrap();
        assert_eq!(timeline.total_minutes, 480);
        assert_eq!(timeline.stage_totals().total(), 480);
    }

    #[test]
    fn test_minimum_night_still_valid() {
        let timeline =
            synthesize(&context(30), budget(0, 0, 0, 0), &CycleStrategy::PREDICTION).unwrap();
        assert_eq!(timeline.total_minutes, 30);
        assert_eq!(timeline.cycle_count, 3);
    }
}
