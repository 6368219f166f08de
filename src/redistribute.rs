//! Integer redistribution helpers
//!
//! Pure, monotonic, bound-respecting functions used to split minute budgets
//! across cycles and to move minutes between them. Each helper works
//! proportionally first, then sweeps single units to settle rounding, so totals
//! are conserved exactly and no slot ever goes negative.

/// Split `total` units across `weights` using the largest-remainder method.
///
/// Non-positive or non-finite weights count as zero; if every weight is zero the
/// split is even. Ties in the remainder go to the lower index.
pub fn apportion(total: u32, weights: &[f64]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }

    let cleaned: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let weight_sum: f64 = cleaned.iter().sum();
    let cleaned = if weight_sum > 0.0 {
        cleaned
    } else {
        vec![1.0; weights.len()]
    };
    let weight_sum: f64 = cleaned.iter().sum();

    let quotas: Vec<f64> = cleaned
        .iter()
        .map(|w| f64::from(total) * w / weight_sum)
        .collect();
    let mut shares: Vec<u32> = quotas.iter().map(|q| q.floor() as u32).collect();

    let assigned: u32 = shares.iter().sum();
    let mut leftover = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..quotas.len()).collect();
    order.sort_by(|&a, &b| {
        let frac_a = quotas[a] - quotas[a].floor();
        let frac_b = quotas[b] - quotas[b].floor();
        frac_b.total_cmp(&frac_a).then(a.cmp(&b))
    });

    for &idx in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        shares[idx] += 1;
        leftover -= 1;
    }

    shares
}

/// Remove up to `amount` units from `donors`.
///
/// Each donor first gives in proportion to its size; any shortfall from rounding
/// is then taken one unit at a time from the currently largest donor. Returns the
/// reduced donors and the number of units actually taken, which is less than
/// `amount` only when the donors run dry.
pub fn take_from_donors(donors: &[u32], amount: u32) -> (Vec<u32>, u32) {
    let available: u64 = donors.iter().map(|d| u64::from(*d)).sum();
    let target = u64::from(amount).min(available);
    if target == 0 {
        return (donors.to_vec(), 0);
    }

    let mut remaining: Vec<u32> = donors
        .iter()
        .map(|d| {
            let share = u64::from(*d) * target / available;
            d - share as u32
        })
        .collect();

    let mut taken: u64 = donors
        .iter()
        .zip(&remaining)
        .map(|(before, after)| u64::from(before - after))
        .sum();

    while taken < target {
        let Some(idx) = largest_index(&remaining) else {
            break;
        };
        remaining[idx] -= 1;
        taken += 1;
    }

    (remaining, taken as u32)
}

/// Add `amount` units to `recipients`, split by `weights`
pub fn give_to_recipients(recipients: &[u32], amount: u32, weights: &[f64]) -> Vec<u32> {
    let shares = apportion(amount, weights);
    recipients
        .iter()
        .zip(shares.iter().chain(std::iter::repeat(&0)))
        .map(|(r, s)| r + s)
        .collect()
}

/// Rescale `values` so they sum to exactly `total`, preserving proportions
pub fn scale_to_total(values: &[u32], total: u32) -> Vec<u32> {
    let weights: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
    apportion(total, &weights)
}

/// Place a signed `residual` across `values` without leaving `bounds`.
///
/// Slots are visited in `priority` order; each absorbs as much of the residual as
/// its bound allows. Returns the corrected values and whatever residual could not
/// be placed (zero whenever the bounds admit a solution).
pub fn correct_residual(
    values: &[i64],
    bounds: &[(i64, i64)],
    priority: &[usize],
    residual: i64,
) -> (Vec<i64>, i64) {
    let mut corrected = values.to_vec();
    let mut residual = residual;

    for &idx in priority {
        if residual == 0 {
            break;
        }
        let (Some(value), Some(&(min, max))) = (corrected.get_mut(idx), bounds.get(idx)) else {
            continue;
        };
        if residual > 0 {
            let room = (max - *value).max(0);
            let step = room.min(residual);
            *value += step;
            residual -= step;
        } else {
            let room = (*value - min).max(0);
            let step = room.min(-residual);
            *value -= step;
            residual += step;
        }
    }

    (corrected, residual)
}

/// Index of the largest positive value; ties resolve to the lower index
fn largest_index(values: &[u32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > 0)
        .fold(None, |best: Option<(usize, u32)>, (idx, v)| match best {
            Some((_, best_v)) if best_v >= *v => best,
            _ => Some((idx, *v)),
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apportion_conserves_total() {
        let shares = apportion(100, &[1.0, 1.0, 1.0]);
        assert_eq!(shares, vec![34, 33, 33]);
        assert_eq!(apportion(7, &[0.5, 0.3, 0.2]).iter().sum::<u32>(), 7);
    }

    #[test]
    fn test_apportion_zero_weights_split_evenly() {
        assert_eq!(apportion(5, &[0.0, f64::NAN, -1.0]), vec![2, 2, 1]);
        assert!(apportion(5, &[]).is_empty());
    }

    #[test]
    fn test_apportion_decay_front_loads() {
        let weights: Vec<f64> = (0..4).map(|i| (-0.7 * i as f64).exp()).collect();
        let shares = apportion(90, &weights);
        assert_eq!(shares.iter().sum::<u32>(), 90);
        assert!(shares.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_take_from_donors_proportional_then_sweep() {
        let (remaining, taken) = take_from_donors(&[30, 20, 10], 10);
        assert_eq!(taken, 10);
        assert_eq!(remaining.iter().sum::<u32>(), 50);
        // Proportional floors are 5, 3, 1; the sweep takes the last unit from the largest
        assert_eq!(remaining, vec![24, 17, 9]);
    }

    #[test]
    fn test_take_from_donors_never_negative() {
        let (remaining, taken) = take_from_donors(&[2, 1, 0], 10);
        assert_eq!(taken, 3);
        assert_eq!(remaining, vec![0, 0, 0]);

        let (remaining, taken) = take_from_donors(&[], 4);
        assert_eq!(taken, 0);
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_give_to_recipients() {
        let result = give_to_recipients(&[5, 5, 5], 6, &[1.0, 2.0, 3.0]);
        assert_eq!(result, vec![6, 7, 8]);
    }

    #[test]
    fn test_scale_to_total() {
        let scaled = scale_to_total(&[70, 90, 90], 200);
        assert_eq!(scaled.iter().sum::<u32>(), 200);
        assert_eq!(scale_to_total(&[0, 0], 3), vec![2, 1]);
    }

    #[test]
    fn test_correct_residual_respects_bounds() {
        let values = [600, 240, 100, 60];
        let bounds = [(300, 600), (100, 350), (20, 250), (50, 350)];
        // Light is at its max, so the surplus spills into the next slot
        let (corrected, left) = correct_residual(&values, &bounds, &[0, 3, 1, 2], 5);
        assert_eq!(corrected, vec![600, 240, 100, 65]);
        assert_eq!(left, 0);

        let (corrected, left) = correct_residual(&values, &bounds, &[0, 3, 1, 2], -400);
        assert_eq!(corrected, vec![300, 150, 100, 50]);
        assert_eq!(left, 0);
    }

    #[test]
    fn test_correct_residual_reports_unplaceable() {
        let (corrected, left) = correct_residual(&[5], &[(0, 6)], &[0], 3);
        assert_eq!(corrected, vec![6]);
        assert_eq!(left, 2);
    }
}
