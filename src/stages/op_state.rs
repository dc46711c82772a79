//! Stage 1c — operational-state classification
//!
//! Chillers spend long stretches enabled-but-idle, and several physics
//! checks only make sense under load. Each row of the reference timeline
//! (CHWST timestamps) is classified Active/Standby/Off/Unknown from load,
//! ΔT, and flow against the equipment profile's thresholds, then smoothed
//! with a short majority vote to suppress single-sample flutter.
//!
//! Pairing here is classification-only: values never move between
//! timelines before Stage 3.

use crate::config::{defaults, StateThresholds};
use crate::types::{OperationalState, StateCounts};

/// Pair each reference timestamp with the index of the nearest sample of
/// another series, within ± `tolerance_s`. Two-pointer, O(N+M).
pub fn pair_nearest_idx(
    reference_ts: &[f64],
    other_ts: &[f64],
    tolerance_s: f64,
) -> Vec<Option<usize>> {
    let mut paired = Vec::with_capacity(reference_ts.len());
    let mut j = 0usize;

    for &t in reference_ts {
        while j < other_ts.len() && other_ts[j] < t {
            j += 1;
        }
        // Candidates: the first sample at/after t, and the one before it.
        let mut best: Option<(f64, usize)> = None;
        for candidate in [j.checked_sub(1), Some(j)].into_iter().flatten() {
            if candidate < other_ts.len() {
                let d = (other_ts[candidate] - t).abs();
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, candidate));
                }
            }
        }
        paired.push(match best {
            Some((d, idx)) if d <= tolerance_s => Some(idx),
            _ => None,
        });
    }
    paired
}

/// Pair each reference timestamp with the nearest finite *value* of
/// another series, within ± `tolerance_s`.
pub fn pair_nearest(
    reference_ts: &[f64],
    other_ts: &[f64],
    other_values: &[f64],
    tolerance_s: f64,
) -> Vec<Option<f64>> {
    pair_nearest_idx(reference_ts, other_ts, tolerance_s)
        .into_iter()
        .map(|idx| idx.map(|i| other_values[i]).filter(|v| v.is_finite()))
        .collect()
}

/// Per-row classification inputs on the reference timeline.
pub struct StateInputs {
    /// Load as percent of rated (0–100)
    pub load_pct: Vec<Option<f64>>,
    /// CHWRT − CHWST in K
    pub delta_t_k: Vec<Option<f64>>,
    /// Flow as a fraction of its own p99.5
    pub flow_frac: Vec<Option<f64>>,
}

/// Classify one row.
fn classify_row(
    load_pct: Option<f64>,
    delta_t_k: Option<f64>,
    flow_frac: Option<f64>,
    thresholds: &StateThresholds,
) -> OperationalState {
    let near_zero_load = defaults::NEAR_ZERO_FRACTION * 100.0;

    let load = match load_pct {
        Some(l) => l,
        None => return OperationalState::Unknown,
    };

    let flow_near_zero = flow_frac.map_or(true, |f| f <= defaults::NEAR_ZERO_FRACTION);
    if load <= near_zero_load && flow_near_zero {
        return OperationalState::Off;
    }

    match delta_t_k {
        Some(dt) if load > thresholds.load_pct && dt.abs() > thresholds.delta_t_min_k => {
            OperationalState::Active
        }
        // Enabled but below active thresholds, or ΔT unavailable.
        _ => OperationalState::Standby,
    }
}

/// Majority vote over a centred window. Window 3 means each row is
/// replaced by the majority of itself and its direct neighbours; ties
/// keep the original classification.
pub fn smooth_states(states: &[OperationalState], window: usize) -> Vec<OperationalState> {
    if window < 3 || states.len() < window {
        return states.to_vec();
    }
    let half = window / 2;
    let mut smoothed = Vec::with_capacity(states.len());
    for i in 0..states.len() {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(states.len());
        let neighbourhood = &states[lo..hi];

        let mut best = states[i];
        let mut best_count = 0usize;
        for candidate in [
            OperationalState::Active,
            OperationalState::Standby,
            OperationalState::Off,
            OperationalState::Unknown,
        ] {
            let count = neighbourhood.iter().filter(|s| **s == candidate).count();
            if count > best_count || (count == best_count && candidate == states[i]) {
                best = candidate;
                best_count = count;
            }
        }
        smoothed.push(best);
    }
    smoothed
}

/// Classify every row and apply smoothing.
pub fn classify_states(inputs: &StateInputs, thresholds: &StateThresholds) -> Vec<OperationalState> {
    let n = inputs.load_pct.len();
    debug_assert_eq!(n, inputs.delta_t_k.len());
    debug_assert_eq!(n, inputs.flow_frac.len());

    let raw: Vec<OperationalState> = (0..n)
        .map(|i| {
            classify_row(
                inputs.load_pct[i],
                inputs.delta_t_k[i],
                inputs.flow_frac[i],
                thresholds,
            )
        })
        .collect();

    smooth_states(&raw, defaults::STATE_SMOOTHING_WINDOW)
}

/// Tally states for the Stage 1 metrics record.
pub fn count_states(states: &[OperationalState]) -> StateCounts {
    let mut counts = StateCounts::default();
    for state in states {
        match state {
            OperationalState::Active => counts.active += 1,
            OperationalState::Standby => counts.standby += 1,
            OperationalState::Off => counts.off += 1,
            OperationalState::Unknown => counts.unknown += 1,
        }
    }
    counts
}
