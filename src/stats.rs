//! Robust statistical estimators for raw BMS signals
//!
//! Vendor exports are full of isolated glitches (stuck ADCs, comms hiccups
//! written as 999999), so scaling and baseline decisions never use raw
//! min/max. The decoder and unit verifier work from interpolated quantiles
//! (p0.5 / p99.5) and MAD instead.

/// Keep only finite values (drops NaN and ±inf).
pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Interpolated quantile (type-7, the spreadsheet convention BMS analysts
/// expect) over an already-sorted slice.
///
/// Returns 0.0 for an empty slice. `tau` is clamped to [0, 1].
pub fn quantile_sorted(sorted: &[f64], tau: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let tau = tau.clamp(0.0, 1.0);
    let pos = tau * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Interpolated quantile over an unsorted slice (sorts a copy).
pub fn quantile(values: &[f64], tau: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("quantile input must be finite"));
    quantile_sorted(&sorted, tau)
}

/// Single-pass mean and (population) standard deviation via Welford's
/// recurrence. Returns (0.0, 0.0) for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, v) in values.iter().enumerate() {
        let delta = v - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (v - mean);
    }
    (mean, (m2 / values.len() as f64).sqrt())
}

/// Median of an unsorted slice.
pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Median absolute deviation, unscaled.
///
/// Robust spread estimate used to distinguish a genuinely flat COV channel
/// from one with low-amplitude noise.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let med = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    median(&deviations)
}

/// Check that a timestamp series is strictly increasing.
///
/// Returns `Err(index)` of the first sample whose timestamp does not
/// exceed its predecessor's. Duplicate merging must happen upstream, so a
/// violation here is a reversal.
pub fn check_strictly_increasing(timestamps: &[f64]) -> Result<(), usize> {
    for i in 1..timestamps.len() {
        if timestamps[i] <= timestamps[i - 1] {
            return Err(i);
        }
    }
    Ok(())
}
