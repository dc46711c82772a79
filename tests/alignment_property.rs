//! Alignment Property Tests
//!
//! The Stage 3 two-pointer aligner must agree with a brute-force
//! nearest-within-tolerance search on every grid point, across irregular
//! cadences, bursts, long silences, and clock-skewed streams. Cases are
//! generated with a fixed LCG so failures reproduce exactly.

use chillgrid::stages::synchronize::{align_stream, build_grid};
use chillgrid::types::AlignmentQuality;

const TOLERANCE_S: f64 = 1_800.0;

/// Minimal deterministic LCG (numerical-recipes constants).
struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 32) as u32
    }

    /// Uniform float in [0, 1).
    fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / u32::MAX as f64
    }
}

/// Brute-force nearest raw index within tolerance, ties to the earlier
/// sample — the reference semantics the two-pointer must reproduce.
fn brute_force_nearest(grid_point: f64, raw_ts: &[f64]) -> Option<usize> {
    let mut best: Option<(f64, usize)> = None;
    for (idx, &t) in raw_ts.iter().enumerate() {
        let d = (t - grid_point).abs();
        if best.map_or(true, |(bd, _)| d < bd) {
            best = Some((d, idx));
        }
    }
    best.and_then(|(d, idx)| (d <= TOLERANCE_S).then_some(idx))
}

/// Generate an irregular strictly-increasing timeline.
fn irregular_timeline(rng: &mut Lcg, samples: usize, burst_odds: f64, silence_odds: f64) -> Vec<f64> {
    let mut ts = Vec::with_capacity(samples);
    let mut t = rng.next_f64() * 900.0;
    for _ in 0..samples {
        ts.push(t);
        let roll = rng.next_f64();
        let dt = if roll < burst_odds {
            // COV burst: sub-minute updates
            1.0 + rng.next_f64() * 50.0
        } else if roll < burst_odds + silence_odds {
            // Long silence: hours of constant value
            3_600.0 + rng.next_f64() * 20_000.0
        } else {
            // Around nominal cadence with jitter
            600.0 + rng.next_f64() * 700.0
        };
        t += dt;
    }
    ts
}

#[test]
fn test_two_pointer_equals_brute_force_across_regimes() {
    let mut rng = Lcg(0x5EED_CAFE);

    for case in 0..50 {
        let samples = 50 + (rng.next_u32() % 400) as usize;
        let burst_odds = rng.next_f64() * 0.4;
        let silence_odds = rng.next_f64() * 0.2;
        let raw_ts = irregular_timeline(&mut rng, samples, burst_odds, silence_odds);
        let raw_values: Vec<f64> = raw_ts.iter().map(|t| (t * 0.01).sin()).collect();

        let grid = build_grid(raw_ts[0], *raw_ts.last().unwrap(), 900.0);
        let aligned = align_stream(&grid, &raw_ts, &raw_values);
        assert_eq!(aligned.len(), grid.len());

        for (i, &g) in grid.iter().enumerate() {
            let expected = brute_force_nearest(g, &raw_ts);
            assert_eq!(
                aligned[i].source_index, expected,
                "case {}: grid point {} chose a different raw sample",
                case, g
            );
            if let Some(idx) = expected {
                let d = (raw_ts[idx] - g).abs();
                assert_eq!(aligned[i].quality, AlignmentQuality::from_distance(d));
                assert_eq!(aligned[i].jitter_s, d);
                assert_eq!(aligned[i].value, Some(raw_values[idx]));
            } else {
                assert_eq!(aligned[i].quality, AlignmentQuality::Missing);
                assert_eq!(aligned[i].value, None);
            }
        }
    }
}

#[test]
fn test_two_pointer_on_skewed_clock() {
    // Raw stream running a constant 40 s behind the grid: every point is
    // Exact and the jitter is uniformly 40 s.
    let raw_ts: Vec<f64> = (0..200).map(|i| i as f64 * 900.0 + 40.0).collect();
    let raw_values: Vec<f64> = raw_ts.iter().map(|t| *t).collect();
    let grid = build_grid(0.0, 200.0 * 900.0, 900.0);
    let aligned = align_stream(&grid, &raw_ts, &raw_values);

    for point in aligned.iter().take(199).skip(1) {
        assert_eq!(point.quality, AlignmentQuality::Exact);
        assert_eq!(point.jitter_s, 40.0);
    }
}

#[test]
fn test_grid_count_property_over_random_spans() {
    let mut rng = Lcg(0xBEEF_0042);
    for _ in 0..200 {
        let start = rng.next_f64() * 10_000.0;
        let span = 900.0 + rng.next_f64() * 500_000.0;
        let end = start + span;
        let step = 900.0;

        let grid = build_grid(start, end, step);
        let first = (start / step).ceil() * step;
        let expected = 1 + ((end - first) / step).floor() as usize;
        assert_eq!(grid.len(), expected, "start={} end={}", start, end);

        // Strictly increasing multiples of the step.
        for pair in grid.windows(2) {
            assert_eq!(pair[1] - pair[0], step);
        }
    }
}

#[test]
fn test_equidistant_tie_prefers_earlier_sample() {
    // Raw samples exactly ±450 s around the grid point.
    let grid = [900.0];
    let raw_ts = [450.0, 1_350.0];
    let aligned = align_stream(&grid, &raw_ts, &[1.0, 2.0]);
    assert_eq!(aligned[0].source_index, Some(0), "tie resolves to the earlier sample");
    assert_eq!(aligned[0].value, Some(1.0));
}
