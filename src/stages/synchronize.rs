//! Stage 3 — synchronisation to a uniform grid
//!
//! Builds the grid by ceiling the earliest timestamp to the next multiple
//! of the nominal step, then aligns every stream with a two-pointer
//! O(N+M) scan. No interpolation ever: each cell is the nearest raw value
//! within ±1800 s or Missing. Row classification folds in the Stage 2
//! semantics at the chosen raw points and the approved exclusion windows.

use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::config::{defaults, PlantConfig};
use crate::stats;
use crate::types::{
    AlignedColumn, AlignedPoint, AlignmentQuality, ChannelAlignmentReport, CoverageTier,
    ExclusionWindow, GapSemantic, HaltReason, PipelineError, RowClassification, Stage2Metrics,
    Stage3Metrics, SyncFrame,
};

use super::gap_scan::GapDataset;
use super::verify::VerifiedDataset;

/// Grid from `start` (ceiled to a step multiple) to the last multiple at
/// or before `end`.
pub fn build_grid(start: f64, end: f64, step_s: f64) -> Vec<f64> {
    debug_assert!(step_s > 0.0);
    let first = (start / step_s).ceil() * step_s;
    let mut grid = Vec::new();
    let mut t = first;
    while t <= end {
        grid.push(t);
        t += step_s;
    }
    grid
}

/// Align one raw stream onto the grid. Two-pointer scan: for each grid
/// point g, advance j while raw[j] < g; the candidates are j−1 and j and
/// the nearer wins (ties to the earlier sample).
pub fn align_stream(grid: &[f64], raw_ts: &[f64], raw_values: &[f64]) -> Vec<AlignedPoint> {
    let mut points = Vec::with_capacity(grid.len());
    let mut j = 0usize;

    for &g in grid {
        while j < raw_ts.len() && raw_ts[j] < g {
            j += 1;
        }

        let mut best: Option<(f64, usize)> = None;
        for candidate in [j.checked_sub(1), Some(j)].into_iter().flatten() {
            if candidate < raw_ts.len() {
                let d = (raw_ts[candidate] - g).abs();
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, candidate));
                }
            }
        }

        points.push(match best {
            Some((d, idx)) if d <= defaults::ALIGN_TOLERANCE_S => {
                let value = raw_values[idx];
                AlignedPoint {
                    value: value.is_finite().then_some(value),
                    quality: AlignmentQuality::from_distance(d),
                    jitter_s: d,
                    source_index: Some(idx),
                }
            }
            _ => AlignedPoint::missing(),
        });
    }
    points
}

/// Signed jitter skew: z-score of the mean signed raw−grid offset under a
/// zero-centred normal model of the observed spread. A large score means
/// the BMS clock runs systematically early or late rather than jittering.
fn jitter_skew_score(signed_jitter: &[f64]) -> (f64, Option<String>) {
    if signed_jitter.len() < 30 {
        return (0.0, None);
    }
    let (mean, std) = stats::mean_std(signed_jitter);
    if std < 1e-9 {
        return (0.0, None);
    }
    let z = mean / (std / (signed_jitter.len() as f64).sqrt());
    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    let p_two_sided = 2.0 * (1.0 - normal.cdf(z.abs()));
    let warning = (p_two_sided < 0.01).then(|| {
        format!(
            "systematic clock skew: mean raw-grid offset {:.1}s (z={:.1}, p={:.4})",
            mean, z, p_two_sided
        )
    });
    (z.abs(), warning)
}

/// Run Stage 3.
///
/// `windows` is the approval-reconciled exclusion list (candidates with
/// `approved` already resolved from the sidecar / CLI overrides).
pub fn run(
    dataset: &VerifiedDataset,
    gaps: &GapDataset,
    windows: &[ExclusionWindow],
    stage2: &Stage2Metrics,
    config: &PlantConfig,
) -> Result<(SyncFrame, Stage3Metrics), PipelineError> {
    // Precondition, not a data condition: Stage 1 emits monotonic series.
    for channel in &dataset.channels {
        if stats::check_strictly_increasing(&channel.signal.timestamps).is_err() {
            return Err(PipelineError::Precondition(format!(
                "Stage 3 invoked with non-monotonic timestamps on {}",
                channel.signal.channel
            )));
        }
    }

    let span = dataset
        .channels
        .iter()
        .filter_map(|c| c.signal.time_span())
        .fold(None::<(f64, f64)>, |acc, (a, b)| match acc {
            None => Some((a, b)),
            Some((lo, hi)) => Some((lo.min(a), hi.max(b))),
        });
    let (start, end) = span.ok_or_else(|| {
        PipelineError::Precondition("Stage 3 invoked with no samples in any channel".to_string())
    })?;

    let grid = build_grid(start, end, config.nominal_step_s);
    let mut metrics = Stage3Metrics::default();

    // Per-stream alignment is independent; order is preserved by collect.
    let columns: Vec<AlignedColumn> = dataset
        .channels
        .par_iter()
        .map(|channel| AlignedColumn {
            channel: channel.signal.channel,
            points: align_stream(&grid, &channel.signal.timestamps, &channel.canonical),
        })
        .collect();

    // Channel alignment reports + jitter stats.
    let mut all_signed_jitter: Vec<f64> = Vec::new();
    for (column, channel) in columns.iter().zip(&dataset.channels) {
        let mut report = ChannelAlignmentReport {
            channel: column.channel,
            exact: 0,
            close: 0,
            interp: 0,
            missing: 0,
            mean_jitter_s: 0.0,
            max_jitter_s: 0.0,
        };
        let mut jitter_sum = 0.0;
        let mut jitter_n = 0usize;
        for (point, &g) in column.points.iter().zip(&grid) {
            report.record(point.quality);
            if let Some(idx) = point.source_index {
                jitter_sum += point.jitter_s;
                jitter_n += 1;
                report.max_jitter_s = report.max_jitter_s.max(point.jitter_s);
                if column.channel.is_mandatory() {
                    all_signed_jitter.push(channel.signal.timestamps[idx] - g);
                }
            }
        }
        if jitter_n > 0 {
            report.mean_jitter_s = jitter_sum / jitter_n as f64;
        }
        metrics.channels.push(report);
    }
    let (skew, skew_warning) = jitter_skew_score(&all_signed_jitter);
    metrics.jitter_skew_score = skew;
    if let Some(w) = skew_warning {
        warn!("{}", w);
        metrics.warnings.push(w);
    }

    let approved: Vec<&ExclusionWindow> = windows.iter().filter(|w| w.approved).collect();

    // Row classification over mandatory channels present in the frame.
    let mandatory_columns: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.channel.is_mandatory())
        .map(|(i, _)| i)
        .collect();

    let mut row_class = Vec::with_capacity(grid.len());
    let mut row_confidence = Vec::with_capacity(grid.len());

    for (i, &t) in grid.iter().enumerate() {
        let class = if approved.iter().any(|w| w.contains(t)) {
            RowClassification::Excluded
        } else {
            let mut verdict = RowClassification::Valid;
            for &col in &mandatory_columns {
                let point = &columns[col].points[i];
                match point.source_index {
                    None => {
                        verdict = RowClassification::MajorGap;
                        break;
                    }
                    Some(idx) => {
                        let annotation = gaps
                            .channel(columns[col].channel)
                            .and_then(|c| c.annotations.get(idx));
                        let tainted = annotation.map_or(false, |a| {
                            a.semantic == GapSemantic::SensorAnomaly
                                || a.exclusion_window_id.is_some()
                        });
                        if point.value.is_none() || tainted {
                            verdict = RowClassification::MajorGap;
                            break;
                        }
                    }
                }
            }
            verdict
        };

        let confidence = match class {
            RowClassification::Valid => {
                let sum: f64 = mandatory_columns
                    .iter()
                    .map(|&col| columns[col].points[i].quality.confidence())
                    .sum();
                if mandatory_columns.is_empty() {
                    0.0
                } else {
                    sum / mandatory_columns.len() as f64
                }
            }
            _ => 0.0,
        };

        metrics.count_row(class);
        row_class.push(class);
        row_confidence.push(confidence);
    }

    metrics.valid_fraction = if metrics.rows == 0 {
        0.0
    } else {
        metrics.valid as f64 / metrics.rows as f64
    };
    metrics.mean_row_confidence = if row_confidence.is_empty() {
        0.0
    } else {
        row_confidence.iter().sum::<f64>() / row_confidence.len() as f64
    };

    let tier = CoverageTier::from_valid_fraction(metrics.valid_fraction);
    metrics.coverage_tier = Some(tier);
    metrics.coverage_penalty = tier.penalty();
    metrics.stage_confidence =
        (stage2.stage_confidence + metrics.coverage_penalty).clamp(0.0, 1.0);

    info!(
        rows = metrics.rows,
        valid_pct = 100.0 * metrics.valid_fraction,
        tier = tier.as_str(),
        confidence = metrics.stage_confidence,
        "Synchronised to uniform grid"
    );

    // Coverage HALTs.
    if metrics.rows > 0 && metrics.excluded == metrics.rows {
        return Err(PipelineError::Halt(HaltReason::AllRowsExcluded));
    }
    if metrics.valid_fraction < defaults::COVERAGE_HALT_FLOOR {
        return Err(PipelineError::Halt(HaltReason::LowCoverage {
            valid_pct: 100.0 * metrics.valid_fraction,
        }));
    }

    Ok((
        SyncFrame {
            step_s: config.nominal_step_s,
            grid_times: grid,
            columns,
            row_class,
            row_confidence,
        },
        metrics,
    ))
}
