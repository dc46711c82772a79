//! Stage 2 — gap detection on raw timestamps
//!
//! Runs before synchronisation so COV semantics survive: a six-hour gap
//! with an unchanged value is a quiet sensor, not a broken one. Each
//! interval is classified by size against the nominal step, and gaps get
//! a semantic from the values on either side — with a co-located physics
//! violation forcing SensorAnomaly regardless of magnitude.
//!
//! The jump threshold applies in the value's own canonical scale: °C for
//! temperatures, normalised fraction for everything else.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{defaults, PlantConfig};
use crate::types::{
    ChannelGapReport, ChannelKind, ExclusionWindow, GapAnnotation, GapClass, GapSemantic,
    Stage1Metrics, Stage2Metrics,
};

use super::verify::{VerifiedDataset, VerifiedSignal};

/// Per-channel gap annotations, parallel to the channel's raw series.
#[derive(Debug, Clone)]
pub struct ChannelGaps {
    pub channel: ChannelKind,
    pub annotations: Vec<GapAnnotation>,
}

/// Stage 2 output.
#[derive(Debug, Clone)]
pub struct GapDataset {
    pub channels: Vec<ChannelGaps>,
    pub exclusion_candidates: Vec<ExclusionWindow>,
}

impl GapDataset {
    pub fn channel(&self, kind: ChannelKind) -> Option<&ChannelGaps> {
        self.channels.iter().find(|c| c.channel == kind)
    }
}

/// Classify one interval length against the nominal step.
pub fn classify_interval(dt_s: f64, step_s: f64) -> GapClass {
    if dt_s <= defaults::GAP_MINOR_FACTOR * step_s {
        GapClass::Normal
    } else if dt_s <= defaults::GAP_MAJOR_FACTOR * step_s {
        GapClass::MinorGap
    } else {
        GapClass::MajorGap
    }
}

/// Decide the semantic of a MinorGap/MajorGap from the values around it.
pub fn gap_semantic(before: f64, after: f64, physics_violation: bool) -> (GapSemantic, f64) {
    if physics_violation {
        let rel = relative_change_pct(before, after);
        return (GapSemantic::SensorAnomaly, rel);
    }
    if !before.is_finite() || !after.is_finite() {
        return (GapSemantic::Unknown, 0.0);
    }
    let rel = relative_change_pct(before, after);
    if (after - before).abs() > defaults::GAP_JUMP_ABS {
        (GapSemantic::SensorAnomaly, rel)
    } else if rel < defaults::GAP_COV_REL_PCT {
        (GapSemantic::CovConstant, rel)
    } else {
        (GapSemantic::CovMinor, rel)
    }
}

fn relative_change_pct(before: f64, after: f64) -> f64 {
    if !before.is_finite() || !after.is_finite() {
        return 0.0;
    }
    if before == 0.0 {
        return if after == 0.0 { 0.0 } else { 100.0 };
    }
    100.0 * (after - before).abs() / before.abs()
}

fn penalty_for(semantic: GapSemantic) -> f64 {
    match semantic {
        GapSemantic::NotApplicable => 0.0,
        GapSemantic::CovConstant => defaults::PENALTY_COV_CONSTANT,
        GapSemantic::CovMinor => defaults::PENALTY_COV_MINOR,
        GapSemantic::SensorAnomaly => defaults::PENALTY_SENSOR_ANOMALY,
        GapSemantic::Unknown => defaults::PENALTY_GAP_UNKNOWN,
    }
}

/// Series used for gap-value semantics: canonical °C for temperatures,
/// normalised fraction for everything else.
fn gap_values(channel: &VerifiedSignal) -> &[f64] {
    if channel.signal.channel.is_temperature() || channel.normalised.is_empty() {
        &channel.canonical
    } else {
        &channel.normalised
    }
}

/// Annotate one channel's intervals.
fn scan_channel(channel: &VerifiedSignal, step_s: f64) -> ChannelGaps {
    let ts = &channel.signal.timestamps;
    let values = gap_values(channel);
    let mut annotations = Vec::with_capacity(ts.len());

    // Sample 0 has no prior interval.
    if !ts.is_empty() {
        annotations.push(GapAnnotation::default());
    }

    for i in 1..ts.len() {
        let dt = ts[i] - ts[i - 1];
        let class = classify_interval(dt, step_s);
        let (semantic, rel_pct) = if class == GapClass::Normal {
            (GapSemantic::NotApplicable, relative_change_pct(values[i - 1], values[i]))
        } else {
            let violation =
                channel.physics.violation_mask[i - 1] || channel.physics.violation_mask[i];
            gap_semantic(values[i - 1], values[i], violation)
        };
        annotations.push(GapAnnotation {
            duration_s: dt,
            class,
            semantic,
            penalty: penalty_for(semantic),
            value_change_rel_pct: rel_pct,
            exclusion_window_id: None,
        });
    }

    ChannelGaps {
        channel: channel.signal.channel,
        annotations,
    }
}

/// A long MajorGap on one mandatory channel.
#[derive(Debug, Clone, Copy)]
struct LongGap {
    channel: ChannelKind,
    start_s: f64,
    end_s: f64,
    /// Index of the annotation (sample after the gap)
    annotation_idx: usize,
}

/// Find candidate exclusion windows: MajorGaps of ≥ 8 hours overlapping on
/// ≥ 2 mandatory channels, overlapping regions unioned into windows.
fn find_exclusion_candidates(
    dataset: &VerifiedDataset,
    gaps: &mut [ChannelGaps],
) -> Vec<ExclusionWindow> {
    let min_s = defaults::EXCLUSION_MIN_HOURS * 3600.0;

    let mut long_gaps: Vec<LongGap> = Vec::new();
    for channel in &dataset.channels {
        if !channel.signal.channel.is_mandatory() {
            continue;
        }
        let ts = &channel.signal.timestamps;
        for i in 1..ts.len() {
            let dt = ts[i] - ts[i - 1];
            // A gap this long is a MajorGap under any sane nominal step.
            if dt >= min_s {
                long_gaps.push(LongGap {
                    channel: channel.signal.channel,
                    start_s: ts[i - 1],
                    end_s: ts[i],
                    annotation_idx: i,
                });
            }
        }
    }

    // Overlapping regions between gaps of different channels.
    let mut regions: Vec<(f64, f64)> = Vec::new();
    for (a_idx, a) in long_gaps.iter().enumerate() {
        for b in long_gaps.iter().skip(a_idx + 1) {
            if a.channel == b.channel {
                continue;
            }
            let start = a.start_s.max(b.start_s);
            let end = a.end_s.min(b.end_s);
            if start < end {
                regions.push((start, end));
            }
        }
    }
    if regions.is_empty() {
        return Vec::new();
    }

    // Union overlapping regions.
    regions.sort_by(|x, y| x.0.partial_cmp(&y.0).expect("finite region bounds"));
    let mut merged: Vec<(f64, f64)> = vec![regions[0]];
    for &(start, end) in &regions[1..] {
        let last = merged.last_mut().expect("non-empty");
        if start <= last.1 {
            last.1 = last.1.max(end);
        } else {
            merged.push((start, end));
        }
    }

    let mut windows = Vec::new();
    for (start, end) in merged {
        let affected: Vec<ChannelKind> = {
            let mut channels: Vec<ChannelKind> = long_gaps
                .iter()
                .filter(|g| g.start_s <= end && start <= g.end_s)
                .map(|g| g.channel)
                .collect();
            channels.sort_by_key(|c| c.short_code());
            channels.dedup();
            channels
        };
        let window = ExclusionWindow {
            id: ExclusionWindow::stable_id(start, end),
            start_s: start,
            end_s: end,
            duration_hours: (end - start) / 3600.0,
            affected_channels: affected,
            approved: false,
        };
        info!(
            id = %window.id,
            hours = window.duration_hours,
            channels = ?window.affected_channels,
            "Exclusion window candidate"
        );

        // Tag the participating gap annotations with the window id and
        // re-charge them at the Excluded rate.
        for gap in &long_gaps {
            if gap.start_s <= end && start <= gap.end_s {
                if let Some(channel_gaps) = gaps.iter_mut().find(|c| c.channel == gap.channel) {
                    let annotation = &mut channel_gaps.annotations[gap.annotation_idx];
                    annotation.exclusion_window_id = Some(window.id.clone());
                    annotation.penalty = defaults::PENALTY_EXCLUDED;
                }
            }
        }
        windows.push(window);
    }
    windows
}

/// Run Stage 2 over the verified dataset.
pub fn run(
    dataset: &VerifiedDataset,
    stage1: &Stage1Metrics,
    config: &PlantConfig,
) -> (GapDataset, Stage2Metrics) {
    let step = config.nominal_step_s;

    let mut channel_gaps: Vec<ChannelGaps> = dataset
        .channels
        .par_iter()
        .map(|channel| scan_channel(channel, step))
        .collect();

    let exclusion_candidates = find_exclusion_candidates(dataset, &mut channel_gaps);

    let mut metrics = Stage2Metrics {
        exclusion_candidates: exclusion_candidates.clone(),
        ..Default::default()
    };

    let mut mandatory_penalties = Vec::new();
    for gaps in &channel_gaps {
        let stage1_confidence = stage1
            .channels
            .iter()
            .find(|c| c.channel == gaps.channel)
            .map(|c| c.confidence)
            .unwrap_or(1.0);

        let mut report = ChannelGapReport {
            channel: gaps.channel,
            intervals: 0,
            normal: 0,
            minor_gaps: 0,
            major_gaps: 0,
            cov_constant: 0,
            cov_minor: 0,
            sensor_anomalies: 0,
            unknown: 0,
            penalty: 0.0,
            confidence: stage1_confidence,
            warnings: Vec::new(),
        };
        for annotation in gaps.annotations.iter().skip(1) {
            report.record(annotation.class, annotation.semantic);
            report.penalty += annotation.penalty;
        }
        report.confidence = (stage1_confidence + report.penalty).clamp(0.0, 1.0);

        if report.sensor_anomalies > 0 {
            report.warnings.push(format!(
                "{}: {} gap(s) judged sensor anomalies",
                gaps.channel, report.sensor_anomalies
            ));
        }
        debug!(
            channel = %gaps.channel,
            minor = report.minor_gaps,
            major = report.major_gaps,
            penalty = report.penalty,
            "Gap scan"
        );

        if gaps.channel.is_mandatory() {
            mandatory_penalties.push(report.penalty);
        }
        metrics.channels.push(report);
    }

    metrics.stage_penalty = if mandatory_penalties.is_empty() {
        0.0
    } else {
        mandatory_penalties.iter().sum::<f64>() / mandatory_penalties.len() as f64
    };
    metrics.stage_confidence =
        (stage1.stage_confidence + metrics.stage_penalty).clamp(0.0, 1.0);

    if !exclusion_candidates.is_empty() {
        metrics.warnings.push(format!(
            "{} exclusion window candidate(s) pending approval",
            exclusion_candidates.len()
        ));
    }

    (
        GapDataset {
            channels: channel_gaps,
            exclusion_candidates,
        },
        metrics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signal;

    fn make_verified(
        channel: ChannelKind,
        ts: Vec<f64>,
        canonical: Vec<f64>,
    ) -> VerifiedSignal {
        let n = ts.len();
        let signal = Signal {
            channel,
            equipment_id: "CH1".to_string(),
            source_file: "test.csv".to_string(),
            vendor_hint: None,
            reported_unit: None,
            timestamps: ts,
            values: canonical.clone(),
        };
        VerifiedSignal {
            stats: signal.raw_stats(),
            decode: super::super::decode::decode(&signal.raw_stats()),
            normalised: Vec::new(),
            unit: crate::types::UnitDecision::identity(
                crate::types::CanonicalUnit::TemperatureC,
                crate::types::SourceUnit::Celsius,
            ),
            canonical,
            unit_confidence: 1.0,
            physics: super::super::physics::check_ranges(
                channel,
                crate::types::CanonicalUnit::Dimensionless,
                &signal.timestamps,
                &signal.values,
            )
            .unwrap(),
            confidence: 1.0,
            warnings: Vec::new(),
            signal,
        }
    }

    #[test]
    fn test_interval_classes() {
        assert_eq!(classify_interval(900.0, 900.0), GapClass::Normal);
        assert_eq!(classify_interval(1_350.0, 900.0), GapClass::Normal);
        assert_eq!(classify_interval(1_351.0, 900.0), GapClass::MinorGap);
        assert_eq!(classify_interval(3_600.0, 900.0), GapClass::MinorGap);
        assert_eq!(classify_interval(3_601.0, 900.0), GapClass::MajorGap);
    }

    #[test]
    fn test_semantics() {
        // Constant across the gap
        let (semantic, rel) = gap_semantic(21.0, 21.0, false);
        assert_eq!(semantic, GapSemantic::CovConstant);
        assert_eq!(rel, 0.0);

        // Small drift
        let (semantic, _) = gap_semantic(21.0, 21.5, false);
        assert_eq!(semantic, GapSemantic::CovMinor);

        // Hard jump
        let (semantic, _) = gap_semantic(7.0, 15.0, false);
        assert_eq!(semantic, GapSemantic::SensorAnomaly);

        // Physics violation overrides magnitude
        let (semantic, _) = gap_semantic(21.0, 21.0, true);
        assert_eq!(semantic, GapSemantic::SensorAnomaly);

        // Missing neighbours
        let (semantic, _) = gap_semantic(f64::NAN, 21.0, false);
        assert_eq!(semantic, GapSemantic::Unknown);
    }

    #[test]
    fn test_cov_stream_scenario() {
        // CHWST at 00:00, 00:15, 02:00 — intervals [900, 6300] with a
        // small drift across the big gap.
        let channel = make_verified(
            ChannelKind::Chwst,
            vec![0.0, 900.0, 7_200.0],
            vec![70.0, 70.0, 71.5],
        );
        let gaps = scan_channel(&channel, 900.0);
        assert_eq!(gaps.annotations.len(), 3);
        assert_eq!(gaps.annotations[1].class, GapClass::Normal);
        assert_eq!(gaps.annotations[2].class, GapClass::MajorGap);
        assert_eq!(gaps.annotations[2].duration_s, 6_300.0);
        assert_eq!(gaps.annotations[2].semantic, GapSemantic::CovMinor);
        assert!(
            (gaps.annotations[2].value_change_rel_pct - 2.142857).abs() < 1e-3,
            "relative change ≈ 2.1%, got {}",
            gaps.annotations[2].value_change_rel_pct
        );
    }

    #[test]
    fn test_no_major_gaps_on_regular_cadence() {
        let ts: Vec<f64> = (0..100).map(|i| i as f64 * 900.0).collect();
        let values = vec![7.0; 100];
        let channel = make_verified(ChannelKind::Chwst, ts, values);
        let gaps = scan_channel(&channel, 900.0);
        assert!(gaps
            .annotations
            .iter()
            .all(|a| a.class != GapClass::MajorGap));
    }

    #[test]
    fn test_gap_counts_stable_under_refill() {
        // Re-running the scan after filling gap interiors with Normal
        // cadence samples leaves the MinorGap/MajorGap tallies unchanged
        // for the surviving gaps (none — they are all filled).
        let ts = vec![0.0, 900.0, 7_200.0, 8_100.0];
        let values = vec![7.0, 7.0, 7.1, 7.1];
        let channel = make_verified(ChannelKind::Chwst, ts, values);
        let first = scan_channel(&channel, 900.0);
        let majors_first = first
            .annotations
            .iter()
            .filter(|a| a.class == GapClass::MajorGap)
            .count();
        assert_eq!(majors_first, 1);

        // Fill the 900→7200 hole at nominal cadence.
        let mut filled_ts = vec![0.0, 900.0];
        let mut t = 1_800.0;
        while t < 7_200.0 {
            filled_ts.push(t);
            t += 900.0;
        }
        filled_ts.extend([7_200.0, 8_100.0]);
        let filled_values = vec![7.0; filled_ts.len()];
        let channel = make_verified(ChannelKind::Chwst, filled_ts, filled_values);
        let second = scan_channel(&channel, 900.0);
        assert!(second
            .annotations
            .iter()
            .all(|a| a.class == GapClass::Normal || a.duration_s == 0.0));
    }

    fn dataset_with(channels: Vec<VerifiedSignal>) -> VerifiedDataset {
        let reference_ts = channels
            .iter()
            .find(|c| c.signal.channel == ChannelKind::Chwst)
            .map(|c| c.signal.timestamps.clone())
            .unwrap_or_default();
        let states = vec![crate::types::OperationalState::Active; reference_ts.len()];
        VerifiedDataset {
            channels,
            reference_ts,
            states,
            reversal: None,
            state_filtered: false,
        }
    }

    #[test]
    fn test_exclusion_candidate_from_common_nine_hour_gap() {
        // Both temperature streams silent from t=3600 for nine hours.
        let gap_start = 3_600.0;
        let gap_end = gap_start + 9.0 * 3_600.0;
        let build_ts = |before: usize, after: usize| {
            let mut ts: Vec<f64> = (0..=before).map(|i| i as f64 * 900.0).collect();
            for i in 0..after {
                ts.push(gap_end + i as f64 * 900.0);
            }
            ts
        };
        let chwst_ts = build_ts(4, 4);
        let chwrt_ts = build_ts(4, 4);
        let chwst_vals = vec![7.0; chwst_ts.len()];
        let chwrt_vals = vec![12.0; chwrt_ts.len()];

        let dataset = dataset_with(vec![
            make_verified(ChannelKind::Chwst, chwst_ts, chwst_vals),
            make_verified(ChannelKind::Chwrt, chwrt_ts, chwrt_vals),
        ]);
        let stage1 = Stage1Metrics {
            stage_confidence: 1.0,
            ..Default::default()
        };
        let (gap_dataset, metrics) = run(&dataset, &stage1, &PlantConfig::default());

        assert_eq!(metrics.exclusion_candidates.len(), 1);
        let window = &metrics.exclusion_candidates[0];
        assert!((window.duration_hours - 9.0).abs() < 1e-9);
        assert_eq!(
            window.affected_channels,
            vec![ChannelKind::Chwrt, ChannelKind::Chwst]
        );
        assert!(!window.approved);

        // The participating annotations carry the window id and the
        // Excluded penalty.
        let chwst_gaps = gap_dataset.channel(ChannelKind::Chwst).unwrap();
        let tagged = chwst_gaps
            .annotations
            .iter()
            .find(|a| a.exclusion_window_id.is_some())
            .expect("tagged annotation");
        assert_eq!(tagged.penalty, defaults::PENALTY_EXCLUDED);
    }

    #[test]
    fn test_stage_penalty_is_mean_of_mandatory() {
        let chwst = make_verified(
            ChannelKind::Chwst,
            vec![0.0, 900.0, 7_200.0],
            vec![7.0, 7.0, 7.2],
        );
        let chwrt = make_verified(
            ChannelKind::Chwrt,
            (0..9).map(|i| i as f64 * 900.0).collect(),
            vec![12.0; 9],
        );
        let dataset = dataset_with(vec![chwst, chwrt]);
        let stage1 = Stage1Metrics {
            stage_confidence: 0.98,
            ..Default::default()
        };
        let (_, metrics) = run(&dataset, &stage1, &PlantConfig::default());

        // CHWST has one CovMinor major gap (−0.02); CHWRT is clean.
        assert!((metrics.stage_penalty - (-0.01)).abs() < 1e-9);
        assert!((metrics.stage_confidence - 0.97).abs() < 1e-9);
    }
}
