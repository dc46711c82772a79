//! Stage 4 — derived quantities
//!
//! Computes ΔT, lift, cooling load Q, COP and its Carnot-normalised form,
//! hunting rate, and fouling indicators over the synchronised frame. No
//! HALT lives here: a missing input degrades its row into Missing cells
//! with zeroed component confidences.

use tracing::info;

use crate::config::{defaults, PlantConfig};
use crate::types::{
    ChannelKind, FoulingSummary, RowClassification, Stage4Metrics, SyncFrame,
};

// ============================================================================
// Result Types
// ============================================================================

/// Hunting severity over the trailing 24-hour window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HuntSeverity {
    /// Fewer reversals than 0.2 cycles/hour
    None,
    /// 0.2–1.0 cycles/hour
    Minor,
    /// ≥ 1.0 cycles/hour
    Major,
    /// Window not yet filled or too sparse to judge
    Insufficient,
}

impl HuntSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Insufficient => "INSUFFICIENT",
        }
    }
}

/// Interpretation band for the Carnot-normalised COP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EfficiencyBand {
    /// Normalised COP below 0.3
    Inefficient,
    /// 0.3–0.5, where real chillers live
    Typical,
    /// Above 0.5 — usually a measurement error, flagged as implausible
    Exceptional,
}

impl EfficiencyBand {
    pub fn from_normalized_cop(n: f64) -> Self {
        if n < defaults::NORM_COP_TYPICAL_MIN {
            Self::Inefficient
        } else if n <= defaults::NORM_COP_EXCEPTIONAL_MIN {
            Self::Typical
        } else {
            Self::Exceptional
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inefficient => "INEFFICIENT",
            Self::Typical => "TYPICAL",
            Self::Exceptional => "EXCEPTIONAL",
        }
    }
}

/// Columnar derived output, parallel to the grid.
#[derive(Debug, Clone, Default)]
pub struct DerivedFrame {
    pub delta_t_k: Vec<Option<f64>>,
    pub lift_k: Vec<Option<f64>>,
    pub q_kw: Vec<Option<f64>>,
    pub cop: Vec<Option<f64>>,
    pub cop_carnot: Vec<Option<f64>>,
    pub normalized_cop: Vec<Option<f64>>,
    pub efficiency_band: Vec<Option<EfficiencyBand>>,
    /// Evaporator heat-transfer proxy Q/ΔT (kW/K)
    pub ufoa_kw_per_k: Vec<Option<f64>>,
    pub hunt_rate_per_hour: Vec<Option<f64>>,
    pub hunt_severity: Vec<HuntSeverity>,
    pub hunt_confidence: Vec<f64>,
    pub q_confidence: Vec<f64>,
    pub cop_confidence: Vec<f64>,
}

// ============================================================================
// Hunting Detection
// ============================================================================

/// Rows at which a significant sign reversal of consecutive CHWST
/// differences completes.
fn reversal_rows(grid_chwst: &[Option<f64>]) -> Vec<usize> {
    // Differences between consecutive *present* samples.
    let mut prev: Option<(usize, f64)> = None; // (row, value)
    let mut last_significant: Option<f64> = None;
    let mut reversals = Vec::new();

    for (row, value) in grid_chwst.iter().enumerate() {
        let Some(v) = value else { continue };
        if let Some((_, pv)) = prev {
            let diff = v - pv;
            if diff.abs() >= defaults::HUNT_AMPLITUDE_C {
                if let Some(prev_diff) = last_significant {
                    if diff.signum() != prev_diff.signum() {
                        reversals.push(row);
                    }
                }
                last_significant = Some(diff);
            }
        }
        prev = Some((row, *v));
    }
    reversals
}

/// Hunting classification per row over the trailing 24-hour window.
fn hunting_columns(
    grid_chwst: &[Option<f64>],
    step_s: f64,
) -> (Vec<Option<f64>>, Vec<HuntSeverity>, Vec<f64>) {
    let n = grid_chwst.len();
    let window_rows = ((defaults::HUNT_WINDOW_HOURS * 3600.0) / step_s).round() as usize;
    let window_hours = defaults::HUNT_WINDOW_HOURS;

    let reversals = reversal_rows(grid_chwst);

    // Prefix counts of reversals and of present samples.
    let mut reversal_prefix = vec![0usize; n + 1];
    let mut present_prefix = vec![0usize; n + 1];
    let mut r = 0usize;
    for i in 0..n {
        while r < reversals.len() && reversals[r] == i {
            r += 1;
        }
        reversal_prefix[i + 1] = r;
        present_prefix[i + 1] = present_prefix[i] + grid_chwst[i].is_some() as usize;
    }

    let mut rates = Vec::with_capacity(n);
    let mut severities = Vec::with_capacity(n);
    let mut confidences = Vec::with_capacity(n);

    for i in 0..n {
        if i + 1 < window_rows {
            rates.push(None);
            severities.push(HuntSeverity::Insufficient);
            confidences.push(0.0);
            continue;
        }
        let lo = i + 1 - window_rows;
        let present = present_prefix[i + 1] - present_prefix[lo];
        if present * 2 < window_rows {
            rates.push(None);
            severities.push(HuntSeverity::Insufficient);
            confidences.push(0.0);
            continue;
        }
        let count = reversal_prefix[i + 1] - reversal_prefix[lo];
        let rate = count as f64 / window_hours;
        let severity = if rate >= defaults::HUNT_MAJOR_RATE {
            HuntSeverity::Major
        } else if rate >= defaults::HUNT_MINOR_RATE {
            HuntSeverity::Minor
        } else {
            HuntSeverity::None
        };
        let confidence = if count >= defaults::HUNT_MIN_REVERSALS || count == 0 {
            defaults::HUNT_CONFIDENCE_DETECTED
        } else {
            defaults::HUNT_CONFIDENCE_BORDERLINE
        };
        rates.push(Some(rate));
        severities.push(severity);
        confidences.push(confidence);
    }

    (rates, severities, confidences)
}

// ============================================================================
// Fouling Analysis
// ============================================================================

/// Mean of the Some() values inside a row range.
fn mean_present(values: &[Option<f64>], range: std::ops::Range<usize>) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values[range].iter().flatten() {
        sum += v;
        n += 1;
    }
    (n > 0).then(|| sum / n as f64)
}

fn severity_label(pct: f64, minor: f64, major: f64, clean: &str) -> String {
    if pct > major {
        "MAJOR_FOULING".to_string()
    } else if pct > minor {
        "MINOR_FOULING".to_string()
    } else {
        clean.to_string()
    }
}

/// Fouling summary: evaporator UFOA degradation and condenser lift creep
/// against a design or first-week baseline.
fn fouling_summary(
    frame: &SyncFrame,
    ufoa: &[Option<f64>],
    lift: &[Option<f64>],
    config: &PlantConfig,
) -> Option<FoulingSummary> {
    let n = frame.len();
    if n == 0 {
        return None;
    }
    let span_s = frame.grid_times[n - 1] - frame.grid_times[0];
    let span_days = span_s / 86_400.0;

    let week_rows = ((defaults::FOULING_MIN_OBS_DAYS * 86_400.0) / frame.step_s) as usize;
    let baseline_rows = week_rows.min(n);

    let (ufoa_baseline, baseline_source) = match config.design_ufoa_kw_per_k {
        Some(design) if design > 0.0 => (Some(design), "design"),
        _ => (mean_present(ufoa, 0..baseline_rows), "first_week_average"),
    };
    let lift_baseline = mean_present(lift, 0..baseline_rows)?;
    let ufoa_baseline = ufoa_baseline?;

    // Compare the trailing week (or everything after the baseline window).
    let tail_start = n.saturating_sub(week_rows).max(baseline_rows.min(n - 1));
    let ufoa_current = mean_present(ufoa, tail_start..n)?;
    let lift_current = mean_present(lift, tail_start..n)?;

    let evap_degradation_pct = if ufoa_baseline > 0.0 {
        100.0 * (ufoa_baseline - ufoa_current) / ufoa_baseline
    } else {
        0.0
    };
    let cond_increase_pct = if lift_baseline > 0.0 {
        100.0 * (lift_current - lift_baseline) / lift_baseline
    } else {
        0.0
    };

    let mut confidence = defaults::FOULING_BASE_CONFIDENCE;
    if span_days < defaults::FOULING_MIN_OBS_DAYS {
        confidence -= defaults::FOULING_SHORT_OBS_PENALTY;
    }
    // Further adverse factors: a data-derived baseline, and a thin sample.
    if baseline_source == "first_week_average" {
        confidence -= defaults::FOULING_ADVERSE_FACTOR_PENALTY;
    }
    let ufoa_samples = ufoa.iter().flatten().count();
    if ufoa_samples < 200 {
        confidence -= defaults::FOULING_ADVERSE_FACTOR_PENALTY;
    }
    confidence = confidence.max(0.0);

    Some(FoulingSummary {
        baseline_source: baseline_source.to_string(),
        evaporator_severity: severity_label(
            evap_degradation_pct,
            defaults::EVAP_FOULING_MINOR_PCT,
            defaults::EVAP_FOULING_MAJOR_PCT,
            "CLEAN",
        ),
        evaporator_degradation_pct: evap_degradation_pct,
        condenser_severity: severity_label(
            cond_increase_pct,
            defaults::COND_FOULING_MINOR_PCT,
            defaults::COND_FOULING_MAJOR_PCT,
            "CLEAN",
        ),
        condenser_lift_increase_pct: cond_increase_pct,
        confidence,
    })
}

// ============================================================================
// Stage Runner
// ============================================================================

/// Run Stage 4 over the synchronised frame.
///
/// `power_in_kw` tells whether the power column carries physical kW (a
/// dimensionless counts channel with no nameplate cannot yield a COP).
pub fn run(frame: &SyncFrame, power_in_kw: bool, config: &PlantConfig) -> (DerivedFrame, Stage4Metrics) {
    let n = frame.len();
    let mut derived = DerivedFrame::default();
    let mut metrics = Stage4Metrics {
        rows: n,
        ..Default::default()
    };

    let chwst: Vec<Option<f64>> = column_values(frame, ChannelKind::Chwst, n);
    let chwrt: Vec<Option<f64>> = column_values(frame, ChannelKind::Chwrt, n);
    let cdwrt: Vec<Option<f64>> = column_values(frame, ChannelKind::Cdwrt, n);
    let flow: Vec<Option<f64>> = column_values(frame, ChannelKind::Flow, n);
    let power: Vec<Option<f64>> = column_values(frame, ChannelKind::Power, n);

    let power_is_kw = power_in_kw && power.iter().any(|p| p.is_some());

    let mut q_conf_sum = 0.0;
    let mut cop_conf_sum = 0.0;
    let mut q_sum = 0.0;
    let mut cop_sum = 0.0;
    let mut norm_cop_sum = 0.0;
    let mut norm_cop_n = 0usize;

    for i in 0..n {
        let row_conf = frame.row_confidence[i];
        let excluded = frame.row_class[i] == RowClassification::Excluded;

        // ΔT and lift need their two temperatures only.
        let delta_t = match (chwrt[i], chwst[i]) {
            (Some(r), Some(s)) if !excluded => Some(r - s),
            _ => None,
        };
        let lift = match (cdwrt[i], chwst[i]) {
            (Some(c), Some(s)) if !excluded => Some(c - s),
            _ => None,
        };
        derived.delta_t_k.push(delta_t);
        derived.lift_k.push(lift);

        // Q with its component confidence.
        let mut q_penalties = 0.0;
        let q = match (flow[i], delta_t) {
            (Some(f), Some(dt)) if f > 0.0 && dt > 0.0 => {
                if dt < defaults::DELTA_T_LOW_K {
                    q_penalties += defaults::PENALTY_Q_DELTA_T_LOW;
                }
                if dt > defaults::DELTA_T_HIGH_K {
                    q_penalties += defaults::PENALTY_Q_DELTA_T_HIGH;
                }
                Some(f * defaults::WATER_DENSITY * defaults::WATER_CP * dt)
            }
            (flow_v, dt) => {
                if flow_v.is_none() {
                    q_penalties += defaults::PENALTY_Q_FLOW_MISSING;
                }
                if dt.map_or(true, |d| d <= 0.0) {
                    q_penalties += defaults::PENALTY_Q_DELTA_T_INVALID;
                }
                None
            }
        };
        let q_conf = if q.is_some() {
            row_conf * (1.0 - q_penalties).max(0.0)
        } else {
            0.0
        };
        derived.ufoa_kw_per_k.push(match (q, delta_t) {
            (Some(q_v), Some(dt)) if dt > 0.0 => Some(q_v / dt),
            _ => None,
        });
        derived.q_kw.push(q);
        derived.q_confidence.push(q_conf);
        if let Some(q_v) = q {
            metrics.q_valid += 1;
            q_sum += q_v;
        }
        q_conf_sum += q_conf;

        // COP against its plausibility window.
        let mut cop_penalties = 0.0;
        let mut cop = None;
        match (q, power[i]) {
            (Some(q_v), Some(p)) if p > 0.0 && power_is_kw => {
                let raw_cop = q_v / p;
                if (defaults::COP_MIN..=defaults::COP_MAX).contains(&raw_cop) {
                    cop = Some(raw_cop);
                } else {
                    cop_penalties += defaults::PENALTY_COP_OUT_OF_RANGE;
                    metrics.cop_out_of_range += 1;
                }
            }
            _ => {
                cop_penalties += defaults::PENALTY_COP_POWER_MISSING;
            }
        }

        // Carnot baseline and normalised COP.
        let carnot = match (chwst[i], lift) {
            (Some(s), Some(l)) if l > 0.0 => Some((s + 273.15) / l),
            _ => None,
        };
        let normalized = match (cop, carnot) {
            (Some(c), Some(cc)) if cc > 0.0 => Some(c / cc),
            _ => None,
        };
        if let Some(nc) = normalized {
            if nc > defaults::NORM_COP_EXCEPTIONAL_MIN {
                cop_penalties += defaults::PENALTY_COP_NORM_IMPLAUSIBLE;
            }
            norm_cop_sum += nc;
            norm_cop_n += 1;
        }
        derived.cop_carnot.push(carnot);
        derived.normalized_cop.push(normalized);
        derived
            .efficiency_band
            .push(normalized.map(EfficiencyBand::from_normalized_cop));

        let power_conf = (1.0 - cop_penalties).max(0.0);
        let cop_conf = if cop.is_some() { q_conf * power_conf } else { 0.0 };
        derived.cop.push(cop);
        derived.cop_confidence.push(cop_conf);
        if let Some(c) = cop {
            metrics.cop_valid += 1;
            cop_sum += c;
        }
        cop_conf_sum += cop_conf;
    }

    // Hunting on the gridded CHWST column.
    let (rates, severities, confidences) = hunting_columns(&chwst, frame.step_s);
    for severity in &severities {
        match severity {
            HuntSeverity::None => metrics.hunting.none += 1,
            HuntSeverity::Minor => metrics.hunting.minor += 1,
            HuntSeverity::Major => metrics.hunting.major += 1,
            HuntSeverity::Insufficient => metrics.hunting.insufficient += 1,
        }
    }
    derived.hunt_rate_per_hour = rates;
    derived.hunt_severity = severities;
    derived.hunt_confidence = confidences;

    metrics.fouling = fouling_summary(frame, &derived.ufoa_kw_per_k, &derived.lift_k, config);

    if metrics.q_valid > 0 {
        metrics.q_mean_kw = q_sum / metrics.q_valid as f64;
    }
    if metrics.cop_valid > 0 {
        metrics.cop_mean = cop_sum / metrics.cop_valid as f64;
    }
    if norm_cop_n > 0 {
        metrics.normalized_cop_mean = norm_cop_sum / norm_cop_n as f64;
    }
    metrics.cop_valid_pct = if n > 0 {
        100.0 * metrics.cop_valid as f64 / n as f64
    } else {
        0.0
    };
    if n > 0 {
        metrics.mean_q_confidence = q_conf_sum / n as f64;
        metrics.mean_cop_confidence = cop_conf_sum / n as f64;
    }

    if !power_is_kw && n > 0 {
        metrics
            .warnings
            .push("power channel absent or non-physical — COP unavailable".to_string());
    }

    info!(
        q_valid = metrics.q_valid,
        q_mean_kw = metrics.q_mean_kw,
        cop_valid_pct = metrics.cop_valid_pct,
        cop_mean = metrics.cop_mean,
        "Derived quantities computed"
    );

    (derived, metrics)
}

/// Extract one channel's aligned values as a dense optional column, taking
/// Stage 3's verdicts (Missing cells stay None).
fn column_values(frame: &SyncFrame, kind: ChannelKind, n: usize) -> Vec<Option<f64>> {
    match frame.column(kind) {
        Some(column) => column.points.iter().map(|p| p.value).collect(),
        None => vec![None; n],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlignedColumn, AlignedPoint, AlignmentQuality};

    /// Frame with perfectly aligned synthetic channels.
    fn make_frame(
        chwst: Vec<f64>,
        chwrt: Vec<f64>,
        cdwrt: Vec<f64>,
        flow: Vec<f64>,
        power: Vec<f64>,
    ) -> SyncFrame {
        let n = chwst.len();
        let step = 900.0;
        let grid_times: Vec<f64> = (0..n).map(|i| i as f64 * step).collect();
        let to_column = |kind, values: Vec<f64>| AlignedColumn {
            channel: kind,
            points: values
                .into_iter()
                .enumerate()
                .map(|(i, v)| AlignedPoint {
                    value: v.is_finite().then_some(v),
                    quality: AlignmentQuality::Exact,
                    jitter_s: 0.0,
                    source_index: Some(i),
                })
                .collect(),
        };
        SyncFrame {
            step_s: step,
            grid_times,
            columns: vec![
                to_column(ChannelKind::Chwst, chwst),
                to_column(ChannelKind::Chwrt, chwrt),
                to_column(ChannelKind::Cdwrt, cdwrt),
                to_column(ChannelKind::Flow, flow),
                to_column(ChannelKind::Power, power),
            ],
            row_class: vec![RowClassification::Valid; n],
            row_confidence: vec![1.0; n],
        }
    }

    #[test]
    fn test_q_and_cop_computation() {
        // ΔT = 5 K, flow = 2.15e-3 m³/s → Q = 2.15e-3·1000·4.186·5 ≈ 45 kW
        let frame = make_frame(
            vec![7.0; 4],
            vec![12.0; 4],
            vec![30.0; 4],
            vec![2.15e-3; 4],
            vec![10.0; 4],
        );
        let (derived, metrics) = run(&frame, true, &PlantConfig::default());

        let q = derived.q_kw[0].expect("Q valid");
        assert!((q - 45.0).abs() < 0.1, "Q ≈ 45 kW, got {}", q);
        let cop = derived.cop[0].expect("COP valid");
        assert!((cop - q / 10.0).abs() < 1e-9);
        assert_eq!(metrics.q_valid, 4);
        assert_eq!(metrics.cop_valid, 4);
        assert!(metrics.mean_q_confidence > 0.9);
    }

    #[test]
    fn test_q_sign_property() {
        // Whenever ΔT ≥ 0 and flow > 0, Q must be non-negative.
        let frame = make_frame(
            vec![7.0, 8.0, 6.0],
            vec![12.0, 8.5, 11.0],
            vec![30.0; 3],
            vec![0.01, 0.02, 0.015],
            vec![50.0; 3],
        );
        let (derived, _) = run(&frame, true, &PlantConfig::default());
        for (q, dt) in derived.q_kw.iter().zip(&derived.delta_t_k) {
            if let (Some(q), Some(dt)) = (q, dt) {
                if *dt >= 0.0 {
                    assert!(*q >= 0.0, "Q must be non-negative for ΔT ≥ 0");
                }
            }
        }
    }

    #[test]
    fn test_cop_out_of_range_degrades_to_missing() {
        // Power tiny → raw COP way above 7 → Missing with zero confidence.
        let frame = make_frame(
            vec![7.0; 3],
            vec![12.0; 3],
            vec![30.0; 3],
            vec![2.15e-3; 3],
            vec![0.5; 3],
        );
        let (derived, metrics) = run(&frame, true, &PlantConfig::default());
        assert!(derived.cop.iter().all(Option::is_none));
        assert!(derived.cop_confidence.iter().all(|c| *c == 0.0));
        assert_eq!(metrics.cop_out_of_range, 3);
        assert_eq!(metrics.cop_valid, 0);
    }

    #[test]
    fn test_missing_flow_degrades_q() {
        let frame = make_frame(
            vec![7.0; 2],
            vec![12.0; 2],
            vec![30.0; 2],
            vec![f64::NAN; 2],
            vec![10.0; 2],
        );
        let (derived, metrics) = run(&frame, true, &PlantConfig::default());
        assert!(derived.q_kw.iter().all(Option::is_none));
        assert!(derived.q_confidence.iter().all(|c| *c == 0.0));
        assert_eq!(metrics.q_valid, 0);
    }

    #[test]
    fn test_low_delta_t_penalised_not_dropped() {
        let frame = make_frame(
            vec![7.0; 2],
            vec![7.5; 2], // ΔT = 0.5 K — valid but penalised
            vec![30.0; 2],
            vec![0.02; 2],
            vec![20.0; 2],
        );
        let (derived, _) = run(&frame, true, &PlantConfig::default());
        assert!(derived.q_kw[0].is_some());
        assert!((derived.q_confidence[0] - 0.9).abs() < 1e-9, "ΔT<1K costs 0.10");
    }

    #[test]
    fn test_carnot_and_band() {
        let frame = make_frame(
            vec![7.0; 2],
            vec![12.0; 2],
            vec![30.0; 2], // Lift = 23 K → Carnot = 280.15/23 ≈ 12.18
            vec![2.15e-3; 2],
            vec![10.0; 2], // COP ≈ 4.5 → normalised ≈ 0.37 → Typical
        );
        let (derived, _) = run(&frame, true, &PlantConfig::default());
        let carnot = derived.cop_carnot[0].expect("carnot");
        assert!((carnot - (7.0 + 273.15) / 23.0).abs() < 1e-9);
        assert_eq!(derived.efficiency_band[0], Some(EfficiencyBand::Typical));
    }

    #[test]
    fn test_hunting_detects_oscillation() {
        // 300 rows of CHWST oscillating ±0.5 °C every step: far beyond
        // 1 cycle/hour.
        let n = 300;
        let chwst: Vec<f64> = (0..n)
            .map(|i| 7.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let frame = make_frame(
            chwst,
            vec![12.0; n],
            vec![30.0; n],
            vec![0.02; n],
            vec![100.0; n],
        );
        let (derived, metrics) = run(&frame, true, &PlantConfig::default());

        // After the 96-row warmup the severity is Major with confident
        // detection.
        assert_eq!(derived.hunt_severity[n - 1], HuntSeverity::Major);
        assert_eq!(derived.hunt_confidence[n - 1], 0.95);
        assert!(metrics.hunting.major > 0);
        assert!(metrics.hunting.insufficient >= 95);
    }

    #[test]
    fn test_hunting_quiet_signal_is_none() {
        let n = 200;
        let chwst: Vec<f64> = (0..n).map(|i| 7.0 + (i as f64 * 0.001)).collect();
        let frame = make_frame(
            chwst,
            vec![12.0; n],
            vec![30.0; n],
            vec![0.02; n],
            vec![100.0; n],
        );
        let (derived, _) = run(&frame, true, &PlantConfig::default());
        assert_eq!(derived.hunt_severity[n - 1], HuntSeverity::None);
        assert_eq!(derived.hunt_confidence[n - 1], 0.95, "confident absence");
    }

    #[test]
    fn test_fouling_summary_with_design_baseline() {
        let n = 100;
        let config = PlantConfig {
            design_ufoa_kw_per_k: Some(12.0),
            ..Default::default()
        };
        // UFOA ≈ 9 kW/K: 25% below design → MAJOR boundary; use 9.5 → ~21% MINOR
        let frame = make_frame(
            vec![7.0; n],
            vec![12.0; n],
            vec![30.0; n],
            vec![2.27e-3; n], // Q ≈ 47.5 kW, ΔT 5 → UFOA ≈ 9.5
            vec![10.0; n],
        );
        let (_, metrics) = run(&frame, true, &config);
        let fouling = metrics.fouling.expect("summary");
        assert_eq!(fouling.baseline_source, "design");
        assert_eq!(fouling.evaporator_severity, "MINOR_FOULING");
        assert!(fouling.evaporator_degradation_pct > 10.0);
        assert!(fouling.confidence > 0.0);
    }
}
