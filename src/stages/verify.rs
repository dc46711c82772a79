//! Stage 1 — decode, convert, classify, validate
//!
//! Runs the four sub-stages in order per channel and assembles the
//! verified dataset handed to Stage 2:
//!
//! 1. Encoding decode (1a) on every channel, normalisation applied to
//!    non-temperature channels
//! 2. Unit verification and conversion (1b); originals are kept beside the
//!    converted series for audit
//! 3. Operational-state classification (1c) on the CHWST reference
//!    timeline
//! 4. Physics validation and sensor-reversal diagnosis (1d)
//!
//! A diagnosed reversal converts the aggregate physics HALT into an
//! Active-rows state filter on everything emitted downstream.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::PlantConfig;
use crate::confidence::weakest_link;
use crate::types::{
    CanonicalUnit, ChannelKind, ChannelVerification, HaltReason, OperationalState, RawStats,
    SensorReversalDiagnosis, Signal, SourceUnit, Stage1Metrics,
};

use super::decode::{self, DecodeOutcome};
use super::op_state::{self, StateInputs};
use super::physics::{self, ChannelPhysics};
use super::units;

/// One channel after Stage 1: original series plus decode, unit, and
/// physics verdicts. Originals and conversions coexist for auditability.
#[derive(Debug, Clone)]
pub struct VerifiedSignal {
    pub signal: Signal,
    pub stats: RawStats,
    pub decode: DecodeOutcome,
    /// Decoder normalisation, applied to non-temperature channels
    /// (empty for temperatures)
    pub normalised: Vec<f64>,
    pub unit: crate::types::UnitDecision,
    /// Values in the canonical unit, same length as the original series
    pub canonical: Vec<f64>,
    pub unit_confidence: f64,
    pub physics: ChannelPhysics,
    /// min(unit, physics)
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// Stage 1 output: verified channels plus the reference-timeline state
/// series and any reversal diagnosis.
#[derive(Debug, Clone)]
pub struct VerifiedDataset {
    pub channels: Vec<VerifiedSignal>,
    /// CHWST timestamps — the reference timeline for states and pairing
    pub reference_ts: Vec<f64>,
    pub states: Vec<OperationalState>,
    pub reversal: Option<SensorReversalDiagnosis>,
    /// True when only Active rows were emitted downstream
    pub state_filtered: bool,
}

impl VerifiedDataset {
    pub fn channel(&self, kind: ChannelKind) -> Option<&VerifiedSignal> {
        self.channels.iter().find(|c| c.signal.channel == kind)
    }
}

/// Decode + unit-convert one signal (sub-stages 1a/1b).
fn verify_channel(signal: Signal, config: &PlantConfig) -> VerifiedSignal {
    let stats = signal.raw_stats();
    let decode_outcome = decode::decode(&stats);

    let normalised = if signal.channel.is_temperature() {
        Vec::new()
    } else {
        decode::normalise(&signal.values, &decode_outcome.decision)
    };

    let unit_outcome = units::verify(
        signal.channel,
        &stats,
        signal.reported_unit.as_deref(),
        &decode_outcome,
        config,
    );

    let canonical: Vec<f64> = if unit_outcome.decision.detected == SourceUnit::NormalizedFraction {
        normalised
            .iter()
            .map(|&n| {
                if n.is_finite() {
                    unit_outcome.decision.factor * n
                } else {
                    f64::NAN
                }
            })
            .collect()
    } else {
        signal
            .values
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    unit_outcome.decision.convert(v)
                } else {
                    f64::NAN
                }
            })
            .collect()
    };

    let samples = signal.len();
    VerifiedSignal {
        signal,
        stats,
        decode: decode_outcome,
        normalised,
        unit: unit_outcome.decision,
        canonical,
        unit_confidence: unit_outcome.confidence,
        physics: ChannelPhysics {
            channel: ChannelKind::Other,
            violation_mask: vec![false; samples],
            violations: 0,
            violation_pct: 0.0,
            confidence: 1.0,
            warnings: Vec::new(),
        },
        confidence: unit_outcome.confidence,
        warnings: unit_outcome.warnings,
    }
}

/// Load series as percent of rated capacity (0–100) for the state
/// classifier. Prefers a dedicated LOAD channel; falls back to power.
fn load_pct_series(channels: &[VerifiedSignal], config: &PlantConfig) -> Option<(Vec<f64>, Vec<f64>)> {
    if let Some(load) = channels.iter().find(|c| c.signal.channel == ChannelKind::Load) {
        if !load.normalised.is_empty() {
            let pct: Vec<f64> = load.normalised.iter().map(|n| n * 100.0).collect();
            return Some((load.signal.timestamps.clone(), pct));
        }
    }
    let power = channels.iter().find(|c| c.signal.channel == ChannelKind::Power)?;
    let pct: Vec<f64> = match (power.unit.canonical, config.nameplate_kw) {
        (CanonicalUnit::PowerKw, Some(nameplate)) if nameplate > 0.0 => power
            .canonical
            .iter()
            .map(|kw| 100.0 * kw / nameplate)
            .collect(),
        _ if !power.normalised.is_empty() => {
            power.normalised.iter().map(|n| n * 100.0).collect()
        }
        _ => {
            // Physical power with no nameplate: scale by its own robust max.
            let p995 = RawStats::compute(&power.canonical).p995;
            if p995 <= 0.0 {
                return None;
            }
            power.canonical.iter().map(|v| 100.0 * v / p995).collect()
        }
    };
    Some((power.signal.timestamps.clone(), pct))
}

/// Flow as a fraction of its own robust max, for the ≈0 test.
fn flow_frac_series(channels: &[VerifiedSignal]) -> Option<(Vec<f64>, Vec<f64>)> {
    let flow = channels.iter().find(|c| c.signal.channel == ChannelKind::Flow)?;
    if !flow.normalised.is_empty() {
        return Some((flow.signal.timestamps.clone(), flow.normalised.clone()));
    }
    let p995 = RawStats::compute(&flow.canonical).p995;
    if p995 <= 0.0 {
        return None;
    }
    let frac = flow.canonical.iter().map(|v| v / p995).collect();
    Some((flow.signal.timestamps.clone(), frac))
}

/// Drop samples that do not pair to an Active reference row.
fn filter_to_active(
    channel: &mut VerifiedSignal,
    reference_ts: &[f64],
    states: &[OperationalState],
    tolerance_s: f64,
) {
    let row_of = op_state::pair_nearest_idx(&channel.signal.timestamps, reference_ts, tolerance_s);
    let keep: Vec<bool> = row_of
        .iter()
        .map(|idx| idx.map_or(false, |row| states[row] == OperationalState::Active))
        .collect();

    let apply = |v: &mut Vec<f64>| {
        let mut i = 0;
        v.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
    };
    apply(&mut channel.signal.timestamps);
    apply(&mut channel.signal.values);
    apply(&mut channel.canonical);
    if !channel.normalised.is_empty() {
        apply(&mut channel.normalised);
    }
    let mut i = 0;
    channel.physics.violation_mask.retain(|_| {
        let k = keep[i];
        i += 1;
        k
    });
}

/// Run Stage 1 over classified signals.
pub fn run(
    signals: Vec<Signal>,
    config: &PlantConfig,
) -> Result<(VerifiedDataset, Stage1Metrics), HaltReason> {
    let mut metrics = Stage1Metrics::default();

    // Missing-temperature BMD check up front: nothing downstream can
    // recover a missing reference or relational channel.
    for kind in [ChannelKind::Chwst, ChannelKind::Chwrt, ChannelKind::Cdwrt] {
        if !signals.iter().any(|s| s.channel == kind) {
            return Err(HaltReason::MissingMandatoryChannel { channel: kind });
        }
    }
    for kind in [ChannelKind::Flow, ChannelKind::Power] {
        if !signals.iter().any(|s| s.channel == kind) {
            metrics.warnings.push(format!(
                "{} channel missing — Q/COP will degrade to Missing",
                kind
            ));
        }
    }

    let (_, profile_warning) = config.resolved_profile();
    if let Some(w) = profile_warning {
        metrics.warnings.push(w);
    }

    // 1a + 1b per channel, in parallel; channel order is preserved.
    let mut channels: Vec<VerifiedSignal> = signals
        .into_par_iter()
        .map(|signal| verify_channel(signal, config))
        .collect();

    // 1c — operational states on the CHWST reference timeline.
    let reference_ts = channels
        .iter()
        .find(|c| c.signal.channel == ChannelKind::Chwst)
        .map(|c| c.signal.timestamps.clone())
        .expect("CHWST presence checked above");
    let pair_tolerance = config.nominal_step_s * 0.5;

    let chwst_canonical = channels
        .iter()
        .find(|c| c.signal.channel == ChannelKind::Chwst)
        .map(|c| c.canonical.clone())
        .expect("CHWST presence checked above");
    let chwrt = channels
        .iter()
        .find(|c| c.signal.channel == ChannelKind::Chwrt)
        .expect("CHWRT presence checked above");
    let delta_t_k: Vec<Option<f64>> = op_state::pair_nearest(
        &reference_ts,
        &chwrt.signal.timestamps,
        &chwrt.canonical,
        pair_tolerance,
    )
    .into_iter()
    .enumerate()
    .map(|(row, ret)| ret.map(|r| r - chwst_canonical[row]).filter(|d| d.is_finite()))
    .collect();

    let load_pct: Vec<Option<f64>> = match load_pct_series(&channels, config) {
        Some((ts, pct)) => op_state::pair_nearest(&reference_ts, &ts, &pct, pair_tolerance),
        None => vec![None; reference_ts.len()],
    };
    let flow_frac: Vec<Option<f64>> = match flow_frac_series(&channels) {
        Some((ts, frac)) => op_state::pair_nearest(&reference_ts, &ts, &frac, pair_tolerance),
        None => vec![None; reference_ts.len()],
    };

    let thresholds = config.state_thresholds();
    let states = op_state::classify_states(
        &StateInputs {
            load_pct,
            delta_t_k,
            flow_frac,
        },
        &thresholds,
    );
    metrics.state_counts = op_state::count_states(&states);

    // 1d — range checks per channel (negative flow/power halt here).
    for channel in channels.iter_mut() {
        let mut physics = physics::check_ranges(
            channel.signal.channel,
            channel.unit.canonical,
            &channel.signal.timestamps,
            &channel.canonical,
        )?;
        physics.channel = channel.signal.channel;
        channel.physics = physics;
    }

    // 1d — relational checks on the reference timeline.
    let (chwrt_ts, chwrt_canon) = {
        let c = channels
            .iter()
            .find(|c| c.signal.channel == ChannelKind::Chwrt)
            .expect("checked");
        (c.signal.timestamps.clone(), c.canonical.clone())
    };
    let (cdwrt_ts, cdwrt_canon) = {
        let c = channels
            .iter()
            .find(|c| c.signal.channel == ChannelKind::Cdwrt)
            .expect("checked");
        (c.signal.timestamps.clone(), c.canonical.clone())
    };

    let relational = physics::relational_checks(
        &reference_ts,
        &chwst_canonical,
        &chwrt_ts,
        &chwrt_canon,
        &cdwrt_ts,
        &cdwrt_canon,
        pair_tolerance,
    );
    let verdict = physics::evaluate_relations(relational, &states, config)?;

    metrics.return_supply_compliance_pct = verdict.outcome.return_supply_compliance_pct;
    metrics.lift_compliance_pct = verdict.outcome.lift_compliance_pct;
    metrics.reversal = verdict.reversal.clone();

    // Fold relational violations into the offending channels' masks. With
    // a diagnosed reversal only Active-row violations count — the Standby
    // population is the swapped-sensor artefact being filtered away.
    {
        let reversal_active_only = verdict.reversal.is_some();
        let chwrt_rows: Vec<usize> = verdict
            .outcome
            .return_violation_rows
            .iter()
            .enumerate()
            .filter(|(row, v)| {
                **v && (!reversal_active_only || states[*row] == OperationalState::Active)
            })
            .map(|(row, _)| row)
            .collect();
        let chwrt_idx_map = op_state::pair_nearest_idx(&reference_ts, &chwrt_ts, pair_tolerance);
        if let Some(c) = channels
            .iter_mut()
            .find(|c| c.signal.channel == ChannelKind::Chwrt)
        {
            for row in chwrt_rows {
                if let Some(j) = chwrt_idx_map[row] {
                    c.physics.violation_mask[j] = true;
                }
            }
            c.physics.finalise();
        }
        if verdict.reversal.is_none() {
            if let Some(c) = channels
                .iter_mut()
                .find(|c| c.signal.channel == ChannelKind::Cdwrt)
            {
                for &j in &verdict.outcome.cdwrt_violation_idx {
                    c.physics.violation_mask[j] = true;
                }
                c.physics.finalise();
            }
        }
    }

    // Per-channel and stage confidence.
    for channel in channels.iter_mut() {
        channel.confidence = channel.unit_confidence.min(channel.physics.confidence);
    }
    metrics.stage_confidence = weakest_link(
        channels
            .iter()
            .filter(|c| c.signal.channel.is_mandatory())
            .map(|c| c.confidence),
    );

    // Apply the proposed state filter.
    let state_filtered = verdict
        .reversal
        .as_ref()
        .map_or(false, |d| d.state_filter_proposed);
    if state_filtered {
        info!("Applying Active-state filter to all channels (sensor reversal salvage)");
        metrics.warnings.push(
            "sensor reversal diagnosed — only Active rows emitted downstream".to_string(),
        );
        for channel in channels.iter_mut() {
            filter_to_active(channel, &reference_ts, &states, pair_tolerance);
        }
    }

    for channel in &channels {
        metrics.channels.push(ChannelVerification {
            channel: channel.signal.channel,
            samples: channel.signal.len(),
            encoding: channel.decode.decision.label().to_string(),
            encoding_confidence: channel.decode.confidence,
            encoding_applied: !channel.signal.channel.is_temperature(),
            canonical_unit: channel.unit.canonical,
            detected_unit: channel.unit.detected,
            conversion_factor: channel.unit.factor,
            range_violations: channel.physics.violations,
            range_violation_pct: channel.physics.violation_pct,
            unit_confidence: channel.unit_confidence,
            physics_confidence: channel.physics.confidence,
            confidence: channel.confidence,
            warnings: channel
                .warnings
                .iter()
                .chain(channel.physics.warnings.iter())
                .cloned()
                .collect(),
        });
        if channel.confidence < 0.5 {
            warn!(
                channel = %channel.signal.channel,
                confidence = channel.confidence,
                "Low channel confidence after Stage 1"
            );
        }
    }

    // Keep the reference state series aligned with what was emitted.
    let (reference_ts, states) = if state_filtered {
        let filtered: Vec<(f64, OperationalState)> = reference_ts
            .iter()
            .zip(states.iter())
            .filter(|(_, s)| **s == OperationalState::Active)
            .map(|(t, s)| (*t, *s))
            .collect();
        (
            filtered.iter().map(|(t, _)| *t).collect(),
            filtered.iter().map(|(_, s)| *s).collect(),
        )
    } else {
        (reference_ts, states)
    };

    Ok((
        VerifiedDataset {
            channels,
            reference_ts,
            states,
            reversal: verdict.reversal,
            state_filtered,
        },
        metrics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(channel: ChannelKind, values: Vec<f64>) -> Signal {
        Signal {
            channel,
            equipment_id: "CH1".to_string(),
            source_file: format!("{}.csv", channel.short_code()),
            vendor_hint: None,
            reported_unit: None,
            timestamps: (0..values.len()).map(|i| i as f64 * 900.0).collect(),
            values,
        }
    }

    /// 20 rows: 9 loaded daytime rows with a healthy 5 K split, then 11
    /// idle rows where the return sensor reads *below* supply — the
    /// signature of swapped supply/return sensors at rest.
    fn reversed_plant() -> Vec<Signal> {
        let mut chwrt = vec![12.0; 9];
        chwrt.extend(vec![5.0; 11]);
        let mut power = vec![60.0; 9];
        power.extend(vec![5.0; 11]);
        vec![
            signal(ChannelKind::Chwst, vec![7.0; 20]),
            signal(ChannelKind::Chwrt, chwrt),
            signal(ChannelKind::Cdwrt, vec![30.0; 20]),
            signal(ChannelKind::Flow, vec![15.0; 20]),
            signal(ChannelKind::Power, power),
        ]
    }

    #[test]
    fn test_reversal_salvage_filters_to_active_rows() {
        let (dataset, metrics) =
            run(reversed_plant(), &PlantConfig::default()).expect("salvaged, not halted");

        let diagnosis = metrics.reversal.expect("reversal diagnosed");
        assert!(diagnosis.state_filter_proposed);
        assert!(
            diagnosis.confidence >= 0.90,
            "clean-active/broken-standby spread earns high confidence, got {}",
            diagnosis.confidence
        );
        assert!(dataset.state_filtered);

        // Only the 9 Active rows survive, on every channel.
        for channel in &dataset.channels {
            assert_eq!(
                channel.signal.len(),
                9,
                "{} should keep only Active rows",
                channel.signal.channel
            );
        }
        assert_eq!(dataset.reference_ts.len(), 9);
        assert!(dataset
            .states
            .iter()
            .all(|s| *s == OperationalState::Active));
    }

    #[test]
    fn test_reversal_without_tolerance_halts() {
        let config = PlantConfig {
            tolerate_reversal: false,
            ..Default::default()
        };
        let err = run(reversed_plant(), &config).expect_err("must halt");
        assert!(matches!(err, HaltReason::PhysicsViolation { .. }));
    }

    #[test]
    fn test_missing_temperature_channel_halts() {
        let signals = vec![
            signal(ChannelKind::Chwst, vec![7.0; 10]),
            signal(ChannelKind::Chwrt, vec![12.0; 10]),
            signal(ChannelKind::Flow, vec![15.0; 10]),
            signal(ChannelKind::Power, vec![60.0; 10]),
        ];
        let err = run(signals, &PlantConfig::default()).expect_err("must halt");
        assert!(matches!(
            err,
            HaltReason::MissingMandatoryChannel {
                channel: ChannelKind::Cdwrt
            }
        ));
    }

    #[test]
    fn test_clean_plant_keeps_full_confidence_chain() {
        let signals = vec![
            signal(ChannelKind::Chwst, vec![7.0; 12]),
            signal(ChannelKind::Chwrt, vec![12.0; 12]),
            signal(ChannelKind::Cdwrt, vec![30.0; 12]),
            signal(ChannelKind::Flow, vec![15.0; 12]),
            signal(ChannelKind::Power, vec![60.0; 12]),
        ];
        let (dataset, metrics) = run(signals, &PlantConfig::default()).expect("clean run");
        assert!(metrics.reversal.is_none());
        assert!(!dataset.state_filtered);
        assert_eq!(metrics.return_supply_compliance_pct, 100.0);
        // Flow pays its L/s conversion, power pays the missing counts
        // anchor; the chain bottoms out at the weakest channel.
        assert!(metrics.stage_confidence > 0.0);
        assert!(metrics.stage_confidence <= 0.98);
    }
}
