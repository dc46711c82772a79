//! Stage 1d — physics validation and sensor-reversal diagnosis
//!
//! Range checks warn; negative flow or power halts; the relational checks
//! (CHWRT ≥ CHWST, CDWRT > CHWST) must hold on 99 % of paired rows.
//!
//! An aggregate CHWRT<CHWST failure above 50 % triggers a state-stratified
//! re-evaluation: violations concentrated in Standby with a clean Active
//! population mean the supply/return sensors are swapped at rest — the
//! dataset is salvageable by filtering to Active rows, and the stage
//! records a SensorReversal diagnosis instead of halting.

use tracing::{info, warn};

use crate::config::{defaults, PlantConfig};
use crate::types::{
    CanonicalUnit, ChannelKind, HaltReason, OperationalState, SensorReversalDiagnosis,
};

use super::op_state::pair_nearest_idx;

/// Per-channel physics verdict.
#[derive(Debug, Clone)]
pub struct ChannelPhysics {
    pub channel: ChannelKind,
    /// Per-sample violation flags, used by Stage 2 to force SensorAnomaly
    /// on co-located gaps
    pub violation_mask: Vec<bool>,
    pub violations: usize,
    pub violation_pct: f64,
    /// 1.0 − 0.10 · violation_pct, floored at 0
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl ChannelPhysics {
    fn clean(channel: ChannelKind, samples: usize) -> Self {
        Self {
            channel,
            violation_mask: vec![false; samples],
            violations: 0,
            violation_pct: 0.0,
            confidence: 1.0,
            warnings: Vec::new(),
        }
    }

    pub fn finalise(&mut self) {
        self.violations = self.violation_mask.iter().filter(|v| **v).count();
        let n = self.violation_mask.len().max(1);
        self.violation_pct = 100.0 * self.violations as f64 / n as f64;
        self.confidence =
            (1.0 - defaults::PHYSICS_PENALTY_PER_PCT * self.violation_pct).max(0.0);
    }
}

/// Plausible canonical range for a temperature channel, if one applies.
fn range_for(channel: ChannelKind) -> Option<(f64, f64)> {
    match channel {
        ChannelKind::Chwst => Some(defaults::CHWST_RANGE_C),
        ChannelKind::Chwrt => Some(defaults::CHWRT_RANGE_C),
        ChannelKind::Cdwrt => Some(defaults::CDWRT_RANGE_C),
        _ => None,
    }
}

/// Range-check one channel's canonical values.
///
/// Temperatures outside their plausible window are warnings; any negative
/// flow or power is fatal.
pub fn check_ranges(
    channel: ChannelKind,
    canonical_unit: CanonicalUnit,
    timestamps: &[f64],
    canonical: &[f64],
) -> Result<ChannelPhysics, HaltReason> {
    let mut physics = ChannelPhysics::clean(channel, canonical.len());

    match canonical_unit {
        CanonicalUnit::TemperatureC => {
            if let Some((lo, hi)) = range_for(channel) {
                for (i, &v) in canonical.iter().enumerate() {
                    if v.is_finite() && (v < lo || v > hi) {
                        physics.violation_mask[i] = true;
                    }
                }
                physics.finalise();
                if physics.violations > 0 {
                    physics.warnings.push(format!(
                        "{}: {} samples ({:.2}%) outside plausible range [{}, {}] °C",
                        channel, physics.violations, physics.violation_pct, lo, hi
                    ));
                }
            }
        }
        CanonicalUnit::FlowM3s => {
            for (i, &v) in canonical.iter().enumerate() {
                if v.is_finite() && v < 0.0 {
                    return Err(HaltReason::NegativeFlow {
                        channel,
                        value: v,
                        timestamp_s: timestamps[i],
                    });
                }
            }
        }
        CanonicalUnit::PowerKw => {
            for (i, &v) in canonical.iter().enumerate() {
                if v.is_finite() && v < 0.0 {
                    return Err(HaltReason::NegativePower {
                        channel,
                        value: v,
                        timestamp_s: timestamps[i],
                    });
                }
            }
        }
        CanonicalUnit::Dimensionless => {}
    }

    Ok(physics)
}

/// Result of the relational checks on the CHWST reference timeline.
#[derive(Debug, Clone)]
pub struct RelationalOutcome {
    /// CHWRT ≥ CHWST compliance over paired rows (percent)
    pub return_supply_compliance_pct: f64,
    /// CDWRT > CHWST compliance over paired rows (percent)
    pub lift_compliance_pct: f64,
    /// CHWRT sample indices violating the return ≥ supply relation
    pub chwrt_violation_idx: Vec<usize>,
    /// CDWRT sample indices violating the positive-lift relation
    pub cdwrt_violation_idx: Vec<usize>,
    /// Reference-row flags for the reversal stratification
    pub return_violation_rows: Vec<bool>,
    pub paired_rows: usize,
}

/// Run both relational checks by nearest-neighbour pairing onto the CHWST
/// timeline (classification only; no values move between timelines here).
pub fn relational_checks(
    chwst_ts: &[f64],
    chwst: &[f64],
    chwrt_ts: &[f64],
    chwrt: &[f64],
    cdwrt_ts: &[f64],
    cdwrt: &[f64],
    pair_tolerance_s: f64,
) -> RelationalOutcome {
    let chwrt_idx = pair_nearest_idx(chwst_ts, chwrt_ts, pair_tolerance_s);
    let cdwrt_idx = pair_nearest_idx(chwst_ts, cdwrt_ts, pair_tolerance_s);

    let mut return_pairs = 0usize;
    let mut return_ok = 0usize;
    let mut lift_pairs = 0usize;
    let mut lift_ok = 0usize;
    let mut chwrt_violation_idx = Vec::new();
    let mut cdwrt_violation_idx = Vec::new();
    let mut return_violation_rows = vec![false; chwst_ts.len()];

    for (row, &supply) in chwst.iter().enumerate() {
        if !supply.is_finite() {
            continue;
        }
        if let Some(j) = chwrt_idx[row] {
            let ret = chwrt[j];
            if ret.is_finite() {
                return_pairs += 1;
                if ret >= supply {
                    return_ok += 1;
                } else {
                    chwrt_violation_idx.push(j);
                    return_violation_rows[row] = true;
                }
            }
        }
        if let Some(j) = cdwrt_idx[row] {
            let cond = cdwrt[j];
            if cond.is_finite() {
                lift_pairs += 1;
                if cond > supply {
                    lift_ok += 1;
                } else {
                    cdwrt_violation_idx.push(j);
                }
            }
        }
    }

    let pct = |ok: usize, pairs: usize| {
        if pairs == 0 {
            100.0
        } else {
            100.0 * ok as f64 / pairs as f64
        }
    };

    RelationalOutcome {
        return_supply_compliance_pct: pct(return_ok, return_pairs),
        lift_compliance_pct: pct(lift_ok, lift_pairs),
        chwrt_violation_idx,
        cdwrt_violation_idx,
        return_violation_rows,
        paired_rows: return_pairs,
    }
}

/// State-stratified re-evaluation of an aggregate return-supply failure.
///
/// Returns a diagnosis when the Active population is clean (≤ 10 %
/// violations) while Standby is broken (≥ 50 %).
pub fn diagnose_reversal(
    violation_rows: &[bool],
    states: &[OperationalState],
    overall_violation_pct: f64,
) -> Option<SensorReversalDiagnosis> {
    if overall_violation_pct <= defaults::REVERSAL_TRIGGER_PCT {
        return None;
    }
    debug_assert_eq!(violation_rows.len(), states.len());

    let mut active = (0usize, 0usize); // (violations, rows)
    let mut standby = (0usize, 0usize);
    for (row, &violated) in violation_rows.iter().enumerate() {
        match states[row] {
            OperationalState::Active => {
                active.1 += 1;
                if violated {
                    active.0 += 1;
                }
            }
            OperationalState::Standby | OperationalState::Off => {
                standby.1 += 1;
                if violated {
                    standby.0 += 1;
                }
            }
            OperationalState::Unknown => {}
        }
    }

    if active.1 == 0 || standby.1 == 0 {
        return None;
    }

    let active_pct = 100.0 * active.0 as f64 / active.1 as f64;
    let standby_pct = 100.0 * standby.0 as f64 / standby.1 as f64;

    if active_pct <= defaults::REVERSAL_ACTIVE_MAX_PCT
        && standby_pct >= defaults::REVERSAL_STANDBY_MIN_PCT
    {
        let spread = standby_pct - active_pct;
        // Spread of 60 points maps to 0.90; wider spreads approach 1.0.
        let confidence = (0.30 + spread / 100.0).clamp(0.0, 1.0);
        info!(
            active_pct,
            standby_pct, confidence, "Sensor reversal diagnosed — proposing Active-state filter"
        );
        Some(SensorReversalDiagnosis {
            violation_pct_overall: overall_violation_pct,
            violation_pct_active: active_pct,
            violation_pct_standby: standby_pct,
            confidence,
            state_filter_proposed: true,
        })
    } else {
        None
    }
}

/// Combined relational verdict after any reversal salvage.
#[derive(Debug, Clone)]
pub struct RelationalVerdict {
    pub outcome: RelationalOutcome,
    pub reversal: Option<SensorReversalDiagnosis>,
}

/// Evaluate the relational invariants, attempting the reversal salvage
/// before declaring a physics HALT.
pub fn evaluate_relations(
    outcome: RelationalOutcome,
    states: &[OperationalState],
    config: &PlantConfig,
) -> Result<RelationalVerdict, HaltReason> {
    let violation_pct = 100.0 - outcome.return_supply_compliance_pct;

    let reversal = if config.tolerate_reversal {
        diagnose_reversal(&outcome.return_violation_rows, states, violation_pct)
    } else {
        None
    };

    if violation_pct > defaults::PHYSICS_VIOLATION_BUDGET_PCT && reversal.is_none() {
        return Err(HaltReason::PhysicsViolation {
            check: "CHWRT >= CHWST".to_string(),
            violation_pct,
        });
    }

    let lift_violation_pct = 100.0 - outcome.lift_compliance_pct;
    if lift_violation_pct > defaults::PHYSICS_VIOLATION_BUDGET_PCT && reversal.is_none() {
        warn!(
            lift_violation_pct,
            "CDWRT > CHWST failing beyond budget — continuing with lowered physics confidence"
        );
    }

    Ok(RelationalVerdict { outcome, reversal })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_range_warns_not_halts() {
        let ts = [0.0, 900.0, 1800.0];
        let values = [7.0, 25.0, 6.5]; // 25 °C supply is implausible
        let physics =
            check_ranges(ChannelKind::Chwst, CanonicalUnit::TemperatureC, &ts, &values).unwrap();
        assert_eq!(physics.violations, 1);
        assert!(physics.violation_mask[1]);
        assert!(!physics.warnings.is_empty());
        assert!(physics.confidence < 1.0);
    }

    #[test]
    fn test_negative_flow_halts() {
        let ts = [0.0, 900.0];
        let values = [0.05, -0.01];
        let err =
            check_ranges(ChannelKind::Flow, CanonicalUnit::FlowM3s, &ts, &values).unwrap_err();
        assert!(matches!(err, HaltReason::NegativeFlow { value, .. } if value == -0.01));
    }

    #[test]
    fn test_negative_power_halts() {
        let ts = [0.0];
        let err =
            check_ranges(ChannelKind::Power, CanonicalUnit::PowerKw, &ts, &[-5.0]).unwrap_err();
        assert!(matches!(err, HaltReason::NegativePower { .. }));
    }

    #[test]
    fn test_relational_compliance_clean() {
        let ts = [0.0, 900.0, 1800.0];
        let chwst = [6.5, 6.8, 7.0];
        let chwrt = [11.5, 11.8, 12.0];
        let cdwrt = [29.0, 29.5, 30.0];
        let outcome = relational_checks(&ts, &chwst, &ts, &chwrt, &ts, &cdwrt, 450.0);
        assert_eq!(outcome.return_supply_compliance_pct, 100.0);
        assert_eq!(outcome.lift_compliance_pct, 100.0);
        assert!(outcome.chwrt_violation_idx.is_empty());
    }

    #[test]
    fn test_relational_detects_violations() {
        let ts = [0.0, 900.0];
        let chwst = [7.0, 7.0];
        let chwrt = [6.0, 12.0]; // first row violates return >= supply
        let cdwrt = [30.0, 30.0];
        let outcome = relational_checks(&ts, &chwst, &ts, &chwrt, &ts, &cdwrt, 450.0);
        assert_eq!(outcome.return_supply_compliance_pct, 50.0);
        assert_eq!(outcome.chwrt_violation_idx, vec![0]);
        assert!(outcome.return_violation_rows[0]);
    }

    #[test]
    fn test_reversal_diagnosed_on_standby_concentration() {
        use OperationalState::*;
        // 10 rows: 4 active (clean), 6 standby (all violated) → 60% overall
        let states = [
            Active, Active, Active, Active, Standby, Standby, Standby, Standby, Standby, Standby,
        ];
        let violations = [
            false, false, false, false, true, true, true, true, true, true,
        ];
        let diagnosis = diagnose_reversal(&violations, &states, 60.0).expect("diagnosis");
        assert_eq!(diagnosis.violation_pct_active, 0.0);
        assert_eq!(diagnosis.violation_pct_standby, 100.0);
        assert!(
            diagnosis.confidence >= 0.90,
            "spread of 100 points earns high confidence, got {}",
            diagnosis.confidence
        );
        assert!(diagnosis.state_filter_proposed);
    }

    #[test]
    fn test_no_reversal_when_active_also_violates() {
        use OperationalState::*;
        let states = [Active, Active, Standby, Standby];
        let violations = [true, true, true, true];
        assert!(diagnose_reversal(&violations, &states, 100.0).is_none());
    }

    #[test]
    fn test_no_reversal_below_trigger() {
        use OperationalState::*;
        let states = [Active, Standby];
        let violations = [false, true];
        assert!(diagnose_reversal(&violations, &states, 30.0).is_none());
    }

    #[test]
    fn test_evaluate_relations_halts_without_salvage() {
        use OperationalState::*;
        let ts: Vec<f64> = (0..10).map(|i| i as f64 * 900.0).collect();
        let chwst = [7.0; 10];
        let chwrt = [5.0; 10]; // all rows violate
        let cdwrt = [30.0; 10];
        let outcome = relational_checks(&ts, &chwst, &ts, &chwrt, &ts, &cdwrt, 450.0);
        let states = [Active; 10];
        let config = PlantConfig::default();
        let err = evaluate_relations(outcome, &states, &config).unwrap_err();
        assert!(matches!(err, HaltReason::PhysicsViolation { .. }));
    }

    #[test]
    fn test_evaluate_relations_salvages_reversal() {
        use OperationalState::*;
        let ts: Vec<f64> = (0..10).map(|i| i as f64 * 900.0).collect();
        let chwst = [7.0; 10];
        // Violations only where standby (rows 4..10)
        let chwrt = [12.0, 12.0, 12.0, 12.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0];
        let cdwrt = [30.0; 10];
        let outcome = relational_checks(&ts, &chwst, &ts, &chwrt, &ts, &cdwrt, 450.0);
        let states = [
            Active, Active, Active, Active, Standby, Standby, Standby, Standby, Standby, Standby,
        ];
        let verdict =
            evaluate_relations(outcome, &states, &PlantConfig::default()).expect("salvaged");
        assert!(verdict.reversal.is_some());
    }
}
