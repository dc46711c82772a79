//! Pipeline-wide default constants.
//!
//! Centralises the numeric thresholds of the assimilation engine in one
//! place. Grouped by stage for easy discovery. Equipment-tunable values
//! (state thresholds, nameplate) live in `PlantConfig` instead.

// ============================================================================
// Grid & Timing
// ============================================================================

/// Nominal sampling step T (seconds). 900 = 15-minute BMS trend cadence.
pub const NOMINAL_STEP_S: f64 = 900.0;

/// Alignment tolerance window around each grid point (seconds).
pub const ALIGN_TOLERANCE_S: f64 = 1_800.0;

// ============================================================================
// Stage 1a — Encoding Decoder
// ============================================================================

/// Rule 1: already a fraction when max ≤ this.
pub const FRACTION_MAX: f64 = 1.05;
/// Rule 1: and min ≥ this.
pub const FRACTION_MIN: f64 = -0.05;
/// Rule 2: percent scale when max ≤ this.
pub const PERCENT_MAX: f64 = 110.0;
/// Rule 2: and min ≥ this.
pub const PERCENT_MIN: f64 = -5.0;
/// Rules 3–5: counts buckets are ±10 % windows around the nominal scale.
pub const COUNTS_WINDOW: f64 = 0.10;
/// Rule 6: large raw counts when p99.5 exceeds this.
pub const LARGE_COUNTS_MIN: f64 = 30_000.0;
/// Rule 7: unscaled analog when p99.5 exceeds this.
pub const ANALOG_MIN: f64 = 150.0;
/// Normalised output clip ceiling — keeps transient overshoot visible.
pub const NORMALISED_CLIP: f64 = 1.2;

// ============================================================================
// Stage 1b — Unit Verification
// ============================================================================

/// Temperature mean ranges for magnitude detection.
pub const TEMP_C_RANGE: (f64, f64) = (3.0, 50.0);
pub const TEMP_F_RANGE: (f64, f64) = (37.0, 120.0);
pub const TEMP_K_RANGE: (f64, f64) = (273.0, 323.0);

/// Flow max ranges for magnitude detection (checked in order).
pub const FLOW_M3S_MAX: f64 = 1.0;
pub const FLOW_LS_RANGE: (f64, f64) = (10.0, 500.0);
pub const FLOW_GPM_RANGE: (f64, f64) = (50.0, 2_000.0);
pub const FLOW_M3H_RANGE: (f64, f64) = (500.0, 10_000.0);

/// Power max ranges for magnitude detection.
pub const POWER_MW_MAX: f64 = 10.0;
pub const POWER_KW_RANGE: (f64, f64) = (50.0, 5_000.0);
pub const POWER_W_MIN: f64 = 10_000.0;

/// US gallon per minute → m³/s.
pub const GPM_TO_M3S: f64 = 6.309e-5;

/// Warn when decoded power p99.5 exceeds nameplate by this factor.
pub const NAMEPLATE_EXCEEDANCE_FACTOR: f64 = 1.5;

/// Unit-confidence penalties (subtracted from 1.0, floored at 0).
pub const PENALTY_UNIT_MISSING: f64 = 0.30;
pub const PENALTY_UNIT_AMBIGUOUS: f64 = 0.20;
pub const PENALTY_UNIT_OUT_OF_RANGE: f64 = 0.05;
pub const PENALTY_UNIT_CONVERSION: f64 = 0.02;

// ============================================================================
// Stage 1c — Operational State
// ============================================================================

/// Majority-vote smoothing window (rows). Suppresses single-sample flutter.
pub const STATE_SMOOTHING_WINDOW: usize = 3;

/// Load/flow below this fraction of scale counts as "≈ 0" for Off.
pub const NEAR_ZERO_FRACTION: f64 = 0.02;

// ============================================================================
// Stage 1d — Physics Validation
// ============================================================================

/// Plausible canonical ranges (°C); outside → warning, not halt.
pub const CHWST_RANGE_C: (f64, f64) = (3.0, 20.0);
pub const CHWRT_RANGE_C: (f64, f64) = (5.0, 30.0);
pub const CDWRT_RANGE_C: (f64, f64) = (15.0, 45.0);

/// Relational checks must hold on at least this percentage of rows.
pub const RELATIONAL_COMPLIANCE_PCT: f64 = 99.0;

/// Aggregate physics-violation budget before HALT (percent of rows).
pub const PHYSICS_VIOLATION_BUDGET_PCT: f64 = 1.0;

/// Reversal diagnosis: aggregate violation rate that triggers the
/// state-stratified re-evaluation (percent).
pub const REVERSAL_TRIGGER_PCT: f64 = 50.0;
/// Reversal diagnosis: Active-state violation rate must be at or below.
pub const REVERSAL_ACTIVE_MAX_PCT: f64 = 10.0;
/// Reversal diagnosis: Standby-state violation rate must be at or above.
pub const REVERSAL_STANDBY_MIN_PCT: f64 = 50.0;
/// Spread (percentage points) that earns diagnosis confidence ≥ 0.90.
pub const REVERSAL_HIGH_CONFIDENCE_SPREAD: f64 = 60.0;

/// Physics confidence loses this much per percentage point of violations.
pub const PHYSICS_PENALTY_PER_PCT: f64 = 0.10;

// ============================================================================
// Stage 2 — Gap Detection
// ============================================================================

/// Δt ≤ MINOR_FACTOR·T is Normal.
pub const GAP_MINOR_FACTOR: f64 = 1.5;
/// Δt > MAJOR_FACTOR·T is a MajorGap.
pub const GAP_MAJOR_FACTOR: f64 = 4.0;

/// Absolute jump across a gap that forces SensorAnomaly. Applied in the
/// value's own canonical scale: °C for temperatures, normalised fraction
/// for everything else.
pub const GAP_JUMP_ABS: f64 = 5.0;
/// Relative change below this (percent) across a gap is CovConstant.
pub const GAP_COV_REL_PCT: f64 = 0.5;

/// Per-gap confidence penalties (≤ 0).
pub const PENALTY_COV_CONSTANT: f64 = 0.00;
pub const PENALTY_COV_MINOR: f64 = -0.02;
pub const PENALTY_SENSOR_ANOMALY: f64 = -0.05;
pub const PENALTY_EXCLUDED: f64 = -0.03;
pub const PENALTY_GAP_UNKNOWN: f64 = -0.01;

/// Exclusion-window candidates need a MajorGap of at least this many hours…
pub const EXCLUSION_MIN_HOURS: f64 = 8.0;
/// …overlapping on at least this many mandatory channels.
pub const EXCLUSION_MIN_CHANNELS: usize = 2;

// ============================================================================
// Stage 3 — Synchronisation
// ============================================================================

/// HALT when the valid-row fraction falls below this.
pub const COVERAGE_HALT_FLOOR: f64 = 0.50;

// ============================================================================
// Stage 4 — Derived Quantities
// ============================================================================

/// Water density (kg/m³) for Q = flow·ρ·c_p·ΔT.
pub const WATER_DENSITY: f64 = 1_000.0;
/// Water specific heat (kJ/(kg·K)).
pub const WATER_CP: f64 = 4.186;

/// Plausible COP window; outside → Missing with zeroed confidence.
pub const COP_MIN: f64 = 2.0;
pub const COP_MAX: f64 = 7.0;

/// Normalised COP (vs Carnot) interpretation bands.
pub const NORM_COP_TYPICAL_MIN: f64 = 0.3;
pub const NORM_COP_EXCEPTIONAL_MIN: f64 = 0.5;

/// Hunting: sliding window length (hours) on CHWST.
pub const HUNT_WINDOW_HOURS: f64 = 24.0;
/// Hunting: minimum amplitude of a counted reversal (°C).
pub const HUNT_AMPLITUDE_C: f64 = 0.3;
/// Hunting severity bands (cycles per hour).
pub const HUNT_MINOR_RATE: f64 = 0.2;
pub const HUNT_MAJOR_RATE: f64 = 1.0;
/// Minimum reversal count for a confident detection.
pub const HUNT_MIN_REVERSALS: usize = 3;
pub const HUNT_CONFIDENCE_DETECTED: f64 = 0.95;
pub const HUNT_CONFIDENCE_BORDERLINE: f64 = 0.50;

/// Fouling severity bands, percent degradation from baseline.
pub const EVAP_FOULING_MINOR_PCT: f64 = 10.0;
pub const EVAP_FOULING_MAJOR_PCT: f64 = 25.0;
pub const COND_FOULING_MINOR_PCT: f64 = 5.0;
pub const COND_FOULING_MAJOR_PCT: f64 = 15.0;
/// Fouling confidence model.
pub const FOULING_BASE_CONFIDENCE: f64 = 0.60;
pub const FOULING_SHORT_OBS_PENALTY: f64 = 0.20;
pub const FOULING_ADVERSE_FACTOR_PENALTY: f64 = 0.10;
/// Observation shorter than this many days is penalised.
pub const FOULING_MIN_OBS_DAYS: f64 = 7.0;

/// Q component-confidence penalties.
pub const PENALTY_Q_FLOW_MISSING: f64 = 0.30;
pub const PENALTY_Q_DELTA_T_INVALID: f64 = 0.20;
pub const PENALTY_Q_DELTA_T_LOW: f64 = 0.10;
pub const PENALTY_Q_DELTA_T_HIGH: f64 = 0.05;
/// ΔT bounds for the low/high penalties (K).
pub const DELTA_T_LOW_K: f64 = 1.0;
pub const DELTA_T_HIGH_K: f64 = 15.0;

/// COP component-confidence penalties.
pub const PENALTY_COP_POWER_MISSING: f64 = 1.00;
pub const PENALTY_COP_OUT_OF_RANGE: f64 = 0.50;
pub const PENALTY_COP_NORM_IMPLAUSIBLE: f64 = 0.20;
