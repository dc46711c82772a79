//! Stage metrics, halt reasons, and pipeline errors
//!
//! Every stage emits a structured metrics record that is persisted beside
//! its data artifact. HALTs are data-fatal conditions with enough detail
//! for the operator to act on (which channel, which invariant, what was
//! observed); programmer errors surface separately and never degrade
//! silently into data annotations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    AlignmentQuality, CanonicalUnit, ChannelKind, ConfidenceTier, CoverageTier, ExclusionWindow,
    GapClass, GapSemantic, RowClassification, SourceUnit,
};

// ============================================================================
// Halt Reasons & Pipeline Errors
// ============================================================================

/// Data-fatal conditions. The pipeline stops at the current stage, keeps
/// partial outputs for audit, and reports the cause in `halt.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Error, PartialEq)]
pub enum HaltReason {
    #[error("timestamp reversal on {channel} at sample {index} of {file} — the export is not in original order")]
    TimestampReversal {
        channel: ChannelKind,
        file: String,
        index: usize,
    },

    #[error("negative flow {value:.4} m3/s on {channel} at t={timestamp_s:.0}s — flow meters do not read below zero")]
    NegativeFlow {
        channel: ChannelKind,
        value: f64,
        timestamp_s: f64,
    },

    #[error("negative power {value:.2} kW on {channel} at t={timestamp_s:.0}s")]
    NegativePower {
        channel: ChannelKind,
        value: f64,
        timestamp_s: f64,
    },

    #[error("{check} violated on {violation_pct:.1}% of rows (budget 1.0%) with no sensor-reversal salvage")]
    PhysicsViolation { check: String, violation_pct: f64 },

    #[error("mandatory channel {channel} missing — BMD requires CHWST, CHWRT, CDWRT, FLOW, POWER")]
    MissingMandatoryChannel { channel: ChannelKind },

    #[error("synchronised coverage {valid_pct:.1}% is below the 50% floor")]
    LowCoverage { valid_pct: f64 },

    #[error("every grid row lies inside an approved exclusion window")]
    AllRowsExcluded,
}

impl HaltReason {
    /// Stable machine-readable code for `halt.json`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TimestampReversal { .. } => "timestamp_reversal",
            Self::NegativeFlow { .. } => "negative_flow",
            Self::NegativePower { .. } => "negative_power",
            Self::PhysicsViolation { .. } => "physics_violation",
            Self::MissingMandatoryChannel { .. } => "missing_mandatory_channel",
            Self::LowCoverage { .. } => "low_coverage",
            Self::AllRowsExcluded => "all_rows_excluded",
        }
    }

    /// Stage at which this halt is raised.
    pub fn stage(&self) -> u8 {
        match self {
            Self::TimestampReversal { .. } | Self::MissingMandatoryChannel { .. } => 0,
            Self::NegativeFlow { .. }
            | Self::NegativePower { .. }
            | Self::PhysicsViolation { .. } => 1,
            Self::LowCoverage { .. } | Self::AllRowsExcluded => 3,
        }
    }
}

/// Top-level pipeline error partition.
///
/// `Halt` is data-fatal and reportable; `Precondition` is a programmer
/// error (e.g. Stage 3 invoked with non-monotonic input) and maps to exit
/// code 2, never to a data annotation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline halted: {0}")]
    Halt(#[from] HaltReason),

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structured content of `halt.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltInfo {
    pub stage: u8,
    pub reason_code: String,
    pub human_message: String,
}

impl From<&HaltReason> for HaltInfo {
    fn from(reason: &HaltReason) -> Self {
        Self {
            stage: reason.stage(),
            reason_code: reason.code().to_string(),
            human_message: reason.to_string(),
        }
    }
}

// ============================================================================
// Stage 0 — Classification
// ============================================================================

/// Classification verdict for one input file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileClassification {
    pub filename: String,
    pub channel: ChannelKind,
    /// 1.0 exact abbreviation, 0.8 strong pattern, 0.6 generic keyword,
    /// 0.0 no match
    pub confidence: f64,
    /// Name of the rule that matched, for the audit trail
    pub matched_rule: String,
    pub equipment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage0Metrics {
    pub files_total: usize,
    pub files_classified: usize,
    pub files_unclassified: usize,
    pub classifications: Vec<FileClassification>,
    /// Mandatory channels that found no file
    pub missing_mandatory: Vec<ChannelKind>,
    pub warnings: Vec<String>,
    pub halted: bool,
}

// ============================================================================
// Stage 1 — Decode, Convert, Validate
// ============================================================================

/// State-stratified sensor-reversal diagnosis.
///
/// Raised when the aggregate CHWRT<CHWST violation rate exceeds 50 % but
/// the violations concentrate in Standby rows: the supply/return sensors
/// are swapped at rest, not broken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReversalDiagnosis {
    pub violation_pct_overall: f64,
    pub violation_pct_active: f64,
    pub violation_pct_standby: f64,
    /// ≥ 0.90 when the active/standby spread is ≥ 60 percentage points
    pub confidence: f64,
    /// Emit only Active rows downstream instead of halting
    pub state_filter_proposed: bool,
}

/// Per-channel Stage 1 verification summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelVerification {
    pub channel: ChannelKind,
    pub samples: usize,
    pub encoding: String,
    pub encoding_confidence: ConfidenceTier,
    /// Whether the decoder's normalisation was applied to this channel
    pub encoding_applied: bool,
    pub canonical_unit: CanonicalUnit,
    pub detected_unit: SourceUnit,
    pub conversion_factor: f64,
    pub range_violations: usize,
    pub range_violation_pct: f64,
    pub unit_confidence: f64,
    pub physics_confidence: f64,
    /// min(unit, physics)
    pub confidence: f64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage1Metrics {
    pub channels: Vec<ChannelVerification>,
    /// Row counts per operational state on the reference timeline
    pub state_counts: StateCounts,
    pub reversal: Option<SensorReversalDiagnosis>,
    /// CHWRT ≥ CHWST compliance, percent of paired rows
    pub return_supply_compliance_pct: f64,
    /// CDWRT > CHWST compliance, percent of paired rows
    pub lift_compliance_pct: f64,
    /// min across BMD channels
    pub stage_confidence: f64,
    pub warnings: Vec<String>,
    pub halted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub active: usize,
    pub standby: usize,
    pub off: usize,
    pub unknown: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.active + self.standby + self.off + self.unknown
    }
}

// ============================================================================
// Stage 2 — Gap Detection
// ============================================================================

/// Per-channel gap scan summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGapReport {
    pub channel: ChannelKind,
    pub intervals: usize,
    pub normal: usize,
    pub minor_gaps: usize,
    pub major_gaps: usize,
    pub cov_constant: usize,
    pub cov_minor: usize,
    pub sensor_anomalies: usize,
    pub unknown: usize,
    /// Sum of per-gap penalties (≤ 0)
    pub penalty: f64,
    /// Stage-1 channel confidence plus this channel's penalty
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl ChannelGapReport {
    /// Count an interval into the class/semantic tallies.
    pub fn record(&mut self, class: GapClass, semantic: GapSemantic) {
        self.intervals += 1;
        match class {
            GapClass::Normal => self.normal += 1,
            GapClass::MinorGap => self.minor_gaps += 1,
            GapClass::MajorGap => self.major_gaps += 1,
        }
        match semantic {
            GapSemantic::NotApplicable => {}
            GapSemantic::CovConstant => self.cov_constant += 1,
            GapSemantic::CovMinor => self.cov_minor += 1,
            GapSemantic::SensorAnomaly => self.sensor_anomalies += 1,
            GapSemantic::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage2Metrics {
    pub channels: Vec<ChannelGapReport>,
    pub exclusion_candidates: Vec<ExclusionWindow>,
    /// Mean per-channel penalty (≤ 0)
    pub stage_penalty: f64,
    /// Stage-1 confidence plus the stage penalty
    pub stage_confidence: f64,
    pub warnings: Vec<String>,
    pub halted: bool,
}

// ============================================================================
// Stage 3 — Synchronisation
// ============================================================================

/// Per-channel alignment quality summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAlignmentReport {
    pub channel: ChannelKind,
    pub exact: usize,
    pub close: usize,
    pub interp: usize,
    pub missing: usize,
    pub mean_jitter_s: f64,
    pub max_jitter_s: f64,
}

impl ChannelAlignmentReport {
    pub fn record(&mut self, quality: AlignmentQuality) {
        match quality {
            AlignmentQuality::Exact => self.exact += 1,
            AlignmentQuality::Close => self.close += 1,
            AlignmentQuality::Interp => self.interp += 1,
            AlignmentQuality::Missing => self.missing += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage3Metrics {
    pub rows: usize,
    pub valid: usize,
    pub major_gap: usize,
    pub excluded: usize,
    pub valid_fraction: f64,
    pub coverage_tier: Option<CoverageTier>,
    pub coverage_penalty: f64,
    pub channels: Vec<ChannelAlignmentReport>,
    pub mean_row_confidence: f64,
    /// z-score of mean jitter against a zero-centred normal model of the
    /// observed jitter spread — a large score flags systematic clock skew
    /// rather than random jitter
    pub jitter_skew_score: f64,
    /// Rows re-classified after a late approval reconciliation
    pub reclassified_rows: usize,
    pub stage_confidence: f64,
    pub warnings: Vec<String>,
    pub halted: bool,
}

impl Stage3Metrics {
    pub fn count_row(&mut self, class: RowClassification) {
        self.rows += 1;
        match class {
            RowClassification::Valid => self.valid += 1,
            RowClassification::MajorGap => self.major_gap += 1,
            RowClassification::Excluded => self.excluded += 1,
        }
    }
}

// ============================================================================
// Stage 4 — Derived Quantities
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct HuntingCounts {
    pub none: usize,
    pub minor: usize,
    pub major: usize,
    pub insufficient: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FoulingSummary {
    /// "design" or "first_week_average"
    pub baseline_source: String,
    pub evaporator_severity: String,
    pub evaporator_degradation_pct: f64,
    pub condenser_severity: String,
    pub condenser_lift_increase_pct: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stage4Metrics {
    pub rows: usize,
    pub q_valid: usize,
    pub q_mean_kw: f64,
    pub cop_valid: usize,
    pub cop_valid_pct: f64,
    pub cop_mean: f64,
    pub cop_out_of_range: usize,
    pub normalized_cop_mean: f64,
    pub hunting: HuntingCounts,
    pub fouling: Option<FoulingSummary>,
    pub mean_q_confidence: f64,
    pub mean_cop_confidence: f64,
    pub warnings: Vec<String>,
    pub halted: bool,
}

// ============================================================================
// Run Report
// ============================================================================

/// Aggregate record of one pipeline run, persisted as `run_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineReport {
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub stages_run: Vec<u8>,
    pub stage0: Option<Stage0Metrics>,
    pub stage1: Option<Stage1Metrics>,
    pub stage2: Option<Stage2Metrics>,
    pub stage3: Option<Stage3Metrics>,
    pub stage4: Option<Stage4Metrics>,
    pub halt: Option<HaltInfo>,
    pub warning_total: usize,
}

impl PipelineReport {
    /// Confidence chain across executed stages, for the monotonicity check
    /// Stage_k ≤ Stage_{k−1} (Stage 0 excluded).
    pub fn confidence_chain(&self) -> Vec<f64> {
        let mut chain = Vec::new();
        if let Some(s1) = &self.stage1 {
            chain.push(s1.stage_confidence);
        }
        if let Some(s2) = &self.stage2 {
            chain.push(s2.stage_confidence);
        }
        if let Some(s3) = &self.stage3 {
            chain.push(s3.stage_confidence);
        }
        chain
    }
}
