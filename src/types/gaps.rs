//! Gap classification and exclusion-window types
//!
//! COV (change-of-value) logging makes long gaps with constant values a
//! normal thing in BMS exports, so gaps carry a *semantic* on top of their
//! size class. Only sensor anomalies and excluded rows cost confidence.

use serde::{Deserialize, Serialize};

use super::ChannelKind;

/// Size class of the interval between sample i and i+1, relative to the
/// nominal step T: Normal ≤ 1.5·T < MinorGap ≤ 4·T < MajorGap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GapClass {
    Normal,
    MinorGap,
    MajorGap,
}

impl GapClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::MinorGap => "MINOR_GAP",
            Self::MajorGap => "MAJOR_GAP",
        }
    }
}

impl std::fmt::Display for GapClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a MinorGap/MajorGap interval looks the way it does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum GapSemantic {
    /// Interval was Normal; no semantic applies
    #[default]
    NotApplicable,
    /// Value unchanged across the gap (< 0.5 % relative) — benign COV
    CovConstant,
    /// Small drift across the gap — benign COV
    CovMinor,
    /// Large jump or co-located physics violation
    SensorAnomaly,
    /// Before/after values unavailable for a verdict
    Unknown,
}

impl GapSemantic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotApplicable => "N_A",
            Self::CovConstant => "COV_CONSTANT",
            Self::CovMinor => "COV_MINOR",
            Self::SensorAnomaly => "SENSOR_ANOMALY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for GapSemantic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-sample gap annotation describing the interval *before* this sample.
///
/// Sample 0 carries the default annotation (no prior interval).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapAnnotation {
    /// Seconds since the previous sample (0.0 for sample 0)
    pub duration_s: f64,
    pub class: GapClass,
    pub semantic: GapSemantic,
    /// Confidence penalty charged for this gap (≤ 0)
    pub penalty: f64,
    /// Relative value change across the gap, percent
    pub value_change_rel_pct: f64,
    /// Candidate window this gap belongs to, if any
    pub exclusion_window_id: Option<String>,
}

impl Default for GapAnnotation {
    fn default() -> Self {
        Self {
            duration_s: 0.0,
            class: GapClass::Normal,
            semantic: GapSemantic::NotApplicable,
            penalty: 0.0,
            value_change_rel_pct: 0.0,
            exclusion_window_id: None,
        }
    }
}

/// A contiguous range where ≥ 2 mandatory channels are simultaneously
/// unavailable for ≥ 8 hours, proposed for removal subject to external
/// approval.
///
/// The id is content-derived (`ew-<start_s>-<end_s>`) so re-runs and
/// approval sidecars agree without a registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExclusionWindow {
    pub id: String,
    pub start_s: f64,
    pub end_s: f64,
    pub affected_channels: Vec<ChannelKind>,
    pub duration_hours: f64,
    /// False until the external approver says otherwise; unapproved
    /// candidates are pending and do not suppress data
    pub approved: bool,
}

impl ExclusionWindow {
    /// Content-derived stable identifier.
    pub fn stable_id(start_s: f64, end_s: f64) -> String {
        format!("ew-{}-{}", start_s.round() as i64, end_s.round() as i64)
    }

    /// Whether a grid time falls inside this window.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_s && t <= self.end_s
    }

    /// Whether two intervals overlap (inclusive bounds).
    pub fn overlaps(&self, start_s: f64, end_s: f64) -> bool {
        self.start_s <= end_s && start_s <= self.end_s
    }
}

/// One entry of the approvals sidecar file, keyed by window id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExclusionApproval {
    pub approved: bool,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_id_is_reproducible() {
        assert_eq!(ExclusionWindow::stable_id(3600.0, 36_000.0), "ew-3600-36000");
        assert_eq!(ExclusionWindow::stable_id(3600.4, 36_000.0), "ew-3600-36000");
    }

    #[test]
    fn test_window_contains_inclusive() {
        let w = ExclusionWindow {
            id: ExclusionWindow::stable_id(100.0, 200.0),
            start_s: 100.0,
            end_s: 200.0,
            affected_channels: vec![ChannelKind::Chwst, ChannelKind::Chwrt],
            duration_hours: 100.0 / 3600.0,
            approved: false,
        };
        assert!(w.contains(100.0));
        assert!(w.contains(200.0));
        assert!(!w.contains(200.5));
        assert!(w.overlaps(150.0, 300.0));
        assert!(!w.overlaps(201.0, 300.0));
    }
}
