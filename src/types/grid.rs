//! Synchronised-grid types
//!
//! Stage 3 collapses per-channel raw series onto one uniform grid. Every
//! aligned cell keeps its source index and jitter so a reviewer can walk
//! any grid value back to the raw sample it came from.

use serde::{Deserialize, Serialize};

use super::ChannelKind;

/// Alignment quality tier by absolute raw-to-grid distance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlignmentQuality {
    /// d < 60 s
    Exact,
    /// 60 s ≤ d < 300 s
    Close,
    /// 300 s ≤ d ≤ 1800 s
    Interp,
    /// d > 1800 s or no candidate at all
    Missing,
}

impl AlignmentQuality {
    /// Tier for an absolute distance in seconds.
    pub fn from_distance(d_s: f64) -> Self {
        if d_s < 60.0 {
            Self::Exact
        } else if d_s < 300.0 {
            Self::Close
        } else if d_s <= 1800.0 {
            Self::Interp
        } else {
            Self::Missing
        }
    }

    /// Confidence contribution of this tier.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Exact => 1.00,
            Self::Close => 0.95,
            Self::Interp => 0.80,
            Self::Missing => 0.00,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::Close => "CLOSE",
            Self::Interp => "INTERP",
            Self::Missing => "MISSING",
        }
    }
}

impl std::fmt::Display for AlignmentQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of one grid row across all mandatory channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RowClassification {
    /// All mandatory channels aligned with usable semantics
    Valid,
    /// A mandatory channel is Missing or carried a sensor anomaly
    MajorGap,
    /// Row lies inside an approved exclusion window
    Excluded,
}

impl RowClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::MajorGap => "MAJOR_GAP",
            Self::Excluded => "EXCLUDED",
        }
    }
}

impl std::fmt::Display for RowClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coverage tier over the valid-row fraction of the grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CoverageTier {
    /// ≥ 95 % valid
    Excellent,
    /// ≥ 90 %
    Good,
    /// ≥ 80 %
    Fair,
    /// Below 80 %
    Poor,
}

impl CoverageTier {
    pub fn from_valid_fraction(v: f64) -> Self {
        if v >= 0.95 {
            Self::Excellent
        } else if v >= 0.90 {
            Self::Good
        } else if v >= 0.80 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    /// Stage-3 confidence penalty for this tier (≤ 0).
    pub fn penalty(&self) -> f64 {
        match self {
            Self::Excellent => 0.00,
            Self::Good => -0.02,
            Self::Fair => -0.05,
            Self::Poor => -0.10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
        }
    }
}

/// One channel's cell on one grid row.
///
/// No interpolation: `value` is the chosen raw value or None.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AlignedPoint {
    pub value: Option<f64>,
    pub quality: AlignmentQuality,
    /// |raw time − grid time| in seconds (0.0 when Missing)
    pub jitter_s: f64,
    /// Index into the source channel's raw series
    pub source_index: Option<usize>,
}

impl AlignedPoint {
    pub fn missing() -> Self {
        Self {
            value: None,
            quality: AlignmentQuality::Missing,
            jitter_s: 0.0,
            source_index: None,
        }
    }
}

/// One channel aligned onto the common grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedColumn {
    pub channel: ChannelKind,
    pub points: Vec<AlignedPoint>,
}

/// The synchronised frame: uniform grid plus aligned channel columns and
/// row-level classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFrame {
    /// Nominal step T in seconds
    pub step_s: f64,
    /// Strictly increasing multiples of T
    pub grid_times: Vec<f64>,
    pub columns: Vec<AlignedColumn>,
    pub row_class: Vec<RowClassification>,
    /// Mean alignment confidence of mandatory channels (0.0 for
    /// MajorGap/Excluded rows)
    pub row_confidence: Vec<f64>,
}

impl SyncFrame {
    pub fn len(&self) -> usize {
        self.grid_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid_times.is_empty()
    }

    pub fn column(&self, kind: ChannelKind) -> Option<&AlignedColumn> {
        self.columns.iter().find(|c| c.channel == kind)
    }

    /// Aligned value of `kind` at row `i`, if present.
    pub fn value_at(&self, kind: ChannelKind, i: usize) -> Option<f64> {
        self.column(kind).and_then(|c| c.points.get(i)).and_then(|p| p.value)
    }
}
