//! Channel and signal types
//!
//! A `Signal` is one physical channel's raw time series as exported by the
//! building-management system, with enough provenance (source file, vendor
//! hint, reported unit) to audit every later transformation against it.

use serde::{Deserialize, Serialize};

use crate::stats;

/// Physical channel kind at a piece of plant equipment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ChannelKind {
    /// Chilled-water supply temperature
    Chwst,
    /// Chilled-water return temperature
    Chwrt,
    /// Condenser-water return temperature
    Cdwrt,
    /// Chilled-water flow
    Flow,
    /// Electrical power draw
    Power,
    /// Load / capacity fraction (auxiliary, often counts-encoded)
    Load,
    /// Anything the classifier could not place
    #[default]
    Other,
}

impl ChannelKind {
    /// The five BMD (Bare Minimum Data) channels required for Q and COP.
    pub const MANDATORY: [ChannelKind; 5] = [
        ChannelKind::Chwst,
        ChannelKind::Chwrt,
        ChannelKind::Cdwrt,
        ChannelKind::Flow,
        ChannelKind::Power,
    ];

    /// Whether this channel participates in BMD requirements.
    pub fn is_mandatory(&self) -> bool {
        Self::MANDATORY.contains(self)
    }

    /// Temperature channels take the unit-verifier path on raw values;
    /// everything else goes through the encoding decoder.
    pub fn is_temperature(&self) -> bool {
        matches!(self, ChannelKind::Chwst | ChannelKind::Chwrt | ChannelKind::Cdwrt)
    }

    /// Short code for logging and CSV column prefixes.
    pub fn short_code(&self) -> &'static str {
        match self {
            ChannelKind::Chwst => "CHWST",
            ChannelKind::Chwrt => "CHWRT",
            ChannelKind::Cdwrt => "CDWRT",
            ChannelKind::Flow => "FLOW",
            ChannelKind::Power => "POWER",
            ChannelKind::Load => "LOAD",
            ChannelKind::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_code())
    }
}

/// One channel's raw time series for a single piece of equipment.
///
/// Invariant: `timestamps` is strictly increasing after ingestion.
/// Duplicate timestamps are merged by the reader; a reversal is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub channel: ChannelKind,
    /// Equipment identifier carried from the source filename (e.g. "CH1")
    pub equipment_id: String,
    /// Source file this series came from
    pub source_file: String,
    /// Vendor hint from the export, when one was recognised
    #[serde(default)]
    pub vendor_hint: Option<String>,
    /// Unit string as reported by the BMS, unverified
    #[serde(default)]
    pub reported_unit: Option<String>,
    /// Seconds — true epoch or serial-zero; ordering and intervals are
    /// primary, calendar mapping is optional metadata only
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

impl Signal {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// First and last timestamp, if any samples exist.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(&a), Some(&b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Robust summary statistics over the finite subset of values.
    pub fn raw_stats(&self) -> RawStats {
        RawStats::compute(&self.values)
    }
}

/// Robust summary statistics for a raw signal.
///
/// p99.5 is preferred over max for scaling decisions and p0.5 over min for
/// baseline decisions: a single stuck-ADC spike must not rescale a year of
/// data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RawStats {
    /// Finite sample count (NaN/inf excluded)
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    /// 0.5th percentile
    pub p005: f64,
    /// 99.5th percentile
    pub p995: f64,
}

impl RawStats {
    /// Compute stats over the finite subset of `values`.
    ///
    /// All fields are 0.0 with `count == 0` when no finite values exist.
    pub fn compute(values: &[f64]) -> Self {
        let mut finite = stats::finite(values);
        if finite.is_empty() {
            return Self {
                count: 0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
                p005: 0.0,
                p995: 0.0,
            };
        }
        finite.sort_by(|a, b| a.partial_cmp(b).expect("finite values compare"));
        let (mean, std) = stats::mean_std(&finite);
        Self {
            count: finite.len(),
            min: finite[0],
            max: finite[finite.len() - 1],
            mean,
            std,
            p005: stats::quantile_sorted(&finite, 0.005),
            p995: stats::quantile_sorted(&finite, 0.995),
        }
    }
}
