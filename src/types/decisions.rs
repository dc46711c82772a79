//! Encoding and unit decision types
//!
//! Stage 1 records, for every channel, *how* the raw numbers were read:
//! which of the eight encoding rules fired and which source unit was
//! detected. Decisions are tagged variants, never strings — exhaustive
//! handling is a property of the type system.

use serde::{Deserialize, Serialize};

/// Confidence tier attached to a decode or unit decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::VeryLow => "VERY_LOW",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the eight decoder rules matched a signal's raw values.
///
/// Each variant carries enough to reproduce the normalisation
/// `(value - offset()) / scale()` exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum EncodingDecision {
    /// Values already in [−0.05, 1.05]
    Fraction01,
    /// Percent scale, values in [−5, 110]
    Percent0To100,
    /// Counts with p99.5 in (900, 1100]
    Counts1k,
    /// Counts with p99.5 in (9000, 11000]
    Counts10k,
    /// Counts with p99.5 in (90 000, 110 000]
    Counts100k,
    /// p99.5 above 30 000 with no counts bucket match; divisor is p99.5
    LargeRawCounts { divisor: f64 },
    /// Analog range 150–30 000; divisor is p99.5
    UnscaledAnalog { divisor: f64 },
    /// Last-resort percentile window
    PercentileRange { p005: f64, p995: f64 },
    /// No finite samples at all
    NoData,
    /// PercentileRange collapsed (p99.5 ≤ p0.5); divide by 100
    Fallback,
}

impl EncodingDecision {
    /// Offset subtracted before scaling.
    pub fn offset(&self) -> f64 {
        match self {
            Self::PercentileRange { p005, .. } => *p005,
            _ => 0.0,
        }
    }

    /// Scale divisor. Always > 0 for variants that normalise.
    pub fn scale(&self) -> f64 {
        match self {
            Self::Fraction01 | Self::NoData => 1.0,
            Self::Percent0To100 | Self::Fallback => 100.0,
            Self::Counts1k => 1_000.0,
            Self::Counts10k => 10_000.0,
            Self::Counts100k => 100_000.0,
            Self::LargeRawCounts { divisor } | Self::UnscaledAnalog { divisor } => *divisor,
            Self::PercentileRange { p005, p995 } => p995 - p005,
        }
    }

    /// Stable label for metrics artifacts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fraction01 => "fraction_0_1",
            Self::Percent0To100 => "percent_0_100",
            Self::Counts1k => "counts_1k",
            Self::Counts10k => "counts_10k",
            Self::Counts100k => "counts_100k",
            Self::LargeRawCounts { .. } => "large_raw_counts",
            Self::UnscaledAnalog { .. } => "unscaled_analog",
            Self::PercentileRange { .. } => "percentile_range",
            Self::NoData => "no_data",
            Self::Fallback => "fallback_div100",
        }
    }
}

/// Canonical unit category a channel is converted into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CanonicalUnit {
    TemperatureC,
    FlowM3s,
    PowerKw,
    Dimensionless,
}

impl CanonicalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemperatureC => "degC",
            Self::FlowM3s => "m3_per_s",
            Self::PowerKw => "kW",
            Self::Dimensionless => "fraction",
        }
    }
}

/// Source unit detected by metadata hint or magnitude range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
    CubicMetresPerSecond,
    LitresPerSecond,
    GallonsPerMinute,
    CubicMetresPerHour,
    Megawatts,
    Kilowatts,
    Watts,
    /// Counts-encoded channel scaled by the decoder, then anchored
    NormalizedFraction,
    Unknown,
}

impl SourceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
            Self::Kelvin => "K",
            Self::CubicMetresPerSecond => "m3/s",
            Self::LitresPerSecond => "L/s",
            Self::GallonsPerMinute => "GPM",
            Self::CubicMetresPerHour => "m3/h",
            Self::Megawatts => "MW",
            Self::Kilowatts => "kW",
            Self::Watts => "W",
            Self::NormalizedFraction => "normalized",
            Self::Unknown => "unknown",
        }
    }
}

/// How a channel's raw values map into its canonical unit:
/// `canonical = (raw − offset) × factor`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UnitDecision {
    pub canonical: CanonicalUnit,
    pub detected: SourceUnit,
    /// Subtracted before the factor (32 for °F, 273.15 for K, else 0)
    pub offset: f64,
    /// Multiplicative conversion factor
    pub factor: f64,
    /// True when the detection came from the reported-unit string rather
    /// than the magnitude heuristic
    pub from_metadata: bool,
}

impl UnitDecision {
    /// Identity decision for a channel already in canonical units.
    pub fn identity(canonical: CanonicalUnit, detected: SourceUnit) -> Self {
        Self {
            canonical,
            detected,
            offset: 0.0,
            factor: 1.0,
            from_metadata: false,
        }
    }

    /// Apply the conversion to one raw value.
    pub fn convert(&self, raw: f64) -> f64 {
        (raw - self.offset) * self.factor
    }

    /// Whether any numeric change is applied at all.
    pub fn is_conversion(&self) -> bool {
        self.offset != 0.0 || self.factor != 1.0
    }
}
