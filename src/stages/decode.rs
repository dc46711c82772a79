//! Stage 1a — encoding decoder
//!
//! BMS vendors export the same physical quantity as fractions, percents,
//! 0–1000/10k/100k counts, raw DAC counts, or plain analog values. The
//! decoder applies eight ordered rules to the robust stats of a signal
//! (first match wins) and yields a scaling decision plus a confidence tier.
//!
//! All scaling decisions read p99.5, never max: a single stuck-ADC spike
//! must not rescale the whole signal.

use crate::config::defaults;
use crate::types::{ConfidenceTier, EncodingDecision, RawStats};

/// Decoder verdict for one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOutcome {
    pub decision: EncodingDecision,
    pub confidence: ConfidenceTier,
}

/// p99.5 inside the ±10 % window around a nominal counts scale.
fn in_counts_window(p995: f64, nominal: f64) -> bool {
    p995 > nominal * (1.0 - defaults::COUNTS_WINDOW)
        && p995 <= nominal * (1.0 + defaults::COUNTS_WINDOW)
}

/// Apply the eight-rule table to a signal's robust stats.
pub fn decode(stats: &RawStats) -> DecodeOutcome {
    use ConfidenceTier::*;
    use EncodingDecision::*;

    if stats.count == 0 {
        return DecodeOutcome {
            decision: NoData,
            confidence: VeryLow,
        };
    }

    // Rule 1: already a fraction.
    if stats.max <= defaults::FRACTION_MAX && stats.min >= defaults::FRACTION_MIN {
        return DecodeOutcome {
            decision: Fraction01,
            confidence: High,
        };
    }

    // Rule 2: percent scale.
    if stats.max <= defaults::PERCENT_MAX && stats.min >= defaults::PERCENT_MIN {
        return DecodeOutcome {
            decision: Percent0To100,
            confidence: High,
        };
    }

    // Rules 3–5: counts buckets, most common first.
    if in_counts_window(stats.p995, 10_000.0) {
        return DecodeOutcome {
            decision: Counts10k,
            confidence: High,
        };
    }
    if in_counts_window(stats.p995, 1_000.0) {
        return DecodeOutcome {
            decision: Counts1k,
            confidence: High,
        };
    }
    if in_counts_window(stats.p995, 100_000.0) {
        return DecodeOutcome {
            decision: Counts100k,
            confidence: High,
        };
    }

    // Rule 6: raw counts beyond any named bucket.
    if stats.p995 > defaults::LARGE_COUNTS_MIN {
        return DecodeOutcome {
            decision: LargeRawCounts { divisor: stats.p995 },
            confidence: Medium,
        };
    }

    // Rule 7: plain analog range.
    if stats.p995 > defaults::ANALOG_MIN {
        return DecodeOutcome {
            decision: UnscaledAnalog { divisor: stats.p995 },
            confidence: Medium,
        };
    }

    // Rule 8: percentile window, or /100 when the window collapses.
    let scale = stats.p995 - stats.p005;
    if scale > 0.0 {
        DecodeOutcome {
            decision: PercentileRange {
                p005: stats.p005,
                p995: stats.p995,
            },
            confidence: Low,
        }
    } else {
        DecodeOutcome {
            decision: Fallback,
            confidence: VeryLow,
        }
    }
}

/// Normalise raw values under a decision: `(v − offset) / scale`, clipped
/// to [0, 1.2] so transient overshoot stays visible. Non-finite inputs
/// pass through as NaN.
pub fn normalise(values: &[f64], decision: &EncodingDecision) -> Vec<f64> {
    let offset = decision.offset();
    let scale = decision.scale();
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return f64::NAN;
            }
            ((v - offset) / scale).clamp(0.0, defaults::NORMALISED_CLIP)
        })
        .collect()
}
