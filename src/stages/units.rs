//! Stage 1b — unit verification and conversion
//!
//! Chooses the canonical unit for each BMD channel: metadata hint first,
//! then robust magnitude ranges (mean for temperatures, p99.5 for flow and
//! power). Counts-encoded flow/power channels take the decoder's
//! normalised fraction anchored by design flow or nameplate instead.
//!
//! Unit confidence starts at 1.0 and is charged for: undeterminable unit
//! (0.30), ambiguous magnitude overlap (0.20), values outside the
//! plausible canonical range (0.05), any conversion applied (0.02).

use tracing::debug;

use crate::config::{defaults, PlantConfig};
use crate::confidence::PenaltyLedger;
use crate::types::{
    CanonicalUnit, ChannelKind, EncodingDecision, RawStats, SourceUnit, UnitDecision,
};

use super::decode::DecodeOutcome;

/// Unit verdict for one channel.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub decision: UnitDecision,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// Whether a decode decision marks a clearly counts-encoded channel that
/// needs an external anchor (design flow / nameplate) to become physical.
fn is_counts_encoded(decision: &EncodingDecision) -> bool {
    matches!(
        decision,
        EncodingDecision::Percent0To100
            | EncodingDecision::Counts1k
            | EncodingDecision::Counts10k
            | EncodingDecision::Counts100k
            | EncodingDecision::LargeRawCounts { .. }
    )
}

/// Parse a reported-unit string into a source unit, if recognisable.
fn parse_reported_unit(raw: &str) -> Option<SourceUnit> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '°' && *c != '.')
        .collect::<String>()
        .to_ascii_uppercase();
    match cleaned.as_str() {
        "C" | "DEGC" | "CELSIUS" => Some(SourceUnit::Celsius),
        "F" | "DEGF" | "FAHRENHEIT" => Some(SourceUnit::Fahrenheit),
        "K" | "KELVIN" => Some(SourceUnit::Kelvin),
        "M3/S" | "M3S" => Some(SourceUnit::CubicMetresPerSecond),
        "L/S" | "LS" | "LPS" => Some(SourceUnit::LitresPerSecond),
        "GPM" | "GAL/MIN" => Some(SourceUnit::GallonsPerMinute),
        "M3/H" | "M3H" | "CMH" => Some(SourceUnit::CubicMetresPerHour),
        "MW" => Some(SourceUnit::Megawatts),
        "KW" => Some(SourceUnit::Kilowatts),
        "W" | "WATT" | "WATTS" => Some(SourceUnit::Watts),
        "%" | "PCT" | "PERCENT" => Some(SourceUnit::NormalizedFraction),
        _ => None,
    }
}

/// Conversion parameters for a detected source unit.
fn conversion_for(unit: SourceUnit) -> UnitDecision {
    let (canonical, offset, factor) = match unit {
        SourceUnit::Celsius => (CanonicalUnit::TemperatureC, 0.0, 1.0),
        SourceUnit::Fahrenheit => (CanonicalUnit::TemperatureC, 32.0, 5.0 / 9.0),
        SourceUnit::Kelvin => (CanonicalUnit::TemperatureC, 273.15, 1.0),
        SourceUnit::CubicMetresPerSecond => (CanonicalUnit::FlowM3s, 0.0, 1.0),
        SourceUnit::LitresPerSecond => (CanonicalUnit::FlowM3s, 0.0, 1e-3),
        SourceUnit::GallonsPerMinute => (CanonicalUnit::FlowM3s, 0.0, defaults::GPM_TO_M3S),
        SourceUnit::CubicMetresPerHour => (CanonicalUnit::FlowM3s, 0.0, 1.0 / 3600.0),
        SourceUnit::Megawatts => (CanonicalUnit::PowerKw, 0.0, 1_000.0),
        SourceUnit::Kilowatts => (CanonicalUnit::PowerKw, 0.0, 1.0),
        SourceUnit::Watts => (CanonicalUnit::PowerKw, 0.0, 1e-3),
        // A channel whose unit cannot be pinned to a physical category is
        // kept as-is and excluded from physical derivations downstream.
        SourceUnit::NormalizedFraction | SourceUnit::Unknown => {
            (CanonicalUnit::Dimensionless, 0.0, 1.0)
        }
    };
    UnitDecision {
        canonical,
        detected: unit,
        offset,
        factor,
        from_metadata: false,
    }
}

/// Temperature detection by mean magnitude. Returns the candidate list in
/// priority order; more than one candidate means ambiguity.
fn temperature_candidates(mean: f64) -> Vec<SourceUnit> {
    let mut candidates = Vec::new();
    let (c_lo, c_hi) = defaults::TEMP_C_RANGE;
    let (f_lo, f_hi) = defaults::TEMP_F_RANGE;
    let (k_lo, k_hi) = defaults::TEMP_K_RANGE;
    if mean >= c_lo && mean <= c_hi {
        candidates.push(SourceUnit::Celsius);
    }
    if mean >= f_lo && mean <= f_hi {
        candidates.push(SourceUnit::Fahrenheit);
    }
    if mean >= k_lo && mean <= k_hi {
        candidates.push(SourceUnit::Kelvin);
    }
    candidates
}

/// Flow detection by robust max (p99.5) magnitude, in priority order.
fn flow_candidates(p995: f64) -> Vec<SourceUnit> {
    let mut candidates = Vec::new();
    if p995 < defaults::FLOW_M3S_MAX {
        candidates.push(SourceUnit::CubicMetresPerSecond);
    }
    let (lo, hi) = defaults::FLOW_LS_RANGE;
    if p995 >= lo && p995 <= hi {
        candidates.push(SourceUnit::LitresPerSecond);
    }
    let (lo, hi) = defaults::FLOW_GPM_RANGE;
    if p995 >= lo && p995 <= hi {
        candidates.push(SourceUnit::GallonsPerMinute);
    }
    let (lo, hi) = defaults::FLOW_M3H_RANGE;
    if p995 > lo && p995 <= hi {
        candidates.push(SourceUnit::CubicMetresPerHour);
    }
    candidates
}

/// Power detection by robust max (p99.5) magnitude, in priority order.
fn power_candidates(p995: f64) -> Vec<SourceUnit> {
    let mut candidates = Vec::new();
    if p995 < defaults::POWER_MW_MAX {
        candidates.push(SourceUnit::Megawatts);
    }
    let (lo, hi) = defaults::POWER_KW_RANGE;
    if p995 >= lo && p995 <= hi {
        candidates.push(SourceUnit::Kilowatts);
    }
    if p995 > defaults::POWER_W_MIN {
        candidates.push(SourceUnit::Watts);
    }
    candidates
}

/// Pick from magnitude candidates, charging ambiguity when several ranges
/// overlap and nothing disambiguates.
fn pick_candidate(
    channel: ChannelKind,
    candidates: Vec<SourceUnit>,
    ledger: &mut PenaltyLedger,
    warnings: &mut Vec<String>,
) -> UnitDecision {
    match candidates.len() {
        0 => {
            ledger.charge("unit could not be determined", defaults::PENALTY_UNIT_MISSING);
            warnings.push(format!(
                "{}: no unit hint and magnitude matched no known range — values kept as-is",
                channel
            ));
            conversion_for(SourceUnit::Unknown)
        }
        1 => conversion_for(candidates[0]),
        _ => {
            ledger.charge(
                "magnitude range matches several units",
                defaults::PENALTY_UNIT_AMBIGUOUS,
            );
            warnings.push(format!(
                "{}: magnitude matches {:?} — taking {:?} by priority",
                channel,
                candidates.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
                candidates[0].as_str()
            ));
            conversion_for(candidates[0])
        }
    }
}

/// Nameplate anchoring for power: among the magnitude candidates, prefer
/// the one whose converted p99.5 lands in a plausible band around the
/// rated capacity.
fn anchor_power_by_nameplate(
    candidates: &[SourceUnit],
    p995: f64,
    nameplate_kw: f64,
) -> Option<SourceUnit> {
    candidates.iter().copied().find(|&unit| {
        let decision = conversion_for(unit);
        let converted = decision.convert(p995);
        converted >= 0.1 * nameplate_kw && converted <= 1.2 * nameplate_kw
    })
}

/// Verify the unit of one channel and decide its conversion.
pub fn verify(
    channel: ChannelKind,
    stats: &RawStats,
    reported_unit: Option<&str>,
    decode: &DecodeOutcome,
    config: &PlantConfig,
) -> UnitOutcome {
    let mut ledger = PenaltyLedger::new(1.0);
    let mut warnings = Vec::new();

    // A "%" hint is not a physical unit — it confirms counts encoding,
    // so it falls through to the anchored route below.
    let hinted = reported_unit
        .and_then(parse_reported_unit)
        .filter(|u| *u != SourceUnit::NormalizedFraction);

    let mut decision = match hinted {
        // Metadata hint wins outright.
        Some(unit) => {
            let mut d = conversion_for(unit);
            d.from_metadata = true;
            d
        }
        None => match channel {
            c if c.is_temperature() => {
                let candidates = temperature_candidates(stats.mean);
                pick_candidate(channel, candidates, &mut ledger, &mut warnings)
            }
            ChannelKind::Flow => {
                if is_counts_encoded(&decode.decision) {
                    match config.design_flow_m3s {
                        Some(design) => UnitDecision {
                            canonical: CanonicalUnit::FlowM3s,
                            detected: SourceUnit::NormalizedFraction,
                            offset: 0.0,
                            factor: design,
                            from_metadata: false,
                        },
                        None => {
                            ledger.charge(
                                "counts-encoded flow with no design flow anchor",
                                defaults::PENALTY_UNIT_MISSING,
                            );
                            warnings.push(
                                "FLOW: counts-encoded with no design_flow_m3s — left dimensionless"
                                    .to_string(),
                            );
                            UnitDecision::identity(
                                CanonicalUnit::Dimensionless,
                                SourceUnit::NormalizedFraction,
                            )
                        }
                    }
                } else {
                    let candidates = flow_candidates(stats.p995);
                    pick_candidate(channel, candidates, &mut ledger, &mut warnings)
                }
            }
            ChannelKind::Power => {
                if is_counts_encoded(&decode.decision) {
                    match config.nameplate_kw {
                        Some(nameplate) => UnitDecision {
                            canonical: CanonicalUnit::PowerKw,
                            detected: SourceUnit::NormalizedFraction,
                            offset: 0.0,
                            factor: nameplate,
                            from_metadata: false,
                        },
                        None => {
                            ledger.charge(
                                "counts-encoded power with no nameplate anchor",
                                defaults::PENALTY_UNIT_MISSING,
                            );
                            warnings.push(
                                "POWER: counts-encoded with no nameplate_kw — left dimensionless, COP will be unavailable"
                                    .to_string(),
                            );
                            UnitDecision::identity(
                                CanonicalUnit::Dimensionless,
                                SourceUnit::NormalizedFraction,
                            )
                        }
                    }
                } else {
                    let candidates = power_candidates(stats.p995);
                    let anchored = config
                        .nameplate_kw
                        .and_then(|kw| anchor_power_by_nameplate(&candidates, stats.p995, kw));
                    match anchored {
                        Some(unit) => conversion_for(unit),
                        None => pick_candidate(channel, candidates, &mut ledger, &mut warnings),
                    }
                }
            }
            // LOAD and auxiliary channels stay as normalised fractions.
            _ => UnitDecision::identity(CanonicalUnit::Dimensionless, SourceUnit::NormalizedFraction),
        },
    };

    if decision.is_conversion() {
        ledger.charge("conversion applied", defaults::PENALTY_UNIT_CONVERSION);
    }

    // Nameplate sanity on the converted power ceiling.
    if channel == ChannelKind::Power && decision.canonical == CanonicalUnit::PowerKw {
        if let Some(nameplate) = config.nameplate_kw {
            let converted_p995 = if decision.detected == SourceUnit::NormalizedFraction {
                // Anchored route applies the factor to the normalised fraction.
                decision.factor
            } else {
                decision.convert(stats.p995)
            };
            if converted_p995 > defaults::NAMEPLATE_EXCEEDANCE_FACTOR * nameplate {
                ledger.charge(
                    "power exceeds nameplate plausibility",
                    defaults::PENALTY_UNIT_OUT_OF_RANGE,
                );
                warnings.push(format!(
                    "POWER: converted p99.5 {:.0} kW exceeds {:.1}x nameplate ({:.0} kW)",
                    converted_p995,
                    defaults::NAMEPLATE_EXCEEDANCE_FACTOR,
                    nameplate
                ));
            }
        }
    }

    // A metadata hint we could not parse is worth flagging but not the
    // full missing-unit charge — the magnitude path above already ran.
    if let Some(raw) = reported_unit {
        if parse_reported_unit(raw).is_none() {
            warnings.push(format!(
                "{}: unrecognised reported unit {:?} — fell back to magnitude detection",
                channel, raw
            ));
        } else {
            decision.from_metadata = true;
        }
    }

    debug!(
        channel = %channel,
        detected = decision.detected.as_str(),
        canonical = decision.canonical.as_str(),
        factor = decision.factor,
        confidence = ledger.value(),
        "Unit decision"
    );

    UnitOutcome {
        decision,
        confidence: ledger.value(),
        warnings,
    }
}
