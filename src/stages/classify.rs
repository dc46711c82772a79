//! Stage 0 — file classification and ingestion routing
//!
//! Maps each input file to a channel kind by pure matching against a
//! priority-ordered rule table on the normalised filename. Condenser
//! keywords are checked first because they are highly specific; the
//! generic `LOAD` keyword resolves to POWER last.

use regex::Regex;
use tracing::{debug, warn};

use crate::types::{ChannelKind, FileClassification, Stage0Metrics};

/// One entry of the priority-ordered rule table.
struct ClassifyRule {
    /// Rule name recorded in the audit trail
    name: &'static str,
    channel: ChannelKind,
    pattern: Regex,
    /// 1.0 exact abbreviation, 0.8 strong pattern, 0.6 generic keyword
    confidence: f64,
}

/// Filename classifier with the compiled rule table.
pub struct Classifier {
    rules: Vec<ClassifyRule>,
    equipment_pattern: Regex,
}

impl Classifier {
    pub fn new() -> Self {
        let rule = |name, channel, pattern: &str, confidence| ClassifyRule {
            name,
            channel,
            pattern: Regex::new(pattern).expect("classification rule patterns are static"),
            confidence,
        };

        // First match wins. CDWRT before the CHW rules: "COND" and "CDW"
        // never describe the evaporator loop, while "CHW.*ST" would
        // happily swallow a condenser tag.
        let rules = vec![
            rule("cdwrt_abbrev", ChannelKind::Cdwrt, r"\bCDWRT?\b|\bCDW\b", 1.0),
            rule("cdwrt_condenser", ChannelKind::Cdwrt, r"COND|CDW", 0.8),
            rule("chwst_abbrev", ChannelKind::Chwst, r"\bCHWST\b", 1.0),
            rule(
                "chwst_supply",
                ChannelKind::Chwst,
                r"CHW.*SUPPLY|CHW.*\bST\b|SUPPLY.*TEMP|LEAVING.*TEMP|CHW.*LEAV",
                0.8,
            ),
            rule("chwrt_abbrev", ChannelKind::Chwrt, r"\bCHWRT\b", 1.0),
            rule(
                "chwrt_return",
                ChannelKind::Chwrt,
                r"CHW.*RETURN|CHW.*\bRT\b|RETURN.*TEMP|ENTERING.*TEMP|CHW.*ENT",
                0.8,
            ),
            rule("power_abbrev", ChannelKind::Power, r"\bKW\b|POWER", 0.8),
            rule(
                "power_keyword",
                ChannelKind::Power,
                r"KILOWATT|WATT|ENERGY|ELEC|DEMAND|LOAD",
                0.6,
            ),
            rule("flow_abbrev", ChannelKind::Flow, r"FLOW|\bGPM\b|\bLPS\b|L/S", 0.8),
            rule("flow_keyword", ChannelKind::Flow, r"LITRE|GALLON|RATE", 0.6),
        ];

        Self {
            rules,
            equipment_pattern: Regex::new(r"\b(?:CHILLER|CH)[ ]?(\d+)\b")
                .expect("equipment pattern is static"),
        }
    }

    /// Uppercase, strip the extension, turn delimiters into single spaces.
    pub fn normalise_name(filename: &str) -> String {
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let stem = match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        };
        let mut out = String::with_capacity(stem.len());
        let mut last_space = true;
        for c in stem.chars() {
            let c = c.to_ascii_uppercase();
            if c == '-' || c == '_' || c == '.' || c.is_whitespace() {
                if !last_space {
                    out.push(' ');
                    last_space = true;
                }
            } else {
                out.push(c);
                last_space = false;
            }
        }
        out.trim_end().to_string()
    }

    /// Classify one filename. Unknown channels come back as `Other` with
    /// confidence 0.0 — surfaced in metrics, admitted only as auxiliary.
    pub fn classify(&self, filename: &str) -> FileClassification {
        let normalised = Self::normalise_name(filename);

        let equipment_id = self
            .equipment_pattern
            .captures(&normalised)
            .map(|c| format!("CH{}", &c[1]))
            .unwrap_or_else(|| "PLANT".to_string());

        for rule in &self.rules {
            if rule.pattern.is_match(&normalised) {
                debug!(
                    file = filename,
                    rule = rule.name,
                    channel = %rule.channel,
                    "Classified input file"
                );
                return FileClassification {
                    filename: filename.to_string(),
                    channel: rule.channel,
                    confidence: rule.confidence,
                    matched_rule: rule.name.to_string(),
                    equipment_id,
                };
            }
        }

        FileClassification {
            filename: filename.to_string(),
            channel: ChannelKind::Other,
            confidence: 0.0,
            matched_rule: "no_match".to_string(),
            equipment_id,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a batch of filenames and build the Stage 0 metrics record.
///
/// Missing mandatory channels are recorded but the HALT decision belongs
/// to the coordinator (auxiliary-only runs are legitimate for subsets).
pub fn run(filenames: &[String]) -> Stage0Metrics {
    let classifier = Classifier::new();
    let mut metrics = Stage0Metrics {
        files_total: filenames.len(),
        ..Default::default()
    };

    for filename in filenames {
        let classification = classifier.classify(filename);
        if classification.channel == ChannelKind::Other {
            metrics.files_unclassified += 1;
            metrics.warnings.push(format!(
                "{}: no classification rule matched — admitted as auxiliary only",
                filename
            ));
            warn!(file = %filename, "Unclassified input file");
        } else {
            metrics.files_classified += 1;
        }
        metrics.classifications.push(classification);
    }

    for channel in ChannelKind::MANDATORY {
        let covered = metrics
            .classifications
            .iter()
            .any(|c| c.channel == channel);
        if !covered {
            metrics.missing_mandatory.push(channel);
        }
    }

    metrics
}
