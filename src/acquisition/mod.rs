//! BMS export acquisition
//!
//! Reads per-sensor time-series exports into `Signal`s. The reader is a
//! deliberately thin collaborator: it presents rows in original order,
//! never pre-interpolates, and does not interpret calendar semantics —
//! timestamps are numeric seconds (true epoch or serial-zero, the core
//! only cares about ordering and intervals).
//!
//! Duplicate timestamps are merged by value-equality; non-equal
//! duplicates keep the earlier-indexed record with a warning. A timestamp
//! reversal is fatal.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ChannelKind, FileClassification, Signal};

/// Errors raised while ingesting an export.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("I/O error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: no data rows")]
    Empty { file: String },

    #[error("{file}: no numeric timestamp/value column pair found")]
    NoNumericColumns { file: String },

    #[error("{file}: timestamp reversal at row {row}")]
    TimestampReversal { file: String, row: usize },
}

/// One parsed export before it becomes a `Signal`.
#[derive(Debug, Clone)]
pub struct RawSeries {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
    /// Unit string extracted from the value column header, e.g. "degC"
    /// from `Temperature (degC)`
    pub reported_unit: Option<String>,
    pub warnings: Vec<String>,
}

/// A source of one channel's raw series.
///
/// The single production implementation reads CSV exports; tests inject
/// synthetic sources through the same seam.
pub trait SignalSource {
    fn filename(&self) -> &str;
    fn read(&self) -> Result<RawSeries, AcquisitionError>;
}

/// CSV export reader: quote-aware splitting, header detection,
/// first-numeric-column timestamp selection, null-row skipping.
pub struct CsvExportReader {
    path: PathBuf,
}

impl CsvExportReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Split a CSV line respecting quoted fields (handles commas inside
/// quotes and doubled-quote escapes).
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn parse_numeric(field: &str) -> Option<f64> {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "null" | "nan" | "n/a" | "-" => None,
        _ => trimmed.parse::<f64>().ok(),
    }
}

/// Extract a unit hint from a header cell like `Supply Temp (degC)`.
fn unit_from_header(header: &str) -> Option<String> {
    let start = header.find('(')?;
    let end = header[start..].find(')')? + start;
    let unit = header[start + 1..end].trim();
    (!unit.is_empty()).then(|| unit.to_string())
}

impl SignalSource for CsvExportReader {
    fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<unnamed>")
    }

    fn read(&self) -> Result<RawSeries, AcquisitionError> {
        let file_label = self.filename().to_string();
        let file = std::fs::File::open(&self.path).map_err(|source| AcquisitionError::Io {
            file: file_label.clone(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut warnings = Vec::new();
        let mut reported_unit = None;
        let mut ts_col: Option<usize> = None;
        let mut value_col: Option<usize> = None;

        let mut timestamps: Vec<f64> = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        let mut non_equal_duplicates = 0usize;

        for (row, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| AcquisitionError::Io {
                file: file_label.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = csv_split(&line);

            // Column selection: first row whose cells parse numerically
            // fixes the (timestamp, value) pair; anything before it is
            // header material.
            if ts_col.is_none() {
                let numeric: Vec<usize> = fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| parse_numeric(f).is_some())
                    .map(|(i, _)| i)
                    .collect();
                if numeric.len() >= 2 {
                    ts_col = Some(numeric[0]);
                    value_col = Some(numeric[1]);
                } else {
                    // Header row: mine the value column's unit hint.
                    for cell in &fields {
                        if reported_unit.is_none() {
                            reported_unit = unit_from_header(cell);
                        }
                    }
                    continue;
                }
            }
            let (tc, vc) = (
                ts_col.expect("set above"),
                value_col.expect("set with ts_col"),
            );
            let (Some(t), value) = (
                fields.get(tc).and_then(|f| parse_numeric(f)),
                fields.get(vc).and_then(|f| parse_numeric(f)),
            ) else {
                continue;
            };
            // Null value rows are COV artefacts; skip, never interpolate.
            let Some(v) = value else { continue };

            match timestamps.last() {
                Some(&last) if t == last => {
                    let last_value = *values.last().expect("parallel vectors");
                    if (last_value - v).abs() > f64::EPSILON {
                        non_equal_duplicates += 1;
                    }
                    // Keep the earlier-indexed record either way.
                }
                Some(&last) if t < last => {
                    return Err(AcquisitionError::TimestampReversal {
                        file: file_label,
                        row,
                    });
                }
                _ => {
                    timestamps.push(t);
                    values.push(v);
                }
            }
        }

        if ts_col.is_none() {
            return Err(AcquisitionError::NoNumericColumns { file: file_label });
        }
        if timestamps.is_empty() {
            return Err(AcquisitionError::Empty { file: file_label });
        }
        if non_equal_duplicates > 0 {
            let w = format!(
                "{}: {} duplicate timestamp(s) with differing values — kept the earlier record",
                file_label, non_equal_duplicates
            );
            warn!("{}", w);
            warnings.push(w);
        }

        debug!(
            file = %file_label,
            rows = timestamps.len(),
            unit = reported_unit.as_deref().unwrap_or("-"),
            "Loaded export"
        );

        Ok(RawSeries {
            timestamps,
            values,
            reported_unit,
            warnings,
        })
    }
}

/// Build a `Signal` from a classified source.
pub fn load_signal(
    source: &dyn SignalSource,
    classification: &FileClassification,
) -> Result<(Signal, Vec<String>), AcquisitionError> {
    let series = source.read()?;
    Ok((
        Signal {
            channel: classification.channel,
            equipment_id: classification.equipment_id.clone(),
            source_file: classification.filename.clone(),
            vendor_hint: None,
            reported_unit: series.reported_unit,
            timestamps: series.timestamps,
            values: series.values,
        },
        series.warnings,
    ))
}

/// List CSV exports in a directory, sorted by filename for determinism.
pub fn list_exports(input_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}
