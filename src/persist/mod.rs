//! Run-artifact persistence
//!
//! Writes the per-stage data artifacts and metrics records described by
//! the pipeline contract, plus `halt.json` on a data-fatal stop and the
//! aggregate `run_report.json`. Reads the exclusion-approval sidecar.
//!
//! CSV artifacts are written by hand — the layouts are fixed and narrow,
//! and quoting is never needed for numeric/enum cells.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::OutputFormat;
use crate::stages::derive::DerivedFrame;
use crate::stages::gap_scan::GapDataset;
use crate::stages::verify::VerifiedDataset;
use crate::types::{
    ChannelKind, ExclusionApproval, HaltInfo, PipelineReport, SyncFrame,
};

/// Approvals sidecar filename, written by the external approver.
pub const APPROVALS_FILE: &str = "approvals.json";

fn write_json<T: Serialize>(out_dir: &Path, name: &str, value: &T) -> Result<()> {
    let path = out_dir.join(name);
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialising {}", name))?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn write_text(out_dir: &Path, name: &str, content: &str) -> Result<()> {
    let path = out_dir.join(name);
    std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.6}", x)).unwrap_or_default()
}

/// Resolve the effective tabular format. Parquet is not part of this
/// build's output stack; it degrades to CSV with a warning.
pub fn effective_format(requested: OutputFormat) -> OutputFormat {
    if requested == OutputFormat::Parquet {
        warn!("parquet output not available in this build — falling back to csv");
        OutputFormat::Csv
    } else {
        requested
    }
}

// ============================================================================
// Stage 0
// ============================================================================

pub fn write_stage0(out_dir: &Path, metrics: &crate::types::Stage0Metrics) -> Result<()> {
    write_json(out_dir, "stage0_classification.json", metrics)
}

// ============================================================================
// Stage 1
// ============================================================================

/// Long-format verified table: one row per (channel, sample), original and
/// converted values side by side.
pub fn write_stage1(
    out_dir: &Path,
    dataset: &VerifiedDataset,
    metrics: &crate::types::Stage1Metrics,
    format: OutputFormat,
) -> Result<()> {
    write_json(out_dir, "stage1_metrics.json", metrics)?;

    match effective_format(format) {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Row<'a> {
                channel: &'a str,
                timestamp_s: f64,
                original: f64,
                normalised: Option<f64>,
                canonical: f64,
                canonical_unit: &'a str,
                operational_state: Option<&'a str>,
            }
            let mut rows = Vec::new();
            for channel in &dataset.channels {
                let is_reference = channel.signal.channel == ChannelKind::Chwst;
                for i in 0..channel.signal.len() {
                    rows.push(Row {
                        channel: channel.signal.channel.short_code(),
                        timestamp_s: channel.signal.timestamps[i],
                        original: channel.signal.values[i],
                        normalised: channel.normalised.get(i).copied(),
                        canonical: channel.canonical[i],
                        canonical_unit: channel.unit.canonical.as_str(),
                        operational_state: is_reference
                            .then(|| dataset.states[i].short_code()),
                    });
                }
            }
            write_json(out_dir, "stage1_verified.json", &rows)
        }
        _ => {
            let mut out = String::from(
                "channel,timestamp_s,original,normalised,canonical,canonical_unit,operational_state\n",
            );
            for channel in &dataset.channels {
                let is_reference = channel.signal.channel == ChannelKind::Chwst;
                for i in 0..channel.signal.len() {
                    let state: &str = if is_reference {
                        dataset.states[i].short_code()
                    } else {
                        ""
                    };
                    writeln!(
                        out,
                        "{},{},{},{},{},{},{}",
                        channel.signal.channel.short_code(),
                        channel.signal.timestamps[i],
                        channel.signal.values[i],
                        fmt_opt(channel.normalised.get(i).copied()),
                        channel.canonical[i],
                        channel.unit.canonical.as_str(),
                        state,
                    )
                    .expect("string writes are infallible");
                }
            }
            write_text(out_dir, "stage1_verified.csv", &out)
        }
    }
}

// ============================================================================
// Stage 2
// ============================================================================

pub fn write_stage2(
    out_dir: &Path,
    dataset: &VerifiedDataset,
    gaps: &GapDataset,
    metrics: &crate::types::Stage2Metrics,
) -> Result<()> {
    write_json(out_dir, "stage2_report.json", metrics)?;

    for channel_gaps in &gaps.channels {
        let channel = channel_gaps.channel;
        let Some(verified) = dataset.channel(channel) else {
            continue;
        };
        let mut out = String::from(
            "timestamp_s,gap_before_duration_s,gap_before_class,gap_before_semantic,\
             gap_before_confidence,value_changed_relative_pct,exclusion_window_id\n",
        );
        for (i, annotation) in channel_gaps.annotations.iter().enumerate() {
            writeln!(
                out,
                "{},{},{},{},{:.2},{:.4},{}",
                verified.signal.timestamps[i],
                annotation.duration_s,
                annotation.class,
                annotation.semantic,
                1.0 + annotation.penalty,
                annotation.value_change_rel_pct,
                annotation.exclusion_window_id.as_deref().unwrap_or(""),
            )
            .expect("string writes are infallible");
        }
        let name = format!("stage2_{}_gaps.csv", channel.short_code().to_lowercase());
        write_text(out_dir, &name, &out)?;
    }
    Ok(())
}

// ============================================================================
// Stage 3
// ============================================================================

pub fn write_stage3(
    out_dir: &Path,
    frame: &SyncFrame,
    metrics: &crate::types::Stage3Metrics,
    format: OutputFormat,
) -> Result<()> {
    write_json(out_dir, "stage3_metrics.json", metrics)?;

    if effective_format(format) == OutputFormat::Json {
        return write_json(out_dir, "stage3_synchronized.json", frame);
    }

    let mut header = String::from("grid_time");
    for column in &frame.columns {
        let code = column.channel.short_code().to_lowercase();
        write!(header, ",{0}_value,{0}_quality,{0}_jitter_s", code)
            .expect("string writes are infallible");
    }
    header.push_str(",gap_type,row_confidence\n");

    let mut out = header;
    for i in 0..frame.len() {
        write!(out, "{}", frame.grid_times[i]).expect("string writes are infallible");
        for column in &frame.columns {
            let point = &column.points[i];
            write!(
                out,
                ",{},{},{:.0}",
                fmt_opt(point.value),
                point.quality,
                point.jitter_s
            )
            .expect("string writes are infallible");
        }
        writeln!(
            out,
            ",{},{:.4}",
            frame.row_class[i], frame.row_confidence[i]
        )
        .expect("string writes are infallible");
    }
    write_text(out_dir, "stage3_synchronized.csv", &out)
}

// ============================================================================
// Stage 4
// ============================================================================

pub fn write_stage4(
    out_dir: &Path,
    frame: &SyncFrame,
    derived: &DerivedFrame,
    metrics: &crate::types::Stage4Metrics,
) -> Result<()> {
    write_json(out_dir, "stage4_metrics.json", metrics)?;

    let mut out = String::from(
        "grid_time,delta_t_k,lift_k,q_kw,q_confidence,cop,cop_confidence,cop_carnot,\
         normalized_cop,efficiency_band,ufoa_kw_per_k,hunt_rate_per_hour,hunt_severity,\
         hunt_confidence\n",
    );
    for i in 0..frame.len() {
        writeln!(
            out,
            "{},{},{},{},{:.4},{},{:.4},{},{},{},{},{},{},{:.2}",
            frame.grid_times[i],
            fmt_opt(derived.delta_t_k[i]),
            fmt_opt(derived.lift_k[i]),
            fmt_opt(derived.q_kw[i]),
            derived.q_confidence[i],
            fmt_opt(derived.cop[i]),
            derived.cop_confidence[i],
            fmt_opt(derived.cop_carnot[i]),
            fmt_opt(derived.normalized_cop[i]),
            derived.efficiency_band[i].map(|b| b.as_str()).unwrap_or(""),
            fmt_opt(derived.ufoa_kw_per_k[i]),
            fmt_opt(derived.hunt_rate_per_hour[i]),
            derived.hunt_severity[i].as_str(),
            derived.hunt_confidence[i],
        )
        .expect("string writes are infallible");
    }
    write_text(out_dir, "stage4_derived.csv", &out)
}

// ============================================================================
// Halt, Report, Approvals
// ============================================================================

pub fn write_halt(out_dir: &Path, halt: &HaltInfo) -> Result<()> {
    write_json(out_dir, "halt.json", halt)
}

pub fn write_run_report(out_dir: &Path, report: &PipelineReport) -> Result<()> {
    write_json(out_dir, "run_report.json", report)
}

/// Read the approvals sidecar from the output directory. A missing file
/// means no decisions yet — every candidate stays pending.
pub fn read_approvals(out_dir: &Path) -> HashMap<String, ExclusionApproval> {
    let path = out_dir.join(APPROVALS_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => match serde_json::from_str::<HashMap<String, ExclusionApproval>>(&text) {
            Ok(map) => {
                info!(count = map.len(), "Loaded exclusion approvals");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable approvals sidecar — treating all candidates as pending");
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}
