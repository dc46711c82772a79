//! Pipeline Coordinator — five-stage assimilation sequence
//!
//! Owns the evolving dataset: each stage consumes the prior immutable
//! view and produces a new annotated view. The coordinator sequences the
//! stages, reconciles exclusion approvals around Stage 3, writes per-stage
//! artifacts as they complete (so a HALT preserves everything up to and
//! including the failing stage), and checks the cancellation token at
//! every stage boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::acquisition::{self, AcquisitionError, CsvExportReader};
use crate::config::{ApprovalOverride, OutputFormat, PlantConfig, RunOptions};
use crate::persist;
use crate::stages::{classify, derive, gap_scan, synchronize, verify};
use crate::types::{
    CanonicalUnit, ChannelKind, ExclusionApproval, ExclusionWindow, HaltInfo, HaltReason,
    PipelineError, PipelineReport, RowClassification, Signal, SyncFrame,
};

/// Artifact filenames this run may produce, for discard-on-cancel.
const ARTIFACT_NAMES: &[&str] = &[
    "stage0_classification.json",
    "stage1_verified.csv",
    "stage1_verified.json",
    "stage1_metrics.json",
    "stage2_report.json",
    "stage3_synchronized.csv",
    "stage3_synchronized.json",
    "stage3_metrics.json",
    "stage4_derived.csv",
    "stage4_metrics.json",
    "halt.json",
    "run_report.json",
];

/// Pipeline Coordinator: owns config, options, and the cancellation token.
pub struct PipelineCoordinator {
    config: PlantConfig,
    options: RunOptions,
    cancel: CancellationToken,
}

impl PipelineCoordinator {
    pub fn new(config: PlantConfig, options: RunOptions, cancel: CancellationToken) -> Self {
        Self {
            config,
            options,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn wants_stage(&self, stage: u8) -> bool {
        self.options.stages.contains(&stage)
    }

    fn format(&self) -> OutputFormat {
        self.options.output_format
    }

    /// Execute the pipeline. Artifacts land in `output_dir` as stages
    /// complete; the returned report aggregates every stage that ran.
    pub fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<PipelineReport, PipelineError> {
        std::fs::create_dir_all(output_dir)?;

        let mut report = PipelineReport {
            started_at: Some(chrono::Utc::now()),
            ..Default::default()
        };

        let last_stage = self.options.stages.iter().copied().max().unwrap_or(4);
        {
            // Linear ordering: a requested stage runs on its predecessors'
            // in-memory outputs, so holes in the subset still execute.
            let holes: Vec<u8> = (0..=last_stage)
                .filter(|s| !self.wants_stage(*s))
                .collect();
            if !holes.is_empty() {
                warn!(
                    ?holes,
                    "Stage subset has gaps — intermediate stages execute but write no artifacts"
                );
            }
        }

        let result = self.run_stages(input_dir, output_dir, last_stage, &mut report);
        report.finished_at = Some(chrono::Utc::now());

        match result {
            Ok(()) => {
                self.tally_warnings(&mut report);
                persist::write_run_report(output_dir, &report)
                    .map_err(|e| PipelineError::Precondition(e.to_string()))?;
                Ok(report)
            }
            Err(PipelineError::Halt(reason)) => {
                let info = HaltInfo::from(&reason);
                error!(stage = info.stage, code = %info.reason_code, "{}", info.human_message);
                report.halt = Some(info.clone());
                self.tally_warnings(&mut report);
                let _ = persist::write_halt(output_dir, &info);
                let _ = persist::write_run_report(output_dir, &report);
                Err(PipelineError::Halt(reason))
            }
            Err(PipelineError::Cancelled) => {
                info!("Run cancelled — discarding partial outputs");
                discard_outputs(output_dir);
                Err(PipelineError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    fn run_stages(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        last_stage: u8,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        // ---- Stage 0: classification & routing -------------------------
        self.check_cancelled()?;
        info!(input = %input_dir.display(), "Stage 0: classifying input files");
        let paths = acquisition::list_exports(input_dir)?;
        let filenames: Vec<String> = paths
            .iter()
            .map(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        let stage0 = classify::run(&filenames);
        if self.wants_stage(0) {
            persist::write_stage0(output_dir, &stage0)
                .map_err(|e| PipelineError::Precondition(e.to_string()))?;
            report.stages_run.push(0);
        }
        report.stage0 = Some(stage0.clone());
        if last_stage == 0 {
            return Ok(());
        }

        // ---- Load signals: best file per channel kind ------------------
        let signals = self.load_signals(&paths, &stage0)?;

        // ---- Stage 1: decode, convert, validate ------------------------
        self.check_cancelled()?;
        info!(channels = signals.len(), "Stage 1: decode and verify");
        let (verified, mut stage1) = match verify::run(signals, &self.config) {
            Ok(out) => out,
            Err(reason) => {
                report.stage1 = Some(crate::types::Stage1Metrics {
                    halted: true,
                    ..Default::default()
                });
                return Err(PipelineError::Halt(reason));
            }
        };
        for c in &stage0.classifications {
            if c.channel == ChannelKind::Other {
                stage1
                    .warnings
                    .push(format!("{}: unclassified, not ingested", c.filename));
            }
        }
        if self.wants_stage(1) {
            persist::write_stage1(output_dir, &verified, &stage1, self.format())
                .map_err(|e| PipelineError::Precondition(e.to_string()))?;
            report.stages_run.push(1);
        }
        report.stage1 = Some(stage1.clone());
        if last_stage == 1 {
            return Ok(());
        }

        // ---- Stage 2: gap detection ------------------------------------
        self.check_cancelled()?;
        info!("Stage 2: COV-aware gap detection");
        let (gaps, stage2) = gap_scan::run(&verified, &stage1, &self.config);
        if self.wants_stage(2) {
            persist::write_stage2(output_dir, &verified, &gaps, &stage2)
                .map_err(|e| PipelineError::Precondition(e.to_string()))?;
            report.stages_run.push(2);
        }
        report.stage2 = Some(stage2.clone());
        if last_stage == 2 {
            return Ok(());
        }

        // ---- Approval reconciliation (sidecar re-read before Stage 3) --
        let mut windows = gaps.exclusion_candidates.clone();
        let approvals = persist::read_approvals(output_dir);
        apply_approvals(&mut windows, &approvals, &self.options.approve_exclusions);

        // ---- Stage 3: synchronisation ----------------------------------
        self.check_cancelled()?;
        info!("Stage 3: synchronising to uniform grid");
        let (mut frame, mut stage3) =
            match synchronize::run(&verified, &gaps, &windows, &stage2, &self.config) {
                Ok(out) => out,
                Err(PipelineError::Halt(reason)) => {
                    report.stage3 = Some(crate::types::Stage3Metrics {
                        halted: true,
                        ..Default::default()
                    });
                    return Err(PipelineError::Halt(reason));
                }
                Err(e) => return Err(e),
            };
        if self.wants_stage(3) {
            persist::write_stage3(output_dir, &frame, &stage3, self.format())
                .map_err(|e| PipelineError::Precondition(e.to_string()))?;
            report.stages_run.push(3);
        }
        report.stage3 = Some(stage3.clone());
        if last_stage == 3 {
            return Ok(());
        }

        // ---- Stage 4: derived quantities -------------------------------
        self.check_cancelled()?;
        info!("Stage 4: derived quantities");
        let power_in_kw = stage1
            .channels
            .iter()
            .any(|c| c.channel == ChannelKind::Power && c.canonical_unit == CanonicalUnit::PowerKw);
        let (mut derived, mut stage4) = derive::run(&frame, power_in_kw, &self.config);

        // Late approvals: decisions written while the run was in flight
        // re-classify affected rows in place and blank their derived rows.
        let late_approvals = persist::read_approvals(output_dir);
        if late_approvals != approvals {
            let reclassified =
                reconcile_late_approvals(&mut frame, &mut windows, &late_approvals);
            if reclassified > 0 {
                info!(reclassified, "Late exclusion approvals applied");
                stage3.reclassified_rows = reclassified;
                // Recompute over the re-classified frame: deterministic,
                // and the newly excluded rows degrade to Missing cells.
                let (refreshed_derived, refreshed_metrics) =
                    derive::run(&frame, power_in_kw, &self.config);
                derived = refreshed_derived;
                stage4 = refreshed_metrics;
                if self.wants_stage(3) {
                    persist::write_stage3(output_dir, &frame, &stage3, self.format())
                        .map_err(|e| PipelineError::Precondition(e.to_string()))?;
                }
                report.stage3 = Some(stage3.clone());
            }
        }

        if self.wants_stage(4) {
            persist::write_stage4(output_dir, &frame, &derived, &stage4)
                .map_err(|e| PipelineError::Precondition(e.to_string()))?;
            report.stages_run.push(4);
        }
        report.stage4 = Some(stage4);

        Ok(())
    }

    /// Pick the best-classified file per channel kind and load it.
    fn load_signals(
        &self,
        paths: &[PathBuf],
        stage0: &crate::types::Stage0Metrics,
    ) -> Result<Vec<Signal>, PipelineError> {
        let mut best: HashMap<ChannelKind, &crate::types::FileClassification> = HashMap::new();
        for classification in &stage0.classifications {
            if classification.channel == ChannelKind::Other {
                continue;
            }
            let slot = best.entry(classification.channel).or_insert(classification);
            if classification.confidence > slot.confidence {
                *slot = classification;
            }
        }

        let mut signals = Vec::new();
        for kind in [
            ChannelKind::Chwst,
            ChannelKind::Chwrt,
            ChannelKind::Cdwrt,
            ChannelKind::Flow,
            ChannelKind::Power,
            ChannelKind::Load,
        ] {
            let Some(classification) = best.get(&kind) else {
                continue;
            };
            let path = paths
                .iter()
                .find(|p| {
                    p.file_name().and_then(|n| n.to_str())
                        == Some(classification.filename.as_str())
                })
                .expect("classification came from this path list");
            let reader = CsvExportReader::new(path);
            match acquisition::load_signal(&reader, classification) {
                Ok((signal, warnings)) => {
                    for w in warnings {
                        warn!("{}", w);
                    }
                    signals.push(signal);
                }
                Err(AcquisitionError::TimestampReversal { file, row }) => {
                    return Err(PipelineError::Halt(HaltReason::TimestampReversal {
                        channel: kind,
                        file,
                        index: row,
                    }));
                }
                Err(e) => {
                    warn!(channel = %kind, error = %e, "Channel export unreadable — skipped");
                }
            }
        }
        Ok(signals)
    }

    fn tally_warnings(&self, report: &mut PipelineReport) {
        let mut total = 0;
        if let Some(s) = &report.stage0 {
            total += s.warnings.len();
        }
        if let Some(s) = &report.stage1 {
            total += s.warnings.len();
            total += s.channels.iter().map(|c| c.warnings.len()).sum::<usize>();
        }
        if let Some(s) = &report.stage2 {
            total += s.warnings.len();
            total += s.channels.iter().map(|c| c.warnings.len()).sum::<usize>();
        }
        if let Some(s) = &report.stage3 {
            total += s.warnings.len();
        }
        if let Some(s) = &report.stage4 {
            total += s.warnings.len();
        }
        report.warning_total = total;
    }
}

/// Merge sidecar decisions and CLI overrides into the candidate windows.
pub fn apply_approvals(
    windows: &mut [ExclusionWindow],
    sidecar: &HashMap<String, ExclusionApproval>,
    cli_override: &ApprovalOverride,
) {
    for window in windows.iter_mut() {
        window.approved = match cli_override {
            ApprovalOverride::All => true,
            ApprovalOverride::Ids(ids) if ids.contains(&window.id) => true,
            _ => sidecar.get(&window.id).map_or(false, |a| a.approved),
        };
        if !window.approved {
            if let Some(decision) = sidecar.get(&window.id) {
                if !decision.approved && !decision.reason.is_empty() {
                    info!(id = %window.id, reason = %decision.reason, "Exclusion candidate rejected");
                }
            }
        }
    }
}

/// Re-classify rows inside newly approved windows as Excluded, in place.
/// Returns the number of rows whose classification changed.
pub fn reconcile_late_approvals(
    frame: &mut SyncFrame,
    windows: &mut [ExclusionWindow],
    sidecar: &HashMap<String, ExclusionApproval>,
) -> usize {
    let mut changed = 0usize;
    for window in windows.iter_mut() {
        let newly_approved = !window.approved
            && sidecar.get(&window.id).map_or(false, |a| a.approved);
        if !newly_approved {
            continue;
        }
        window.approved = true;
        for (i, &t) in frame.grid_times.iter().enumerate() {
            if window.contains(t) && frame.row_class[i] != RowClassification::Excluded {
                frame.row_class[i] = RowClassification::Excluded;
                frame.row_confidence[i] = 0.0;
                changed += 1;
            }
        }
    }
    changed
}

/// Remove this run's artifacts after a cancellation.
fn discard_outputs(output_dir: &Path) {
    for name in ARTIFACT_NAMES {
        let _ = std::fs::remove_file(output_dir.join(name));
    }
    if let Ok(entries) = std::fs::read_dir(output_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("stage2_") && name.ends_with("_gaps.csv") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

/// Entry point the CLI collaborator calls.
///
/// Returns a process exit code: 0 success, 1 HALT (reportable, halt.json
/// written), 2 unexpected error.
pub fn run_pipeline(
    input_dir: &Path,
    output_dir: &Path,
    config: PlantConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> i32 {
    let coordinator = PipelineCoordinator::new(config, options, cancel);
    match coordinator.run(input_dir, output_dir) {
        Ok(report) => {
            info!(
                stages = ?report.stages_run,
                warnings = report.warning_total,
                "Pipeline complete"
            );
            super::exit_codes::SUCCESS
        }
        Err(PipelineError::Halt(_)) => super::exit_codes::HALT,
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            super::exit_codes::ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlignedColumn, AlignedPoint};

    fn window(id_start: f64, id_end: f64, approved: bool) -> ExclusionWindow {
        ExclusionWindow {
            id: ExclusionWindow::stable_id(id_start, id_end),
            start_s: id_start,
            end_s: id_end,
            affected_channels: vec![ChannelKind::Chwst, ChannelKind::Chwrt],
            duration_hours: (id_end - id_start) / 3600.0,
            approved,
        }
    }

    #[test]
    fn test_apply_approvals_cli_all_wins() {
        let mut windows = vec![window(0.0, 36_000.0, false)];
        apply_approvals(&mut windows, &HashMap::new(), &ApprovalOverride::All);
        assert!(windows[0].approved);
    }

    #[test]
    fn test_apply_approvals_sidecar() {
        let mut windows = vec![window(0.0, 36_000.0, false)];
        let mut sidecar = HashMap::new();
        sidecar.insert(
            windows[0].id.clone(),
            ExclusionApproval {
                approved: true,
                reason: "confirmed outage".to_string(),
            },
        );
        apply_approvals(&mut windows, &sidecar, &ApprovalOverride::None);
        assert!(windows[0].approved);
    }

    #[test]
    fn test_reconcile_late_approvals_reclassifies_in_place() {
        let grid_times: Vec<f64> = (0..10).map(|i| i as f64 * 900.0).collect();
        let n = grid_times.len();
        let mut frame = SyncFrame {
            step_s: 900.0,
            grid_times,
            columns: vec![AlignedColumn {
                channel: ChannelKind::Chwst,
                points: vec![AlignedPoint::missing(); n],
            }],
            row_class: vec![RowClassification::Valid; n],
            row_confidence: vec![0.9; n],
        };
        let mut windows = vec![window(1_800.0, 4_500.0, false)];
        let mut sidecar = HashMap::new();
        sidecar.insert(
            windows[0].id.clone(),
            ExclusionApproval {
                approved: true,
                reason: String::new(),
            },
        );

        let changed = reconcile_late_approvals(&mut frame, &mut windows, &sidecar);
        assert_eq!(changed, 4, "rows at 1800..4500 inclusive");
        assert_eq!(frame.row_class[2], RowClassification::Excluded);
        assert_eq!(frame.row_confidence[2], 0.0);
        assert_eq!(frame.row_class[0], RowClassification::Valid);
        assert!(windows[0].approved);
    }
}
