//! Pipeline Regression Tests
//!
//! Exercises the full five-stage pipeline end to end on a synthetic
//! four-week BMD plant: °C temperatures, L/s flow with a weekly 12-hour
//! meter outage, kW power with a day/night duty cycle. Asserts on
//! classification, coverage tiering, confidence monotonicity, derived
//! quantities, halt behaviour, and exclusion-window approval flow.

use std::fmt::Write as _;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use chillgrid::config::{ApprovalOverride, PlantConfig, RunOptions};
use chillgrid::pipeline::PipelineCoordinator;
use chillgrid::types::{CoverageTier, PipelineError, RowClassification};

const STEP_S: f64 = 900.0;
const DAYS: usize = 28;
const ROWS: usize = DAYS * 96;

fn hour_of_day(t: f64) -> f64 {
    (t % 86_400.0) / 3_600.0
}

fn is_daytime(t: f64) -> bool {
    let h = hour_of_day(t);
    (9.0..19.0).contains(&h)
}

/// Weekly flow-meter outage: Saturday 20:00 through Sunday 08:00.
fn in_flow_outage(t: f64) -> bool {
    let week_s = t % (7.0 * 86_400.0);
    (504_000.0..547_200.0).contains(&week_s)
}

fn write_csv(dir: &Path, name: &str, header: &str, rows: &[(f64, f64)]) {
    let mut out = String::from(header);
    out.push('\n');
    for (t, v) in rows {
        writeln!(out, "{},{}", t, v).expect("string write");
    }
    std::fs::write(dir.join(name), out).expect("write input csv");
}

/// Build the synthetic plant exports in `dir`.
fn build_plant(dir: &Path) {
    let mut chwst = Vec::with_capacity(ROWS);
    let mut chwrt = Vec::with_capacity(ROWS);
    let mut cdwrt = Vec::with_capacity(ROWS);
    let mut flow = Vec::new();
    let mut power = Vec::with_capacity(ROWS);

    for i in 0..ROWS {
        let t = i as f64 * STEP_S;
        let day = is_daytime(t);

        // Slow diurnal drift keeps the signals alive without tripping the
        // hunting detector (per-step deltas stay well under 0.3 °C).
        let wobble = 0.2 * ((i % 96) as f64 / 96.0 * std::f64::consts::TAU).sin();

        let supply = if day { 6.6 } else { 7.2 } + wobble;
        let delta_t = if day { 5.0 } else { 0.4 };
        chwst.push((t, supply));
        chwrt.push((t, supply + delta_t));
        cdwrt.push((t, if day { 30.5 } else { 26.0 } + wobble));
        power.push((t, if day { 60.0 } else { 8.0 }));

        if !in_flow_outage(t) {
            flow.push((t, if day { 18.0 } else { 12.0 }));
        }
    }

    write_csv(dir, "CH1_CHWST.csv", "timestamp,Supply Temp (C)", &chwst);
    write_csv(dir, "CH1_CHWRT.csv", "timestamp,Return Temp (C)", &chwrt);
    write_csv(dir, "CH1_CDWRT.csv", "timestamp,Condenser Return (C)", &cdwrt);
    write_csv(dir, "CH1_CHW_FLOW.csv", "timestamp,Flow (L/s)", &flow);
    write_csv(dir, "CH1_KW.csv", "timestamp,Power (kW)", &power);
}

fn run_plant(input: &Path, output: &Path) -> Result<chillgrid::PipelineReport, PipelineError> {
    let coordinator = PipelineCoordinator::new(
        PlantConfig::default(),
        RunOptions::default(),
        CancellationToken::new(),
    );
    coordinator.run(input, output)
}

#[test]
fn test_full_pipeline_on_synthetic_month() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());

    let report = run_plant(input.path(), output.path()).expect("pipeline succeeds");
    assert!(report.halt.is_none());
    assert_eq!(report.stages_run, vec![0, 1, 2, 3, 4]);

    // Stage 0: all five files classified, nothing mandatory missing.
    let stage0 = report.stage0.as_ref().expect("stage0 ran");
    assert_eq!(stage0.files_classified, 5);
    assert!(stage0.missing_mandatory.is_empty());

    // Stage 1: clean units — flow converted (L/s), everything else identity.
    let stage1 = report.stage1.as_ref().expect("stage1 ran");
    assert!(
        (stage1.stage_confidence - 0.98).abs() < 1e-9,
        "only the flow conversion costs confidence, got {}",
        stage1.stage_confidence
    );
    assert!(stage1.reversal.is_none());
    assert!(stage1.return_supply_compliance_pct > 99.0);
    assert!(stage1.state_counts.active > 0 && stage1.state_counts.standby > 0);

    // Stage 2: the weekly outages are benign COV gaps, not anomalies.
    let stage2 = report.stage2.as_ref().expect("stage2 ran");
    let flow_report = stage2
        .channels
        .iter()
        .find(|c| c.channel == chillgrid::ChannelKind::Flow)
        .expect("flow gap report");
    assert_eq!(flow_report.major_gaps, 4, "one outage per week");
    assert_eq!(flow_report.sensor_anomalies, 0);
    assert_eq!(flow_report.cov_constant, 4, "flat night flow across each outage");
    assert!(stage2.exclusion_candidates.is_empty(), "single-channel outages never propose windows");

    // Stage 3: coverage lands in the Good tier.
    let stage3 = report.stage3.as_ref().expect("stage3 ran");
    assert_eq!(stage3.rows, ROWS);
    assert!(
        (0.90..0.95).contains(&stage3.valid_fraction),
        "valid fraction {} outside Good band",
        stage3.valid_fraction
    );
    assert_eq!(stage3.coverage_tier, Some(CoverageTier::Good));
    assert_eq!(stage3.major_gap, 4 * 44, "44 unreachable rows per outage");

    // Confidence monotonicity across stages 1..3.
    let chain = report.confidence_chain();
    for pair in chain.windows(2) {
        assert!(
            pair[1] <= pair[0] + 1e-12,
            "stage confidence must never increase: {:?}",
            chain
        );
    }

    // Stage 4: plausible plant physics.
    let stage4 = report.stage4.as_ref().expect("stage4 ran");
    assert!(stage4.q_valid > 0);
    // Day: 18 L/s · 5 K → ≈ 377 kW; night: 12 L/s · 0.4 K → ≈ 20 kW.
    assert!(
        stage4.q_mean_kw > 20.0 && stage4.q_mean_kw < 380.0,
        "q_mean {} implausible",
        stage4.q_mean_kw
    );
    assert!(
        stage4.cop_valid_pct > 85.0,
        "almost every valid row has a valid COP, got {}%",
        stage4.cop_valid_pct
    );
    assert!(stage4.cop_mean >= 2.0 && stage4.cop_mean <= 7.0);
    assert_eq!(stage4.hunting.major, 0, "diurnal drift is not hunting");

    // Artifacts on disk.
    for name in [
        "stage0_classification.json",
        "stage1_verified.csv",
        "stage1_metrics.json",
        "stage2_report.json",
        "stage2_flow_gaps.csv",
        "stage3_synchronized.csv",
        "stage3_metrics.json",
        "stage4_derived.csv",
        "stage4_metrics.json",
        "run_report.json",
    ] {
        assert!(
            output.path().join(name).exists(),
            "missing artifact {}",
            name
        );
    }
    assert!(!output.path().join("halt.json").exists());
}

#[test]
fn test_determinism_byte_identical_outputs() {
    let input = tempfile::tempdir().expect("input dir");
    build_plant(input.path());

    let out_a = tempfile::tempdir().expect("out a");
    let out_b = tempfile::tempdir().expect("out b");
    run_plant(input.path(), out_a.path()).expect("run a");
    run_plant(input.path(), out_b.path()).expect("run b");

    for name in ["stage3_synchronized.csv", "stage4_derived.csv"] {
        let a = std::fs::read(out_a.path().join(name)).expect("read a");
        let b = std::fs::read(out_b.path().join(name)).expect("read b");
        assert_eq!(a, b, "{} must be byte-identical across runs", name);
    }
}

#[test]
fn test_negative_flow_halts_with_report() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());

    // Corrupt one flow sample to a negative reading.
    let path = input.path().join("CH1_CHW_FLOW.csv");
    let mut text = std::fs::read_to_string(&path).expect("read");
    text = text.replacen("900,12", "900,-3.0", 1);
    std::fs::write(&path, text).expect("write");

    let err = run_plant(input.path(), output.path()).expect_err("must halt");
    assert!(matches!(
        err,
        PipelineError::Halt(chillgrid::HaltReason::NegativeFlow { .. })
    ));

    // Halt artifact is actionable and stage-tagged.
    let halt: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(output.path().join("halt.json")).expect("halt.json"),
    )
    .expect("parse halt");
    assert_eq!(halt["stage"], 1);
    assert_eq!(halt["reason_code"], "negative_flow");

    // Partial outputs up to the failing stage survive.
    assert!(output.path().join("stage0_classification.json").exists());
    assert!(!output.path().join("stage3_synchronized.csv").exists());
}

#[test]
fn test_missing_mandatory_channel_halts() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());
    std::fs::remove_file(input.path().join("CH1_CDWRT.csv")).expect("drop condenser");

    let err = run_plant(input.path(), output.path()).expect_err("must halt");
    assert!(matches!(
        err,
        PipelineError::Halt(chillgrid::HaltReason::MissingMandatoryChannel { .. })
    ));
}

#[test]
fn test_exclusion_window_approval_flow() {
    let input = tempfile::tempdir().expect("input dir");
    build_plant(input.path());

    // Knock the same nine hours out of both temperature streams: day 10,
    // 00:00 through 09:00.
    let gap_start = 9.0 * 86_400.0;
    let gap_end = gap_start + 9.0 * 3_600.0;
    for name in ["CH1_CHWST.csv", "CH1_CHWRT.csv"] {
        let path = input.path().join(name);
        let text = std::fs::read_to_string(&path).expect("read");
        let mut kept: Vec<&str> = Vec::new();
        for line in text.lines() {
            let keep = match line.split(',').next().and_then(|t| t.parse::<f64>().ok()) {
                Some(t) => !(gap_start..gap_end).contains(&t),
                None => true,
            };
            if keep {
                kept.push(line);
            }
        }
        std::fs::write(&path, kept.join("\n") + "\n").expect("write");
    }

    // First run: candidate emitted, pending, data not suppressed.
    let out_pending = tempfile::tempdir().expect("out pending");
    let report = run_plant(input.path(), out_pending.path()).expect("run");
    let stage2 = report.stage2.as_ref().expect("stage2");
    assert_eq!(stage2.exclusion_candidates.len(), 1);
    let window = &stage2.exclusion_candidates[0];
    assert!((window.duration_hours - 9.0).abs() < 0.3, "≈9h, got {}", window.duration_hours);
    assert!(!window.approved);
    let stage3 = report.stage3.as_ref().expect("stage3");
    assert_eq!(stage3.excluded, 0, "pending windows do not suppress rows");

    // Second run with the approval sidecar present.
    let out_approved = tempfile::tempdir().expect("out approved");
    std::fs::write(
        out_approved.path().join("approvals.json"),
        format!(
            r#"{{"{}": {{"approved": true, "reason": "confirmed BMS outage"}}}}"#,
            window.id
        ),
    )
    .expect("write approvals");
    let report = run_plant(input.path(), out_approved.path()).expect("run approved");
    let stage3 = report.stage3.as_ref().expect("stage3");
    assert!(stage3.excluded > 0, "approved window suppresses its rows");

    // CLI override achieves the same without a sidecar.
    let out_cli = tempfile::tempdir().expect("out cli");
    let coordinator = PipelineCoordinator::new(
        PlantConfig::default(),
        RunOptions {
            approve_exclusions: ApprovalOverride::All,
            ..Default::default()
        },
        CancellationToken::new(),
    );
    let report = coordinator
        .run(input.path(), out_cli.path())
        .expect("run cli override");
    assert!(report.stage3.as_ref().expect("stage3").excluded > 0);
}

#[test]
fn test_stage_subset_writes_only_requested_artifacts() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());

    let coordinator = PipelineCoordinator::new(
        PlantConfig::default(),
        RunOptions {
            stages: vec![0, 1],
            ..Default::default()
        },
        CancellationToken::new(),
    );
    let report = coordinator.run(input.path(), output.path()).expect("run");
    assert_eq!(report.stages_run, vec![0, 1]);
    assert!(output.path().join("stage1_verified.csv").exists());
    assert!(!output.path().join("stage2_report.json").exists());
    assert!(!output.path().join("stage3_synchronized.csv").exists());
}

#[test]
fn test_cancelled_run_discards_outputs() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let coordinator =
        PipelineCoordinator::new(PlantConfig::default(), RunOptions::default(), cancel);
    let err = coordinator
        .run(input.path(), output.path())
        .expect_err("cancelled");
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(!output.path().join("stage0_classification.json").exists());
    assert!(!output.path().join("run_report.json").exists());
}

#[test]
fn test_synchronized_rows_follow_grid_property() {
    let input = tempfile::tempdir().expect("input dir");
    let output = tempfile::tempdir().expect("output dir");
    build_plant(input.path());

    let report = run_plant(input.path(), output.path()).expect("run");
    let stage3 = report.stage3.as_ref().expect("stage3");

    // len(grid) == 1 + floor((t_end − t_start_ceil)/T); inputs start at 0
    // and end at (ROWS−1)·T.
    let expected = 1 + ((ROWS - 1) as f64 * STEP_S / STEP_S).floor() as usize;
    assert_eq!(stage3.rows, expected);

    // Every classified row carries a confidence consistent with its class.
    let csv =
        std::fs::read_to_string(output.path().join("stage3_synchronized.csv")).expect("csv");
    for line in csv.lines().skip(1) {
        let cells: Vec<&str> = line.split(',').collect();
        let class = cells[cells.len() - 2];
        let confidence: f64 = cells[cells.len() - 1].parse().expect("confidence cell");
        match class {
            c if c == RowClassification::Valid.as_str() => assert!(confidence > 0.0),
            _ => assert_eq!(confidence, 0.0),
        }
    }
}
