//! ChillGrid — chiller-plant telemetry assimilation CLI
//!
//! # Usage
//!
//! ```bash
//! # Full five-stage run over a directory of BMS exports
//! chillgrid --input data/bartech --output out/
//!
//! # Only classify and verify, writing JSON artifacts
//! chillgrid --input data/bartech --output out/ --stages 0,1 --output-format json
//!
//! # Approve all pending exclusion windows from a previous run
//! chillgrid --input data/bartech --output out/ --approve-exclusions all
//! ```
//!
//! # Environment Variables
//!
//! - `CHILLGRID_CONFIG`: Path to the plant TOML config
//! - `RUST_LOG`: Logging level (default: info, or debug with --verbose)

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use chillgrid::config::{ApprovalOverride, EquipmentProfile, OutputFormat, PlantConfig, RunOptions};
use chillgrid::pipeline::{exit_codes, run_pipeline};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "chillgrid")]
#[command(about = "Staged telemetry assimilation for chiller-plant BMS exports")]
#[command(version)]
struct CliArgs {
    /// Directory of per-sensor CSV exports
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for run artifacts (created if absent)
    #[arg(short, long)]
    output: PathBuf,

    /// Plant configuration TOML (falls back to CHILLGRID_CONFIG, then
    /// plant_config.toml, then built-in defaults)
    #[arg(long, env = "CHILLGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Nominal BMS trend step in seconds
    #[arg(long)]
    nominal_step_seconds: Option<f64>,

    /// Rated chiller capacity in kW
    #[arg(long)]
    nameplate_kw: Option<f64>,

    /// Equipment profile for operational-state thresholds
    #[arg(long, value_enum)]
    equipment_profile: Option<EquipmentProfile>,

    /// Salvage an aggregate return/supply physics failure via the
    /// sensor-reversal diagnosis instead of halting
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    tolerate_reversal: bool,

    /// Comma-separated stage numbers to run (e.g. "0,1,2")
    #[arg(long, value_delimiter = ',', default_values_t = [0u8, 1, 2, 3, 4])]
    stages: Vec<u8>,

    /// Exclusion-window approvals: "all" or comma-separated window ids
    #[arg(long, value_delimiter = ',')]
    approve_exclusions: Vec<String>,

    /// Tabular artifact format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    output_format: OutputFormat,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(args.verbose);

    let mut config = PlantConfig::load(args.config.as_deref());
    if let Some(step) = args.nominal_step_seconds {
        config.nominal_step_s = step;
    }
    if let Some(kw) = args.nameplate_kw {
        config.nameplate_kw = Some(kw);
    }
    if let Some(profile) = args.equipment_profile {
        config.equipment_profile = profile;
    }
    config.tolerate_reversal = args.tolerate_reversal;

    let approve_exclusions = if args.approve_exclusions.iter().any(|s| s == "all") {
        ApprovalOverride::All
    } else if args.approve_exclusions.is_empty() {
        ApprovalOverride::None
    } else {
        ApprovalOverride::Ids(args.approve_exclusions.clone())
    };

    let mut stages = args.stages.clone();
    stages.sort_unstable();
    stages.dedup();
    stages.retain(|s| *s <= 4);

    let options = RunOptions {
        stages,
        approve_exclusions,
        output_format: args.output_format,
        verbose: args.verbose,
    };

    // Cooperative cancellation on Ctrl-C: the coordinator notices at the
    // next stage boundary and discards partial outputs.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received — cancelling at the next stage boundary");
                cancel.cancel();
            }
        });
    }

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        profile = config.equipment_profile.as_str(),
        step_s = config.nominal_step_s,
        "Starting assimilation run"
    );

    // The engine itself is synchronous and CPU-bound (rayon inside);
    // run it off the async runtime.
    let input = args.input.clone();
    let output = args.output.clone();
    let code = tokio::task::spawn_blocking(move || {
        run_pipeline(&input, &output, config, options, cancel)
    })
    .await
    .unwrap_or(exit_codes::ERROR);

    match code {
        exit_codes::SUCCESS => ExitCode::SUCCESS,
        exit_codes::HALT => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}
