//! Plant configuration: equipment profile, thresholds, run options
//!
//! Replaces hardcoded plant assumptions with operator-tunable values
//! loaded from TOML. The loaded config is owned by the orchestrator and
//! passed by reference into stages — there is no global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::defaults;

/// Equipment profile selecting operational-state thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentProfile {
    #[default]
    Screw,
    Centrifugal,
    Boiler,
    /// Resolve from nameplate at startup (< 1000 kW → screw, else
    /// centrifugal); falls back to screw with a warning when no nameplate
    Auto,
}

impl EquipmentProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screw => "screw",
            Self::Centrifugal => "centrifugal",
            Self::Boiler => "boiler",
            Self::Auto => "auto",
        }
    }
}

/// Operational-state thresholds for one equipment profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StateThresholds {
    /// Load above this percent of rated counts as loaded
    pub load_pct: f64,
    /// |ΔT| above this (K) counts as a real temperature split
    pub delta_t_min_k: f64,
}

impl StateThresholds {
    pub fn screw() -> Self {
        Self { load_pct: 15.0, delta_t_min_k: 0.5 }
    }

    pub fn centrifugal() -> Self {
        Self { load_pct: 30.0, delta_t_min_k: 0.8 }
    }

    pub fn boiler() -> Self {
        Self { load_pct: 20.0, delta_t_min_k: 1.0 }
    }
}

/// Resolved plant configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlantConfig {
    /// Nominal BMS trend step T in seconds
    pub nominal_step_s: f64,
    /// Rated chiller capacity (kW); anchors power decoding and fouling
    pub nameplate_kw: Option<f64>,
    /// Design chilled-water flow (m³/s); anchors counts-encoded flow
    pub design_flow_m3s: Option<f64>,
    /// Design UFOA (Q/ΔT, kW/K) used as the fouling baseline when present
    pub design_ufoa_kw_per_k: Option<f64>,
    pub equipment_profile: EquipmentProfile,
    /// Salvage an aggregate CHWRT<CHWST violation via the reversal
    /// diagnosis instead of halting
    pub tolerate_reversal: bool,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            nominal_step_s: defaults::NOMINAL_STEP_S,
            nameplate_kw: None,
            design_flow_m3s: None,
            design_ufoa_kw_per_k: None,
            equipment_profile: EquipmentProfile::Screw,
            tolerate_reversal: true,
        }
    }
}

impl PlantConfig {
    /// Load configuration with the standard precedence:
    /// explicit path → `CHILLGRID_CONFIG` env var → `plant_config.toml`
    /// in the working directory → built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = explicit
            .map(|p| vec![p.to_path_buf()])
            .unwrap_or_else(|| {
                let mut c = Vec::new();
                if let Ok(env_path) = std::env::var("CHILLGRID_CONFIG") {
                    c.push(PathBuf::from(env_path));
                }
                c.push(PathBuf::from("plant_config.toml"));
                c
            });

        for path in candidates {
            match std::fs::read_to_string(&path) {
                Ok(text) => match toml::from_str::<PlantConfig>(&text) {
                    Ok(config) => {
                        info!(path = %path.display(), "Loaded plant config");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Invalid plant config — continuing with defaults");
                        return Self::default();
                    }
                },
                Err(_) => {
                    debug!(path = %path.display(), "No plant config at path");
                }
            }
        }

        debug!("Using built-in plant defaults");
        Self::default()
    }

    /// Resolve `Auto` into a concrete profile. Returns the resolved
    /// profile and an optional warning for the Stage 1 metrics.
    pub fn resolved_profile(&self) -> (EquipmentProfile, Option<String>) {
        match self.equipment_profile {
            EquipmentProfile::Auto => match self.nameplate_kw {
                Some(kw) if kw >= 1_000.0 => (EquipmentProfile::Centrifugal, None),
                Some(_) => (EquipmentProfile::Screw, None),
                None => (
                    EquipmentProfile::Screw,
                    Some(
                        "equipment_profile=auto with no nameplate — defaulting to screw \
                         thresholds (load 15%, dT 0.5K)"
                            .to_string(),
                    ),
                ),
            },
            profile => (profile, None),
        }
    }

    /// State thresholds for the resolved profile.
    pub fn state_thresholds(&self) -> StateThresholds {
        let (profile, _) = self.resolved_profile();
        match profile {
            EquipmentProfile::Screw => StateThresholds::screw(),
            EquipmentProfile::Centrifugal => StateThresholds::centrifugal(),
            EquipmentProfile::Boiler => StateThresholds::boiler(),
            EquipmentProfile::Auto => unreachable!("resolved_profile never returns Auto"),
        }
    }
}

/// Output artifact format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
    Json,
}

/// Per-run options, assembled by the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stage numbers to execute (always sorted, always a prefix-respecting
    /// subset — the coordinator enforces linear ordering)
    pub stages: Vec<u8>,
    /// Window ids approved on the command line; `ApproveAll` bypasses the
    /// sidecar
    pub approve_exclusions: ApprovalOverride,
    pub output_format: OutputFormat,
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stages: vec![0, 1, 2, 3, 4],
            approve_exclusions: ApprovalOverride::None,
            output_format: OutputFormat::Csv,
            verbose: false,
        }
    }
}

/// Command-line approval override for exclusion windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOverride {
    /// Use only the sidecar file
    None,
    /// Approve every candidate
    All,
    /// Approve the listed window ids
    Ids(Vec<String>),
}
