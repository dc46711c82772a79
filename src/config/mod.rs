//! Plant Configuration Module
//!
//! Provides plant-level configuration loaded from TOML files, replacing
//! hardcoded assimilation thresholds with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `--config` CLI flag (explicit path)
//! 2. `CHILLGRID_CONFIG` environment variable
//! 3. `plant_config.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded `PlantConfig` is owned by the orchestrator and passed by
//! reference into stages; there is no module-level mutable state.

mod plant;
pub mod defaults;

pub use plant::*;
