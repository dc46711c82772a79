//! Operational-state types

use serde::{Deserialize, Serialize};

/// Operational state of a chiller, derived per row from load, ΔT, and flow
/// against equipment-specific thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
pub enum OperationalState {
    /// Loaded and producing a temperature split
    Active,
    /// Enabled but below active thresholds (e.g. pumps on, compressor idle)
    Standby,
    /// Load and flow both at zero
    Off,
    /// Inputs missing, state could not be derived
    #[default]
    Unknown,
}

impl OperationalState {
    /// Short code for logging and CSV cells.
    pub fn short_code(&self) -> &'static str {
        match self {
            OperationalState::Active => "ACTIVE",
            OperationalState::Standby => "STANDBY",
            OperationalState::Off => "OFF",
            OperationalState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for OperationalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_code())
    }
}
