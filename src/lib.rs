//! ChillGrid: staged telemetry assimilation for chiller plants
//!
//! Transforms raw per-sensor BMS exports — heterogeneous vendors, wildly
//! inconsistent encodings — into a uniform, physics-validated,
//! quality-scored grid suitable for cooling load (Q), COP, and diagnostic
//! indicators (hunting, fouling).
//!
//! ## Architecture
//!
//! - **Stage 0**: filename classification and ingestion routing
//! - **Stage 1**: encoding decode, unit verification, operational-state
//!   classification, physics baseline
//! - **Stage 2**: COV-aware gap detection on raw timestamps
//! - **Stage 3**: nearest-neighbour synchronisation to a uniform grid
//! - **Stage 4**: derived quantities with component confidences
//!
//! The engine is deterministic: a given input produces byte-identical
//! annotated outputs. Every transformation preserves provenance — original
//! and converted columns coexist, and every confidence charge is
//! explainable after the run.

pub mod acquisition;
pub mod config;
pub mod confidence;
pub mod persist;
pub mod pipeline;
pub mod stages;
pub mod stats;
pub mod types;

// Re-export plant configuration
pub use config::{EquipmentProfile, PlantConfig, RunOptions};

// Re-export commonly used types
pub use types::{
    AlignmentQuality, CanonicalUnit, ChannelKind, ConfidenceTier, CoverageTier, EncodingDecision,
    ExclusionWindow, GapClass, GapSemantic, HaltReason, OperationalState, PipelineError,
    PipelineReport, RawStats, RowClassification, Signal, SyncFrame,
};

// Re-export the pipeline entry point
pub use pipeline::{run_pipeline, PipelineCoordinator};
