//! Shared data structures for the chiller telemetry assimilation pipeline
//!
//! This module defines the core types carried between stages:
//! - Stage 0: `ChannelKind`, file classification / routing
//! - Stage 1: `Signal`, `RawStats`, `EncodingDecision`, `UnitDecision`,
//!   `OperationalState`, `SensorReversalDiagnosis`
//! - Stage 2: `GapClass`, `GapSemantic`, `GapAnnotation`, `ExclusionWindow`
//! - Stage 3: `AlignmentQuality`, `RowClassification`, `SyncFrame`
//! - Cross-stage: `StageMetrics` records, `HaltReason`, `PipelineError`

mod channel;
mod state;
mod decisions;
mod gaps;
mod grid;
mod metrics;

pub use channel::*;
pub use state::*;
pub use decisions::*;
pub use gaps::*;
pub use grid::*;
pub use metrics::*;
