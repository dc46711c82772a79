//! Assimilation Pipeline Module
//!
//! ## Stage Sequence
//!
//! ```text
//! STAGE 0: Classification   (filename routing, feed map)
//! STAGE 1: Decode & Verify  (HALT: negative flow/power, physics, missing BMD)
//! STAGE 2: Gap Detection    (no HALT; exclusion candidates emitted)
//! STAGE 3: Synchronisation  (HALT: coverage < 50%, all rows excluded)
//! STAGE 4: Derivation       (no HALT; per-row degradation)
//! ```
//!
//! The coordinator guarantees strict sequencing — Stage k+1 observes the
//! full output of Stage k, never a partial view — and owns HALT handling,
//! approval reconciliation, and cooperative cancellation.

mod coordinator;

pub use coordinator::{run_pipeline, PipelineCoordinator};

/// Process exit codes for the CLI collaborator.
pub mod exit_codes {
    /// Run completed, all requested stages produced artifacts.
    pub const SUCCESS: i32 = 0;
    /// Pipeline stopped on a data-fatal condition; `halt.json` written.
    pub const HALT: i32 = 1;
    /// Unexpected internal failure (I/O, precondition, cancellation).
    pub const ERROR: i32 = 2;
}
