//! Run state management: identity, directory layout, artifact registry,
//! gate/reasoning files, and recovery.
//!
//! The [`RunManager`] is the only writer of run-scoped state. Every write
//! is atomic (temp file + rename) and serialized per-run, so concurrent
//! registrations never interleave partial JSON.

/// Atomic JSON read/write helpers.
pub mod fsutil;
/// Gate and reasoning file writer with write-once discipline.
pub mod gates;
/// Run-scoped directory layout.
pub mod layout;
/// The run manager: run records and the artifact registry.
pub mod manager;
/// Recovery scans for resumption after interruption.
pub mod recovery;

pub use gates::GateWriter;
pub use layout::RunPaths;
pub use manager::{ArtifactRegistry, CreateRunOptions, RunManager};
pub use recovery::{recover, RecoveryReport, RecoveryStatus, StepRequirements};
