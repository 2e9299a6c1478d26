//! Shared data model for the Maestro orchestration runtime.
//!
//! Everything persistent — runs, artifacts, gates, plans, context packets —
//! is defined here so that every crate serializes the same wire shapes.
//!
//! # Main types
//!
//! - [`RunRecord`] / [`RunStatus`] — run identity and its lifecycle state machine.
//! - [`ArtifactRecord`] — registry entry for a produced output.
//! - [`GateRecord`] / [`ReasoningRecord`] — per-step quality verdicts and rationale.
//! - [`MasterPlan`] — hierarchical phase/task plan with DAG validation.
//! - [`ContextPacket`] — the immutable prompt body passed to an oracle.
//! - [`TraceContext`] — W3C trace context threaded through delegations.
//! - [`MaestroError`] — top-level error enum for the whole runtime.

/// Artifact registry entries and tagged artifact kinds.
pub mod artifact;
/// Top-level error type and result alias.
pub mod error;
/// Reserved process exit codes.
pub mod exit;
/// Quality gate and reasoning records with canonical filenames.
pub mod gate;
/// Run and snapshot identifier generation.
pub mod ids;
/// Context packets: fixed-shape prompt bodies with content hashes.
pub mod packet;
/// Hierarchical plans (phases, tasks, dependency DAG).
pub mod plan;
/// Run records, status state machine, patches.
pub mod run;
/// W3C trace context (traceparent + baggage).
pub mod trace;

pub use artifact::{ArtifactKind, ArtifactRecord, ValidationStatus};
pub use error::{MaestroError, MaestroResult};
pub use gate::{parse_step_file_name, step_file_name, GateRecord, GateStatus, ReasoningRecord};
pub use ids::{is_run_id, new_run_id, new_snapshot_id};
pub use packet::{ContextPacket, PacketTrace};
pub use plan::{MasterPlan, PhaseStatus, PlanPhase, PlanTask, PlanTaskStatus};
pub use run::{RunMetadata, RunPatch, RunRecord, RunStatus};
pub use trace::TraceContext;
