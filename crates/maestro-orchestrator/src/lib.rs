//! The orchestrator coordinator: workflow execution over delegated agent
//! steps.
//!
//! The coordinator consumes the router's decision, instantiates a run,
//! derives an executable plan from the workflow definition, and drives it
//! phase by phase: dependency-eligible tasks run concurrently under memory
//! admission, every delegation gets a sealed context packet and optimized
//! skill content, and each step leaves a gate, a reasoning record, and
//! registered artifacts behind. Plan-producing steps clear a weighted
//! multi-reviewer gate; context or memory pressure serializes the run into
//! a handoff package instead of losing it.

/// The coordinator and its execution loop.
pub mod coordinator;
/// Context monitoring and handoff packages (Phoenix Reset).
pub mod handoff;
/// Context packet assembly.
pub mod packet;
/// Plan review gate.
pub mod review;
/// Delegation templates.
pub mod templates;
/// Workflow definitions.
pub mod workflow;

pub use coordinator::{Coordinator, CoordinatorConfig, ProcessOutcome, StopReason};
pub use handoff::{
    build_handoff, validate_handoff, ContextMonitor, ContextPressure, HandoffContext,
    HandoffPackage, HandoffValidation, RESET_FRACTION, WARNING_FRACTION,
};
pub use packet::PacketBuilder;
pub use review::{
    evaluate, BlockingIssue, PlanReviewReport, ReviewMatrix, ReviewPolicy, ReviewScore,
    ReviewerRequirements,
};
pub use templates::{default_templates, DelegationTemplate, TemplateRegistry};
pub use workflow::{WorkflowDef, WorkflowPhase, WorkflowStep};
