//! Context packet assembly: bounded, auditable prompt bodies.

use maestro_core::{ContextPacket, MaestroError, MaestroResult, PacketTrace, TraceContext};
use std::path::{Component, Path};

/// Builds sealed context packets for delegations.
///
/// Inputs are sanitized before the packet is hashed: user home directories
/// are masked, reference paths are normalized, and references may not
/// escape the run directory. Environment values are never read, so no
/// secret can leak into a packet.
pub struct PacketBuilder {
    run_id: String,
    parent_trace: TraceContext,
}

impl PacketBuilder {
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let parent_trace = TraceContext::new_root().with_baggage("run_id", &run_id);
        Self {
            run_id,
            parent_trace,
        }
    }

    /// Resume with an existing trace (recovery, handoff).
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.parent_trace = trace;
        self
    }

    pub fn trace(&self) -> &TraceContext {
        &self.parent_trace
    }

    /// Build and seal a packet for one delegation. Every delegation gets a
    /// child span of the run's root trace.
    pub fn build(
        &self,
        step: u32,
        agent: &str,
        goal: &str,
        constraints: &[String],
        references: &[String],
        definition_of_done: &str,
    ) -> MaestroResult<ContextPacket> {
        let mut clean_refs = Vec::with_capacity(references.len());
        for reference in references {
            clean_refs.push(normalize_reference(reference)?);
        }

        let trace = self
            .parent_trace
            .child()
            .with_baggage("agent", agent)
            .with_baggage("step", step.to_string());

        Ok(ContextPacket {
            goal: mask_home(goal),
            constraints: constraints.iter().map(|c| mask_home(c)).collect(),
            references: clean_refs,
            definition_of_done: mask_home(definition_of_done),
            trace: PacketTrace {
                run_id: self.run_id.clone(),
                step,
                agent: agent.to_string(),
                context: trace,
            },
            content_hash: String::new(),
        }
        .seal())
    }
}

/// Mask the user's home directory in free text.
fn mask_home(text: &str) -> String {
    let Some(home) = std::env::var_os("HOME") else {
        return text.to_string();
    };
    let home = home.to_string_lossy();
    if home.is_empty() || home.as_ref() == "/" {
        return text.to_string();
    }
    text.replace(home.as_ref(), "~")
}

/// Normalize a reference path: relative to the run directory, forward
/// slashes, no traversal. Absolute paths and `..` components are rejected
/// so a reference can never resolve outside the run directory.
fn normalize_reference(reference: &str) -> MaestroResult<String> {
    let path = Path::new(reference);
    if path.is_absolute() {
        return Err(MaestroError::Validation(format!(
            "reference must be relative to the run directory: {reference}"
        )));
    }
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(MaestroError::Validation(format!(
                    "reference must not escape the run directory: {reference}"
                )));
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn builder() -> PacketBuilder {
        PacketBuilder::new("run-1-aaaaaaaa")
    }

    #[test]
    fn test_build_seals_packet() {
        let packet = builder()
            .build(
                2,
                "developer",
                "Implement the login form",
                &["No new dependencies".to_string()],
                &["artifacts/architecture.md".to_string()],
                "Form renders and tests pass",
            )
            .unwrap();
        assert!(packet.verify());
        assert_eq!(packet.trace.step, 2);
        assert_eq!(packet.trace.agent, "developer");
    }

    #[test]
    fn test_child_spans_share_run_trace() {
        let builder = builder();
        let a = builder
            .build(1, "planner", "plan", &[], &[], "done")
            .unwrap();
        let b = builder
            .build(2, "developer", "build", &[], &[], "done")
            .unwrap();
        assert_eq!(a.trace.context.trace_id, b.trace.context.trace_id);
        assert_ne!(a.trace.context.span_id, b.trace.context.span_id);
        assert_eq!(
            a.trace.context.parent_span_id.as_deref(),
            Some(builder.trace().span_id.as_str())
        );
    }

    #[test]
    fn test_reference_normalization() {
        let packet = builder()
            .build(
                1,
                "qa",
                "test",
                &[],
                &["./artifacts/./plan.json".to_string()],
                "done",
            )
            .unwrap();
        assert_eq!(packet.references, vec!["artifacts/plan.json".to_string()]);
    }

    #[test]
    fn test_escaping_reference_rejected() {
        let err = builder().build(
            1,
            "qa",
            "test",
            &[],
            &["../other-run/secret.json".to_string()],
            "done",
        );
        assert!(matches!(err, Err(MaestroError::Validation(_))));

        let err = builder().build(1, "qa", "test", &[], &["/etc/passwd".to_string()], "done");
        assert!(matches!(err, Err(MaestroError::Validation(_))));
    }

    #[test]
    fn test_home_is_masked() {
        let home = std::env::var("HOME").unwrap_or_default();
        if home.is_empty() || home == "/" {
            return; // nothing to mask in this environment
        }
        let goal = format!("Fix the bug in {home}/project/src/lib.rs");
        let packet = builder().build(1, "developer", &goal, &[], &[], "done").unwrap();
        assert!(!packet.goal.contains(&home));
        assert!(packet.goal.contains("~/project"));
    }

    #[test]
    fn test_rendered_packet_has_baggage() {
        let packet = builder()
            .build(3, "qa", "verify", &[], &[], "done")
            .unwrap();
        let rendered = packet.render();
        assert!(rendered.contains("baggage: "));
        assert!(rendered.contains("run_id=run-1-aaaaaaaa"));
        assert!(rendered.contains("agent=qa"));
    }
}
