use crate::cuj::{detect_cuj_reference, CujMapping, ExecutionMode};
use crate::intent::{classify, Complexity, Intent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// How the workflow was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Semantic,
    CujMapping,
    CujSkill,
    SemanticFallbackFromCuj,
}

/// The authoritative step-0 artifact (`route_decision.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub selected_workflow: String,
    pub routing_method: RoutingMethod,
    pub confidence: f64,
    pub intent: Intent,
    pub complexity: Complexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuj_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_skill: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Maps task types to pre-configured workflow files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTable {
    pub by_intent: HashMap<Intent, String>,
    /// Used for unknown intent at the lowest confidence.
    pub default_workflow: String,
}

impl Default for WorkflowTable {
    fn default() -> Self {
        let mut by_intent = HashMap::new();
        by_intent.insert(
            Intent::Implementation,
            "workflows/greenfield-frontend.yaml".to_string(),
        );
        by_intent.insert(Intent::Planning, "workflows/planning.yaml".to_string());
        by_intent.insert(Intent::Research, "workflows/research.yaml".to_string());
        by_intent.insert(Intent::Testing, "workflows/qa.yaml".to_string());
        by_intent.insert(Intent::Refactoring, "workflows/refactor.yaml".to_string());
        by_intent.insert(
            Intent::Documentation,
            "workflows/documentation.yaml".to_string(),
        );
        Self {
            by_intent,
            default_workflow: "workflows/general.yaml".to_string(),
        }
    }
}

/// Routes a user prompt to a workflow: CUJ references first, semantic
/// classification otherwise.
pub struct WorkflowRouter {
    mapping: Option<CujMapping>,
    table: WorkflowTable,
}

impl WorkflowRouter {
    pub fn new(table: WorkflowTable) -> Self {
        Self {
            mapping: None,
            table,
        }
    }

    pub fn with_cuj_mapping(mut self, mapping: CujMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Route a prompt. Never fails: a malformed or missing mapping row
    /// falls back to semantic routing with the fallback method recorded.
    pub fn route(&self, prompt: &str) -> RouteDecision {
        if let Some(cuj_id) = detect_cuj_reference(prompt) {
            match self.route_cuj(&cuj_id, prompt) {
                Some(decision) => return decision,
                None => {
                    warn!(cuj_id = %cuj_id, "CUJ reference unresolvable, semantic fallback");
                    let mut decision = self.route_semantic(prompt);
                    decision.routing_method = RoutingMethod::SemanticFallbackFromCuj;
                    decision.cuj_id = Some(cuj_id);
                    return decision;
                }
            }
        }
        self.route_semantic(prompt)
    }

    fn route_cuj(&self, cuj_id: &str, prompt: &str) -> Option<RouteDecision> {
        let row = self.mapping.as_ref()?.get(cuj_id)?;
        let classification = classify(prompt);

        match row.execution_mode {
            ExecutionMode::Workflow => {
                let workflow = row.workflow_path.clone()?;
                info!(cuj_id = %cuj_id, workflow = %workflow, "Routed via CUJ mapping");
                Some(RouteDecision {
                    selected_workflow: workflow,
                    routing_method: RoutingMethod::CujMapping,
                    confidence: 1.0,
                    intent: classification.intent,
                    complexity: classification.complexity,
                    cuj_id: Some(cuj_id.to_string()),
                    primary_skill: None,
                    timestamp: Utc::now(),
                })
            }
            ExecutionMode::Skill | ExecutionMode::SkillOnly => {
                let skill = row.primary_skill.clone()?;
                // Skill-driven CUJs run the default workflow with the
                // skill pinned for injection.
                info!(cuj_id = %cuj_id, skill = %skill, "Routed via CUJ skill");
                Some(RouteDecision {
                    selected_workflow: self.table.default_workflow.clone(),
                    routing_method: RoutingMethod::CujSkill,
                    confidence: 1.0,
                    intent: classification.intent,
                    complexity: classification.complexity,
                    cuj_id: Some(cuj_id.to_string()),
                    primary_skill: Some(skill),
                    timestamp: Utc::now(),
                })
            }
            // Manual modes cannot be executed by the runtime.
            ExecutionMode::Manual | ExecutionMode::ManualSetup => None,
        }
    }

    fn route_semantic(&self, prompt: &str) -> RouteDecision {
        let classification = classify(prompt);
        let workflow = self
            .table
            .by_intent
            .get(&classification.intent)
            .cloned()
            .unwrap_or_else(|| self.table.default_workflow.clone());

        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            workflow = %workflow,
            "Routed semantically"
        );
        RouteDecision {
            selected_workflow: workflow,
            routing_method: RoutingMethod::Semantic,
            confidence: classification.confidence,
            intent: classification.intent,
            complexity: classification.complexity,
            cuj_id: None,
            primary_skill: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MAPPING: &str = "\
## Run CUJ Mapping

| CUJ-ID  | execution_mode | workflow_path                  | primary_skill |
|---------|----------------|--------------------------------|---------------|
| CUJ-001 | workflow       | .claude/workflows/cuj-001.yaml | -             |
| CUJ-002 | skill          | -                              | deploy-check  |
| CUJ-003 | manual         | -                              | -             |
| CUJ-004 | workflow       | -                              | -             |
";

    fn router() -> WorkflowRouter {
        let mapping = CujMapping::parse(MAPPING).unwrap();
        WorkflowRouter::new(WorkflowTable::default()).with_cuj_mapping(mapping)
    }

    #[test]
    fn test_semantic_route() {
        let decision = router().route("Build a login form with email/password");
        assert_eq!(decision.routing_method, RoutingMethod::Semantic);
        assert_eq!(
            decision.selected_workflow,
            "workflows/greenfield-frontend.yaml"
        );
        assert!(decision.confidence > 0.0 && decision.confidence <= 1.0);
        assert!(decision.cuj_id.is_none());
    }

    #[test]
    fn test_cuj_mapping_route() {
        let decision = router().route("run CUJ-001");
        assert_eq!(decision.routing_method, RoutingMethod::CujMapping);
        assert_eq!(decision.selected_workflow, ".claude/workflows/cuj-001.yaml");
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.cuj_id.as_deref(), Some("CUJ-001"));
    }

    #[test]
    fn test_cuj_skill_route() {
        let decision = router().route("execute cuj-002");
        assert_eq!(decision.routing_method, RoutingMethod::CujSkill);
        assert_eq!(decision.primary_skill.as_deref(), Some("deploy-check"));
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_manual_mode_falls_back() {
        let decision = router().route("run cuj-003");
        assert_eq!(
            decision.routing_method,
            RoutingMethod::SemanticFallbackFromCuj
        );
        assert_eq!(decision.cuj_id.as_deref(), Some("CUJ-003"));
    }

    #[test]
    fn test_workflow_row_without_path_falls_back() {
        let decision = router().route("run cuj-004");
        assert_eq!(
            decision.routing_method,
            RoutingMethod::SemanticFallbackFromCuj
        );
    }

    #[test]
    fn test_unknown_cuj_falls_back() {
        let decision = router().route("run cuj-777");
        assert_eq!(
            decision.routing_method,
            RoutingMethod::SemanticFallbackFromCuj
        );
        assert_eq!(decision.cuj_id.as_deref(), Some("CUJ-777"));
    }

    #[test]
    fn test_no_mapping_loaded_falls_back() {
        let router = WorkflowRouter::new(WorkflowTable::default());
        let decision = router.route("run cuj-001");
        assert_eq!(
            decision.routing_method,
            RoutingMethod::SemanticFallbackFromCuj
        );
    }

    #[test]
    fn test_unknown_intent_gets_default_workflow() {
        let decision = router().route("hmm");
        assert_eq!(decision.selected_workflow, "workflows/general.yaml");
        assert!(decision.confidence <= 0.2);
    }

    #[test]
    fn test_decision_serializes_for_step0_artifact() {
        let decision = router().route("run CUJ-001");
        let json = serde_json::to_string(&decision).unwrap();
        assert!(json.contains("\"cuj_id\":\"CUJ-001\""));
        assert!(json.contains("\"routing_method\":\"cuj_mapping\""));
    }
}
