//! Delegation templates: per-agent prompt preambles with a neutral
//! fallback.

use std::collections::HashMap;

/// Prompt preamble and default definition of done for one agent.
#[derive(Debug, Clone)]
pub struct DelegationTemplate {
    pub agent: String,
    pub preamble: String,
    pub definition_of_done: String,
}

/// Registry of delegation templates. Agents without a template get the
/// neutral fallback so delegation never fails on a missing preamble.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, DelegationTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        for template in default_templates() {
            templates.insert(template.agent.clone(), template);
        }
        Self { templates }
    }

    pub fn register(&mut self, template: DelegationTemplate) {
        self.templates.insert(template.agent.clone(), template);
    }

    pub fn get(&self, agent: &str) -> DelegationTemplate {
        self.templates
            .get(agent)
            .cloned()
            .unwrap_or_else(|| neutral_template(agent))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the default template set for the built-in agents.
pub fn default_templates() -> Vec<DelegationTemplate> {
    vec![
        DelegationTemplate {
            agent: "planner".into(),
            preamble: PLANNER_PREAMBLE.into(),
            definition_of_done: "A phased plan with tasks, owners, and dependencies exists."
                .into(),
        },
        DelegationTemplate {
            agent: "architect".into(),
            preamble: ARCHITECT_PREAMBLE.into(),
            definition_of_done: "An architecture document covering components and interfaces \
                                 exists."
                .into(),
        },
        DelegationTemplate {
            agent: "developer".into(),
            preamble: DEVELOPER_PREAMBLE.into(),
            definition_of_done: "The implementation matches the architecture and compiles."
                .into(),
        },
        DelegationTemplate {
            agent: "qa".into(),
            preamble: QA_PREAMBLE.into(),
            definition_of_done: "Tests cover the acceptance criteria and pass.".into(),
        },
        DelegationTemplate {
            agent: "security-architect".into(),
            preamble: SECURITY_PREAMBLE.into(),
            definition_of_done: "Security constraints are enumerated with mitigations.".into(),
        },
    ]
}

fn neutral_template(agent: &str) -> DelegationTemplate {
    DelegationTemplate {
        agent: agent.to_string(),
        preamble: format!(
            "You are the {agent} agent. Complete the delegated task exactly as described, \
             using only the provided references."
        ),
        definition_of_done: "The delegated task is complete and its outputs are produced."
            .into(),
    }
}

const PLANNER_PREAMBLE: &str = "\
You are the planner agent. Decompose the goal into phases and tasks with \
explicit dependencies and owners. Do not implement anything yourself.";

const ARCHITECT_PREAMBLE: &str = "\
You are the architect agent. Produce a component-level design with \
interfaces, data flow, and the constraints downstream implementers must \
honor.";

const DEVELOPER_PREAMBLE: &str = "\
You are the developer agent. Implement exactly what the architecture \
describes, honoring every listed constraint. Produce the files named in \
the task.";

const QA_PREAMBLE: &str = "\
You are the QA agent. Write tests against the definition of done and \
report failures precisely.";

const SECURITY_PREAMBLE: &str = "\
You are the security architect agent. Review the design for trust \
boundaries, input validation, and secrets handling; list blocking issues \
explicitly.";
