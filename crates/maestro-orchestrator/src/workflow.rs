//! Workflow definitions: YAML documents describing phases of agent steps.

use maestro_core::{MaestroError, MaestroResult, MasterPlan, PlanPhase, PlanTask};
use maestro_run::StepRequirements;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One agent step inside a workflow phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent: String,
    /// Artifact names this step registers on success.
    #[serde(default)]
    pub produces: Vec<String>,
    /// Artifact names this step needs as inputs.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Requires that may be absent without blocking.
    #[serde(default)]
    pub optional: Vec<String>,
    /// Plan-producing steps run the plan review gate.
    #[serde(default)]
    pub emits_plan: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Re-delegation target after one oracle failure.
    #[serde(default)]
    pub fallback_agent: Option<String>,
    /// Skills injected into this step's context packet.
    #[serde(default)]
    pub skills: Vec<String>,
}

/// A named group of steps; phases execute strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPhase {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

/// A workflow definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub phases: Vec<WorkflowPhase>,
}

impl WorkflowDef {
    pub async fn load(path: &Path) -> MaestroResult<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            MaestroError::Config(format!("cannot read workflow {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> MaestroResult<Self> {
        let def: WorkflowDef = serde_yaml_ng::from_str(raw)
            .map_err(|e| MaestroError::Validation(format!("invalid workflow yaml: {e}")))?;
        def.validate()?;
        Ok(def)
    }

    /// Validate at load: at least one step, unique produced artifact
    /// names, every `requires` satisfied by an earlier (or same-phase)
    /// producer, and an acyclic step graph.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.phases.iter().all(|p| p.steps.is_empty()) {
            return Err(MaestroError::Validation(format!(
                "workflow {} has no steps",
                self.name
            )));
        }

        let mut produced: HashSet<&str> = HashSet::new();
        for phase in &self.phases {
            for step in &phase.steps {
                for artifact in &step.produces {
                    if !produced.insert(artifact.as_str()) {
                        return Err(MaestroError::Validation(format!(
                            "artifact '{artifact}' produced by more than one step"
                        )));
                    }
                }
            }
        }

        for phase in &self.phases {
            for step in &phase.steps {
                for input in &step.requires {
                    if !produced.contains(input.as_str()) {
                        return Err(MaestroError::Validation(format!(
                            "step '{}' requires '{input}' which no step produces",
                            step.agent
                        )));
                    }
                }
            }
        }

        // The derived plan shares the runtime DAG check.
        self.to_plan("validation").validate()
    }

    fn task_id(phase_index: usize, step_index: usize, agent: &str) -> String {
        format!("p{}-s{}-{agent}", phase_index + 1, step_index + 1)
    }

    /// Flatten to globally numbered steps (step 0 is the router).
    pub fn numbered_steps(&self) -> Vec<(u32, &WorkflowStep)> {
        let mut out = Vec::new();
        let mut index = 1u32;
        for phase in &self.phases {
            for step in &phase.steps {
                out.push((index, step));
                index += 1;
            }
        }
        out
    }

    /// Map derived task ids to their global step number and definition.
    pub fn task_bindings(&self) -> HashMap<String, (u32, WorkflowStep)> {
        let mut map = HashMap::new();
        let mut number = 1u32;
        for (phase_index, phase) in self.phases.iter().enumerate() {
            for (step_index, step) in phase.steps.iter().enumerate() {
                map.insert(
                    Self::task_id(phase_index, step_index, &step.agent),
                    (number, step.clone()),
                );
                number += 1;
            }
        }
        map
    }

    /// Step requirements for recovery scans, router step included.
    pub fn step_requirements(&self) -> Vec<StepRequirements> {
        let mut steps = vec![StepRequirements {
            step: 0,
            agent: "router".to_string(),
            required_inputs: Vec::new(),
            optional_inputs: Vec::new(),
        }];
        for (index, step) in self.numbered_steps() {
            steps.push(StepRequirements {
                step: index,
                agent: step.agent.clone(),
                required_inputs: step
                    .requires
                    .iter()
                    .filter(|r| !step.optional.contains(r))
                    .cloned()
                    .collect(),
                optional_inputs: step.optional.clone(),
            });
        }
        steps
    }

    /// Derive the executable plan: one task per step, dependencies wired
    /// from `requires` to the producing task.
    pub fn to_plan(&self, plan_id: &str) -> MasterPlan {
        let mut producer_of: HashMap<&str, String> = HashMap::new();
        let mut task_ids: Vec<Vec<String>> = Vec::new();

        for (phase_index, phase) in self.phases.iter().enumerate() {
            let mut ids = Vec::new();
            for (step_index, step) in phase.steps.iter().enumerate() {
                let task_id = Self::task_id(phase_index, step_index, &step.agent);
                for artifact in &step.produces {
                    producer_of.insert(artifact.as_str(), task_id.clone());
                }
                ids.push(task_id);
            }
            task_ids.push(ids);
        }

        let phases = self
            .phases
            .iter()
            .enumerate()
            .map(|(phase_index, phase)| {
                let phase_id = format!("phase-{}", phase_index + 1);
                let tasks = phase
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(step_index, step)| {
                        let task_id = task_ids[phase_index][step_index].clone();
                        let mut deps: Vec<String> = step
                            .requires
                            .iter()
                            .filter_map(|input| producer_of.get(input.as_str()).cloned())
                            .filter(|dep| *dep != task_id)
                            .collect();
                        deps.sort();
                        deps.dedup();
                        let mut task = PlanTask::new(
                            task_id,
                            phase_id.clone(),
                            &step.agent,
                            format!("{} step of workflow {}", step.agent, self.name),
                        )
                        .with_dependencies(deps);
                        task.artifacts = step.produces.clone();
                        task
                    })
                    .collect();
                PlanPhase::new(phase_id, &phase.name).with_tasks(tasks)
            })
            .collect();

        MasterPlan::new(plan_id, &self.name).with_phases(phases)
    }
}
