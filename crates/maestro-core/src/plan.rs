use crate::error::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Execution state of a plan task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTaskStatus {
    Pending,
    Running,
    /// Admission was denied (memory pressure); retried on the next pass.
    Deferred,
    Completed,
    Failed { reason: String },
}

impl PlanTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanTaskStatus::Completed | PlanTaskStatus::Failed { .. }
        )
    }
}

/// One delegated unit of work inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "phaseId")]
    pub phase_id: String,
    #[serde(rename = "assignedAgent")]
    pub assigned_agent: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "PlanTask::default_status")]
    pub status: PlanTaskStatus,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, rename = "testRequirements")]
    pub test_requirements: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl PlanTask {
    fn default_status() -> PlanTaskStatus {
        PlanTaskStatus::Pending
    }

    pub fn new(
        task_id: impl Into<String>,
        phase_id: impl Into<String>,
        assigned_agent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            phase_id: phase_id.into(),
            assigned_agent: assigned_agent.into(),
            description: description.into(),
            dependencies: Vec::new(),
            status: PlanTaskStatus::Pending,
            artifacts: Vec::new(),
            test_requirements: Vec::new(),
            constraints: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    /// A task is eligible when pending (or deferred) and every declared
    /// dependency appears in `completed` (current phase or cross-phase
    /// results).
    pub fn is_eligible(&self, completed: &HashSet<String>) -> bool {
        matches!(
            self.status,
            PlanTaskStatus::Pending | PlanTaskStatus::Deferred
        ) && self.dependencies.iter().all(|d| completed.contains(d))
    }
}

/// State of a phase; advances only when every task in it terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A group of tasks executed together; phases run strictly in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    #[serde(rename = "phaseId")]
    pub phase_id: String,
    pub name: String,
    #[serde(default = "PlanPhase::default_status")]
    pub status: PhaseStatus,
    pub tasks: Vec<PlanTask>,
    /// Free-form working notes; dropped during compaction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scratchpad: Vec<serde_json::Value>,
}

impl PlanPhase {
    fn default_status() -> PhaseStatus {
        PhaseStatus::Pending
    }

    pub fn new(phase_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            name: name.into(),
            status: PhaseStatus::Pending,
            tasks: Vec::new(),
            scratchpad: Vec::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<PlanTask>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn has_failures(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.status, PlanTaskStatus::Failed { .. }))
    }
}

/// The master plan: phases of tasks forming a DAG across dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterPlan {
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(rename = "workflowId")]
    pub workflow_id: String,
    pub phases: Vec<PlanPhase>,
}

impl MasterPlan {
    pub fn new(plan_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            workflow_id: workflow_id.into(),
            phases: Vec::new(),
        }
    }

    pub fn with_phases(mut self, phases: Vec<PlanPhase>) -> Self {
        self.phases = phases;
        self
    }

    fn tasks(&self) -> impl Iterator<Item = &PlanTask> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }

    pub fn get_task(&self, task_id: &str) -> Option<&PlanTask> {
        self.tasks().find(|t| t.task_id == task_id)
    }

    pub fn get_task_mut(&mut self, task_id: &str) -> Option<&mut PlanTask> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.tasks.iter_mut())
            .find(|t| t.task_id == task_id)
    }

    /// Validate the plan at load time: unique task ids, dependencies that
    /// resolve, and no cycles. Cycles are an input error and are never
    /// materialized into runtime state.
    pub fn validate(&self) -> MaestroResult<()> {
        let mut ids = HashSet::new();
        for task in self.tasks() {
            if !ids.insert(task.task_id.as_str()) {
                return Err(MaestroError::Validation(format!(
                    "duplicate task id: {}",
                    task.task_id
                )));
            }
        }
        for task in self.tasks() {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(MaestroError::Validation(format!(
                        "task {} depends on unknown task {}",
                        task.task_id, dep
                    )));
                }
            }
        }
        if self.has_cycle() {
            return Err(MaestroError::Validation(
                "dependency cycle detected in plan".to_string(),
            ));
        }
        Ok(())
    }

    /// DFS over the dependency graph; true when a back edge exists.
    fn has_cycle(&self) -> bool {
        let deps: HashMap<&str, &Vec<String>> = self
            .tasks()
            .map(|t| (t.task_id.as_str(), &t.dependencies))
            .collect();
        let mut visited: HashMap<&str, u8> = HashMap::new();
        for &id in deps.keys() {
            if Self::dfs_cycle(id, &deps, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a Vec<String>>,
        visited: &mut HashMap<&'a str, u8>,
    ) -> bool {
        match visited.get(id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task_deps) = deps.get(id) {
            for dep in task_deps.iter() {
                if Self::dfs_cycle(dep.as_str(), deps, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }

    /// Rough token estimate over the serialized plan (4 chars per token).
    pub fn estimated_tokens(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len() / 4).unwrap_or(0)
    }

    /// Compact the plan in place: task identities, statuses, and artifact
    /// pointers are retained; descriptions are truncated and scratchpads
    /// dropped.
    pub fn compact(&mut self) {
        const MAX_DESCRIPTION: usize = 200;
        for phase in &mut self.phases {
            phase.scratchpad.clear();
            for task in &mut phase.tasks {
                if task.description.len() > MAX_DESCRIPTION {
                    let mut cut = MAX_DESCRIPTION;
                    while !task.description.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    task.description.truncate(cut);
                    task.description.push_str("…");
                }
                task.test_requirements.clear();
                task.files.clear();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn two_phase_plan() -> MasterPlan {
        MasterPlan::new("plan-1", "greenfield-frontend.yaml").with_phases(vec![
            PlanPhase::new("phase-1", "Design").with_tasks(vec![
                PlanTask::new("t1", "phase-1", "planner", "Plan the feature"),
                PlanTask::new("t2", "phase-1", "architect", "Design the architecture")
                    .with_dependencies(vec!["t1".into()]),
            ]),
            PlanPhase::new("phase-2", "Build").with_tasks(vec![
                PlanTask::new("t3", "phase-2", "developer", "Implement")
                    .with_dependencies(vec!["t2".into()]),
                PlanTask::new("t4", "phase-2", "qa", "Test").with_dependencies(vec!["t3".into()]),
            ]),
        ])
    }

    #[test]
    fn test_valid_plan_passes_validation() {
        two_phase_plan().validate().unwrap();
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let plan = MasterPlan::new("p", "wf").with_phases(vec![PlanPhase::new("ph", "Phase")
            .with_tasks(vec![
                PlanTask::new("t1", "ph", "a", "x"),
                PlanTask::new("t1", "ph", "b", "y"),
            ])]);
        assert!(matches!(
            plan.validate(),
            Err(MaestroError::Validation(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let plan = MasterPlan::new("p", "wf").with_phases(vec![PlanPhase::new("ph", "Phase")
            .with_tasks(vec![
                PlanTask::new("t1", "ph", "a", "x").with_dependencies(vec!["ghost".into()])
            ])]);
        assert!(matches!(
            plan.validate(),
            Err(MaestroError::Validation(msg)) if msg.contains("unknown task")
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let plan = MasterPlan::new("p", "wf").with_phases(vec![PlanPhase::new("ph", "Phase")
            .with_tasks(vec![
                PlanTask::new("t1", "ph", "a", "x").with_dependencies(vec!["t2".into()]),
                PlanTask::new("t2", "ph", "b", "y").with_dependencies(vec!["t1".into()]),
            ])]);
        assert!(matches!(
            plan.validate(),
            Err(MaestroError::Validation(msg)) if msg.contains("cycle")
        ));
    }

    #[test]
    fn test_eligibility_follows_dependencies() {
        let plan = two_phase_plan();
        let mut completed = HashSet::new();

        let t1 = plan.get_task("t1").unwrap();
        let t2 = plan.get_task("t2").unwrap();
        assert!(t1.is_eligible(&completed));
        assert!(!t2.is_eligible(&completed));

        completed.insert("t1".to_string());
        assert!(t2.is_eligible(&completed));
    }

    #[test]
    fn test_deferred_task_stays_eligible() {
        let mut plan = two_phase_plan();
        plan.get_task_mut("t1").unwrap().status = PlanTaskStatus::Deferred;
        let completed = HashSet::new();
        assert!(plan.get_task("t1").unwrap().is_eligible(&completed));
    }

    #[test]
    fn test_phase_done_and_failures() {
        let mut plan = two_phase_plan();
        {
            let phase = &mut plan.phases[0];
            assert!(!phase.is_done());
            phase.tasks[0].status = PlanTaskStatus::Completed;
            phase.tasks[1].status = PlanTaskStatus::Failed {
                reason: "timeout".into(),
            };
            assert!(phase.is_done());
            assert!(phase.has_failures());
        }
    }

    #[test]
    fn test_compaction_retains_identity_and_artifacts() {
        let mut plan = two_phase_plan();
        {
            let task = plan.get_task_mut("t1").unwrap();
            task.description = "x".repeat(5000);
            task.artifacts.push("plan.json".into());
            task.status = PlanTaskStatus::Completed;
        }
        plan.phases[0]
            .scratchpad
            .push(serde_json::json!({"note": "verbose intermediate log"}));

        let before = plan.estimated_tokens();
        plan.compact();
        let after = plan.estimated_tokens();
        assert!(after < before);

        let task = plan.get_task("t1").unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.status, PlanTaskStatus::Completed);
        assert_eq!(task.artifacts, vec!["plan.json".to_string()]);
        assert!(task.description.len() < 300);
        assert!(plan.phases[0].scratchpad.is_empty());
    }

    #[test]
    fn test_plan_wire_field_names() {
        let plan = two_phase_plan();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"planId\""));
        assert!(json.contains("\"taskId\""));
        assert!(json.contains("\"assignedAgent\""));
    }
}
