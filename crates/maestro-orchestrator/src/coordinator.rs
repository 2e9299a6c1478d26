use crate::handoff::{build_handoff, ContextMonitor, ContextPressure};
use crate::packet::PacketBuilder;
use crate::review::{evaluate, PlanReviewReport, ReviewMatrix, ReviewPolicy, ReviewScore};
use crate::templates::TemplateRegistry;
use crate::workflow::{WorkflowDef, WorkflowStep};
use maestro_cache::SharedCache;
use maestro_core::{
    ArtifactKind, ArtifactRecord, GateRecord, MaestroError, MaestroResult, MasterPlan,
    PhaseStatus, PlanTaskStatus, ReasoningRecord, RunPatch, RunStatus, ValidationStatus,
};
use maestro_memory::MemoryMonitor;
use maestro_oracle::{Oracle, OracleRequest, OracleStatus};
use maestro_router::{RouteDecision, WorkflowRouter};
use maestro_run::{CreateRunOptions, GateWriter, RunManager};
use maestro_skills::{estimate_tokens, OptimizeOptions, SkillOptimizer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Coordinator tuning knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base directory workflow paths resolve against.
    pub workflows_dir: PathBuf,
    /// Free-memory floor for admitting a step.
    pub min_free_mb_spawn: u64,
    /// Token budget handed to the skill optimizer per delegation.
    pub skill_budget_tokens: usize,
    /// Per-session context budget driving handoff thresholds.
    pub max_context_tokens: u64,
    /// Oracle timeout when a step does not set its own.
    pub default_step_timeout: Duration,
    /// Phase plans above this size are compacted.
    pub plan_compaction_tokens: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from("."),
            min_free_mb_spawn: 500,
            skill_budget_tokens: 4000,
            max_context_tokens: 200_000,
            default_step_timeout: Duration::from_secs(300),
            plan_compaction_tokens: 20_000,
        }
    }
}

/// Why execution stopped before completing the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StopReason {
    /// A plan review gate blocked a plan-producing step.
    ReviewBlocked { step: u32 },
    /// Two consecutive admission denials escalated to a reset.
    MemoryPressure,
    /// A session crossed the context reset threshold.
    ContextPressure,
}

/// Result of `process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub run_id: String,
    pub routing: RouteDecision,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub completed_steps: u32,
}

enum ExecutionResult {
    Completed,
    Paused(StopReason),
    Failed { step: u32, reason: String },
}

enum StepOutcome {
    Completed {
        task_id: String,
        step: u32,
        agent: String,
        prompt_tokens: u64,
        output_tokens: u64,
        fallback_note: Option<serde_json::Value>,
    },
    ReviewBlocked {
        task_id: String,
        step: u32,
        report: PlanReviewReport,
    },
    Failed {
        task_id: String,
        step: u32,
        reason: String,
    },
}

/// Shared state handed to spawned step executors.
struct StepContext {
    runs: Arc<RunManager>,
    oracle: Arc<dyn Oracle>,
    optimizer: Arc<SkillOptimizer>,
    templates: Arc<TemplateRegistry>,
    packets: Arc<PacketBuilder>,
    cache: Option<Arc<SharedCache>>,
    review_matrix: ReviewMatrix,
    review_policy: ReviewPolicy,
    config: CoordinatorConfig,
    run_id: String,
    user_request: String,
    task_type: String,
    complexity: maestro_router::Complexity,
}

/// The orchestrator coordinator: routes a request, instantiates a run,
/// and drives the workflow's phases through delegation, gating, and
/// artifact capture. Owns no persistent state of its own.
pub struct Coordinator {
    runs: Arc<RunManager>,
    router: WorkflowRouter,
    optimizer: Arc<SkillOptimizer>,
    cache: Option<Arc<SharedCache>>,
    memory: Arc<MemoryMonitor>,
    oracle: Arc<dyn Oracle>,
    templates: Arc<TemplateRegistry>,
    review_matrix: ReviewMatrix,
    review_policy: ReviewPolicy,
    config: CoordinatorConfig,
    cancel: Option<tokio::sync::watch::Receiver<bool>>,
}

impl Coordinator {
    pub fn new(
        runs: Arc<RunManager>,
        router: WorkflowRouter,
        optimizer: Arc<SkillOptimizer>,
        memory: Arc<MemoryMonitor>,
        oracle: Arc<dyn Oracle>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            runs,
            router,
            optimizer,
            cache: None,
            memory,
            oracle,
            templates: Arc::new(TemplateRegistry::new()),
            review_matrix: ReviewMatrix::default(),
            review_policy: ReviewPolicy::default(),
            config,
            cancel: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_review(mut self, matrix: ReviewMatrix, policy: ReviewPolicy) -> Self {
        self.review_matrix = matrix;
        self.review_policy = policy;
        self
    }

    /// Attach a cancellation handle; a `true` signal aborts the run.
    pub fn with_cancellation(mut self, cancel: tokio::sync::watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Entry point: route the prompt, instantiate the run, execute the
    /// workflow. The run record always reflects the outcome, including
    /// failures.
    pub async fn process(
        &self,
        user_prompt: &str,
        opts: CreateRunOptions,
    ) -> MaestroResult<ProcessOutcome> {
        let run_id = self.runs.create_run(user_prompt, opts).await?;
        self.runs
            .update_run(&run_id, RunPatch::status(RunStatus::Routing))
            .await?;

        // Step 0: routing. The decision is the authoritative artifact.
        let decision = self.router.route(user_prompt);
        self.record_route_decision(&run_id, &decision).await?;

        self.runs
            .update_run(
                &run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    selected_workflow: Some(decision.selected_workflow.clone()),
                    metadata: Some(maestro_core::RunMetadata {
                        confidence: Some(decision.confidence),
                        routing_method: Some(
                            serde_json::to_value(decision.routing_method)?
                                .as_str()
                                .unwrap_or_default()
                                .to_string(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        let workflow_path = self.config.workflows_dir.join(&decision.selected_workflow);
        let workflow = match WorkflowDef::load(&workflow_path).await {
            Ok(wf) => wf,
            Err(e) => {
                self.runs.fail_run(&run_id, e.to_string(), Some(0)).await?;
                return Err(e);
            }
        };

        let mut plan = workflow.to_plan(&format!("plan-{run_id}"));
        plan.validate()?;
        self.persist_plan(&run_id, &workflow, &plan).await?;

        let result = self
            .execute_plan(&run_id, user_prompt, &workflow, &mut plan, &decision)
            .await?;
        self.persist_plan(&run_id, &workflow, &plan).await?;

        let completed_steps = plan
            .phases
            .iter()
            .flat_map(|p| p.tasks.iter())
            .filter(|t| t.status == PlanTaskStatus::Completed)
            .count() as u32;

        let (status, stop_reason) = match result {
            ExecutionResult::Completed => {
                self.runs
                    .update_run(&run_id, RunPatch::status(RunStatus::Completed))
                    .await?;
                (RunStatus::Completed, None)
            }
            ExecutionResult::Paused(reason) => {
                self.runs
                    .update_run(&run_id, RunPatch::status(RunStatus::Paused))
                    .await?;
                (RunStatus::Paused, Some(reason))
            }
            ExecutionResult::Failed { step, reason } => {
                self.runs.fail_run(&run_id, &reason, Some(step)).await?;
                (RunStatus::Failed, None)
            }
        };

        info!(run_id = %run_id, status = %status, steps = completed_steps, "Run finished");
        Ok(ProcessOutcome {
            run_id,
            routing: decision,
            status,
            stop_reason,
            completed_steps,
        })
    }

    async fn record_route_decision(
        &self,
        run_id: &str,
        decision: &RouteDecision,
    ) -> MaestroResult<()> {
        let paths = self.runs.run_paths(run_id);
        let artifact_path = paths.artifacts_dir().join("route_decision.json");
        let json = serde_json::to_vec_pretty(decision)?;
        tokio::fs::write(&artifact_path, &json).await?;

        self.runs
            .register_artifact(
                run_id,
                ArtifactRecord::new(
                    "route_decision.json",
                    "artifacts/route_decision.json",
                    0,
                    "router",
                )
                .with_kind(ArtifactKind::RouteDecision)
                .with_status(ValidationStatus::Pass)
                .with_size(json.len() as u64),
            )
            .await?;

        let writer = GateWriter::new(&paths);
        writer
            .write_gate(
                &GateRecord::pass(0, "router").with_check(
                    "routing_method",
                    serde_json::to_value(decision.routing_method)?,
                ),
                false,
            )
            .await?;
        writer
            .write_reasoning(&ReasoningRecord::new(
                0,
                "router",
                serde_json::to_value(decision)?,
            ))
            .await
    }

    async fn persist_plan(
        &self,
        run_id: &str,
        workflow: &WorkflowDef,
        plan: &MasterPlan,
    ) -> MaestroResult<()> {
        let paths = self.runs.run_paths(run_id);
        let path = paths.plan_file(&workflow.name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(plan)?).await?;
        Ok(())
    }

    fn step_context(
        &self,
        run_id: &str,
        user_request: &str,
        decision: &RouteDecision,
    ) -> Arc<StepContext> {
        Arc::new(StepContext {
            runs: self.runs.clone(),
            oracle: self.oracle.clone(),
            optimizer: self.optimizer.clone(),
            templates: self.templates.clone(),
            packets: Arc::new(PacketBuilder::new(run_id)),
            cache: self.cache.clone(),
            review_matrix: self.review_matrix.clone(),
            review_policy: self.review_policy.clone(),
            config: self.config.clone(),
            run_id: run_id.to_string(),
            user_request: user_request.to_string(),
            task_type: decision.intent.to_string(),
            complexity: decision.complexity,
        })
    }

    /// Drive the plan phase by phase. Within a phase, eligible tasks run
    /// concurrently up to memory admission; results are applied before the
    /// next eligibility pass.
    async fn execute_plan(
        &self,
        run_id: &str,
        user_request: &str,
        workflow: &WorkflowDef,
        plan: &mut MasterPlan,
        decision: &RouteDecision,
    ) -> MaestroResult<ExecutionResult> {
        let ctx = self.step_context(run_id, user_request, decision);
        let bindings = workflow.task_bindings();
        let monitor = Arc::new(Mutex::new(ContextMonitor::new(
            self.config.max_context_tokens,
        )));
        let mut completed: HashSet<String> = HashSet::new();
        let mut consecutive_denials = 0u32;

        for phase_index in 0..plan.phases.len() {
            plan.phases[phase_index].status = PhaseStatus::Running;

            loop {
                if self.cancelled() {
                    let step = plan.phases[phase_index]
                        .tasks
                        .iter()
                        .filter(|t| !t.status.is_terminal())
                        .filter_map(|t| bindings.get(&t.task_id).map(|(n, _)| *n))
                        .min()
                        .unwrap_or(0);
                    self.runs.invalidate_inflight_artifacts(run_id, step).await?;
                    return Ok(ExecutionResult::Failed {
                        step,
                        reason: "run cancelled".to_string(),
                    });
                }

                let phase = &plan.phases[phase_index];
                if phase.is_done() {
                    break;
                }

                // Eligibility pass: declaration order, then task id.
                let mut eligible: Vec<(usize, String)> = phase
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.is_eligible(&completed))
                    .map(|(i, t)| (i, t.task_id.clone()))
                    .collect();
                eligible.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

                if eligible.is_empty() {
                    return Ok(ExecutionResult::Failed {
                        step: 0,
                        reason: format!(
                            "deadlock in phase '{}': pending tasks with unmet dependencies",
                            phase.name
                        ),
                    });
                }

                // Memory admission caps this pass's concurrency.
                let mut admitted = Vec::new();
                for (task_index, task_id) in eligible {
                    let admission = self
                        .memory
                        .can_spawn_subagent(self.config.min_free_mb_spawn);
                    if admission.can_spawn {
                        admitted.push((task_index, task_id));
                    } else {
                        warn!(
                            task_id = %task_id,
                            free_mb = admission.free_mb,
                            "Deferring task on memory admission"
                        );
                        if let Some(t) = plan.phases[phase_index]
                            .tasks
                            .iter_mut()
                            .find(|t| t.task_id == task_id)
                        {
                            t.status = PlanTaskStatus::Deferred;
                        }
                    }
                }

                if admitted.is_empty() {
                    consecutive_denials += 1;
                    if consecutive_denials >= 2 {
                        warn!(run_id = %run_id, "Repeated memory denial, preparing handoff");
                        build_handoff(
                            &self.runs,
                            run_id,
                            Some(plan.clone()),
                            vec![],
                            vec!["resume after memory pressure clears".to_string()],
                        )
                        .await?;
                        return Ok(ExecutionResult::Paused(StopReason::MemoryPressure));
                    }
                    if let Some(cache) = &self.cache {
                        let removed = cache.cleanup().await.unwrap_or(0);
                        info!(removed = removed, "Cache cleanup after admission denial");
                    }
                    continue;
                }
                consecutive_denials = 0;

                // Run the admitted set concurrently.
                let mut handles = Vec::new();
                for (task_index, task_id) in admitted {
                    let task = plan.phases[phase_index].tasks[task_index].clone();
                    let Some((step_number, step_def)) = bindings.get(&task_id).cloned() else {
                        return Err(MaestroError::Validation(format!(
                            "task {task_id} has no workflow step"
                        )));
                    };

                    plan.phases[phase_index].tasks[task_index].status = PlanTaskStatus::Running;
                    let ctx = ctx.clone();
                    handles.push(tokio::spawn(async move {
                        execute_step(ctx, task, step_def, step_number).await
                    }));
                }

                for handle in handles {
                    let outcome = handle
                        .await
                        .map_err(|e| MaestroError::Oracle(format!("step task panicked: {e}")))??;
                    match outcome {
                        StepOutcome::Completed {
                            task_id,
                            step,
                            agent,
                            prompt_tokens,
                            output_tokens,
                            fallback_note,
                        } => {
                            completed.insert(task_id.clone());
                            if let Some(task) = plan.get_task_mut(&task_id) {
                                task.status = PlanTaskStatus::Completed;
                            }
                            if let Some(note) = fallback_note {
                                plan.phases[phase_index].scratchpad.push(note);
                            }
                            self.runs
                                .update_run(
                                    run_id,
                                    RunPatch {
                                        current_step: Some(step),
                                        ..Default::default()
                                    },
                                )
                                .await?;

                            let mut mon = monitor.lock().await;
                            let pressure =
                                mon.record(&agent, prompt_tokens + output_tokens);
                            mon.write_sample(&self.runs, run_id).await?;
                            if pressure == ContextPressure::ResetRecommended {
                                drop(mon);
                                warn!(run_id = %run_id, agent = %agent, "Context budget critical, preparing handoff");
                                build_handoff(
                                    &self.runs,
                                    run_id,
                                    Some(plan.clone()),
                                    vec![],
                                    vec![format!("resume at step {}", step + 1)],
                                )
                                .await?;
                                return Ok(ExecutionResult::Paused(
                                    StopReason::ContextPressure,
                                ));
                            }
                        }
                        StepOutcome::ReviewBlocked { task_id, step, report } => {
                            error!(
                                task_id = %task_id,
                                step = step,
                                score = report.overall_score,
                                "Plan review blocked the step"
                            );
                            if let Some(task) = plan.get_task_mut(&task_id) {
                                task.status = PlanTaskStatus::Failed {
                                    reason: "plan review blocked".to_string(),
                                };
                            }
                            return Ok(ExecutionResult::Paused(StopReason::ReviewBlocked {
                                step,
                            }));
                        }
                        StepOutcome::Failed { task_id, step, reason } => {
                            error!(task_id = %task_id, step = step, reason = %reason, "Step failed");
                            if let Some(task) = plan.get_task_mut(&task_id) {
                                task.status = PlanTaskStatus::Failed {
                                    reason: reason.clone(),
                                };
                            }
                            return Ok(ExecutionResult::Failed { step, reason });
                        }
                    }
                }
            }

            let phase = &mut plan.phases[phase_index];
            phase.status = if phase.has_failures() {
                PhaseStatus::Failed
            } else {
                PhaseStatus::Completed
            };

            if plan.estimated_tokens() > self.config.plan_compaction_tokens {
                info!(tokens = plan.estimated_tokens(), "Compacting phase plan");
                plan.compact();
            }
            self.persist_plan(run_id, workflow, plan).await?;

            // Advisory resumption hint; recovery stays gate-authoritative.
            let checkpoint = serde_json::json!({
                "phase": plan.phases[phase_index].phase_id,
                "completed_steps": completed.len(),
                "updated_at": chrono::Utc::now(),
            });
            tokio::fs::write(
                self.runs.run_paths(run_id).checkpoint_file(),
                serde_json::to_vec_pretty(&checkpoint)?,
            )
            .await?;
        }

        Ok(ExecutionResult::Completed)
    }
}

/// Execute one delegated step end to end: packet, skills, oracle, gate,
/// artifacts. Runs inside `tokio::spawn`, so it only touches shared state
/// through the context.
async fn execute_step(
    ctx: Arc<StepContext>,
    task: maestro_core::PlanTask,
    step: WorkflowStep,
    step_number: u32,
) -> MaestroResult<StepOutcome> {
    let registry = ctx.runs.read_artifact_registry(&ctx.run_id).await?;

    // References: dependency artifacts from the registry plus explicit
    // file lists.
    let mut references: Vec<String> = Vec::new();
    for input in &step.requires {
        match registry.get(input) {
            Some(artifact) if artifact.validation_status == ValidationStatus::Pass => {
                references.push(artifact.path.clone());
            }
            Some(_) | None if step.optional.contains(input) => {}
            Some(_) => {
                return Ok(StepOutcome::Failed {
                    task_id: task.task_id,
                    step: step_number,
                    reason: format!("input artifact '{input}' has not passed validation"),
                });
            }
            None => {
                return Ok(StepOutcome::Failed {
                    task_id: task.task_id,
                    step: step_number,
                    reason: MaestroError::MissingArtifact(input.clone()).to_string(),
                });
            }
        }
    }

    let template = ctx.templates.get(&step.agent);
    let goal = format!("{}\n\nUser request: {}", task.description, ctx.user_request);
    let packet = ctx.packets.build(
        step_number,
        &step.agent,
        &goal,
        &task.constraints,
        &references,
        &template.definition_of_done,
    )?;

    let skill_block = skill_block(&ctx, &step.skills).await;
    let mut prompt = format!("{}\n\n{}", template.preamble, packet.render());
    if !skill_block.is_empty() {
        prompt.push_str("\n## SKILLS\n");
        prompt.push_str(&skill_block);
    }

    let timeout = step
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(ctx.config.default_step_timeout);

    // First attempt, then at most one fallback re-delegation.
    let mut agent = step.agent.clone();
    let mut fallback_note = None;
    let mut response = ctx
        .oracle
        .exec(OracleRequest::new(&agent, &prompt).with_timeout(timeout))
        .await?;

    if !response.is_success() {
        let reason = failure_reason(&response.status);
        if let Some(fallback) = &step.fallback_agent {
            warn!(
                task_id = %task.task_id,
                agent = %agent,
                fallback = %fallback,
                reason = %reason,
                "Re-delegating to fallback agent"
            );
            fallback_note = Some(serde_json::json!({
                "taskId": task.task_id,
                "failureReason": reason,
                "avoidApproach": agent,
            }));
            agent = fallback.clone();
            response = ctx
                .oracle
                .exec(OracleRequest::new(&agent, &prompt).with_timeout(timeout))
                .await?;
        }
    }

    if !response.is_success() {
        return Ok(StepOutcome::Failed {
            task_id: task.task_id,
            step: step_number,
            reason: failure_reason(&response.status),
        });
    }

    // Plan-producing steps must clear the review gate before anything is
    // registered.
    if step.emits_plan {
        let scores = parse_review_scores(&response.stdout);
        let requirements = ctx.review_matrix.resolve(&ctx.task_type, ctx.complexity);
        let report = evaluate(&requirements, &scores, &ctx.review_policy);
        if !report.passed {
            let paths = ctx.runs.run_paths(&ctx.run_id);
            let errors: Vec<String> = report
                .blocking_issues
                .iter()
                .map(|b| format!("{}: {}", b.reviewer, b.issue))
                .chain(
                    report
                        .missing_required
                        .iter()
                        .map(|r| format!("missing required reviewer: {r}")),
                )
                .collect();
            GateWriter::new(&paths)
                .write_gate(&GateRecord::fail(step_number, &agent, errors), false)
                .await?;
            return Ok(StepOutcome::ReviewBlocked {
                task_id: task.task_id,
                step: step_number,
                report,
            });
        }
    }

    // Capture artifacts: the oracle's verbatim output lands under
    // artifacts/<name> and is registered as passing.
    let paths = ctx.runs.run_paths(&ctx.run_id);
    for name in &step.produces {
        let rel = format!("artifacts/{name}");
        let abs = paths.root.join(&rel);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, response.stdout.as_bytes()).await?;

        let kind = if step.emits_plan {
            ArtifactKind::Plan
        } else {
            ArtifactKind::File
        };
        ctx.runs
            .register_artifact(
                &ctx.run_id,
                ArtifactRecord::new(name, &rel, step_number, &agent)
                    .with_kind(kind)
                    .with_status(ValidationStatus::Pass)
                    .with_size(response.stdout.len() as u64)
                    .with_dependencies(step.requires.clone()),
            )
            .await?;
    }

    let writer = GateWriter::new(&paths);
    writer
        .write_gate(
            &GateRecord::pass(step_number, &agent)
                .with_check("artifacts", serde_json::json!(step.produces))
                .with_check("truncated", serde_json::json!(response.stdout_truncated)),
            false,
        )
        .await?;
    writer
        .write_reasoning(&ReasoningRecord::new(
            step_number,
            &agent,
            parse_reasoning(&response.stdout),
        ))
        .await?;

    info!(
        task_id = %task.task_id,
        step = step_number,
        agent = %agent,
        duration_ms = response.duration_ms,
        "Step completed"
    );
    Ok(StepOutcome::Completed {
        task_id: task.task_id,
        step: step_number,
        agent,
        prompt_tokens: estimate_tokens(&prompt) as u64,
        output_tokens: estimate_tokens(&response.stdout) as u64,
        fallback_note,
    })
}

/// Optimized skill content for a delegation, served through the shared
/// cache when one is attached so sibling processes reuse the rendering.
async fn skill_block(ctx: &StepContext, skills: &[String]) -> String {
    if skills.is_empty() {
        return String::new();
    }
    let mut sorted = skills.to_vec();
    sorted.sort();
    let key = format!(
        "skill-context:{}:{}",
        ctx.config.skill_budget_tokens,
        sorted.join(",")
    );

    if let Some(cache) = &ctx.cache {
        if let Ok(Some(hit)) = cache.get(&key).await {
            return hit;
        }
    }

    let optimized = ctx.optimizer.optimize(
        skills,
        &[],
        &OptimizeOptions {
            max_tokens: ctx.config.skill_budget_tokens,
            ..OptimizeOptions::default()
        },
    );
    let mut block = String::new();
    for skill in &optimized.skills {
        block.push_str(&skill.content);
        block.push('\n');
    }

    if let Some(cache) = &ctx.cache {
        if let Err(e) = cache.set(key, block.clone()).await {
            warn!(error = %e, "Skill cache write failed");
        }
    }
    block
}

fn failure_reason(status: &OracleStatus) -> String {
    match status {
        OracleStatus::TimedOut => "timeout".to_string(),
        OracleStatus::Failed { exit_code } => format!("oracle exit {exit_code}"),
        OracleStatus::Success => "success".to_string(),
    }
}

/// Reviewer verdicts ride in the plan step's JSON output as a `reviews`
/// array; the runtime validates shape only.
fn parse_review_scores(stdout: &str) -> Vec<ReviewScore> {
    for line in stdout.lines().rev() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if let Some(reviews) = value.get("reviews") {
            if let Ok(scores) = serde_json::from_value::<Vec<ReviewScore>>(reviews.clone()) {
                return scores;
            }
        }
    }
    Vec::new()
}

/// Optional structured reasoning from the oracle output; the raw text tail
/// otherwise.
fn parse_reasoning(stdout: &str) -> serde_json::Value {
    for line in stdout.lines().rev() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(reasoning) = value.get("reasoning") {
                return reasoning.clone();
            }
        }
    }
    let tail: String = stdout.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
    serde_json::Value::String(tail)
}
