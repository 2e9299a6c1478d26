mod config;

use clap::{Parser, Subcommand};
use config::MaestroConfig;
use maestro_cache::SharedCache;
use maestro_core::{exit, MaestroError, MaestroResult, RunStatus};
use maestro_memory::MemoryMonitor;
use maestro_oracle::{BackendRegistry, ProcessOracle};
use maestro_orchestrator::{Coordinator, CoordinatorConfig, WorkflowDef};
use maestro_router::{CujMapping, WorkflowRouter, WorkflowTable};
use maestro_run::{recover, CreateRunOptions, RunManager};
use maestro_skills::{SkillOptimizer, SummaryBuilder, SummaryIndex};
use maestro_snapshot::{SnapshotManager, SnapshotState, SnapshotType};
use maestro_telemetry::{TelemetryEvent, TelemetryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "maestro", about = "Maestro — multi-agent workflow orchestration runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "maestro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a prompt and execute the selected workflow
    Process {
        /// The user request
        prompt: String,
        /// Resume an existing run id instead of minting one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Compute resumption state for an interrupted run
    Recover {
        run_id: String,
        /// Include reasoning files in the report
        #[arg(long)]
        include_reasoning: bool,
    },
    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Manage on-host telemetry
    Telemetry {
        #[command(subcommand)]
        action: TelemetryAction,
    },
    /// Memory admission checks
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Capture a new snapshot
    Create {
        #[arg(long, default_value = "manual")]
        r#type: String,
        /// Include one run's summary in the captured state
        #[arg(long)]
        run_id: Option<String>,
    },
    /// List snapshots, newest first
    List {
        /// Include corrupt entries, marked invalid
        #[arg(long)]
        include_invalid: bool,
    },
    /// Print one snapshot
    Get {
        #[arg(long)]
        snapshot_id: String,
    },
    /// Delete a snapshot
    Delete {
        #[arg(long)]
        snapshot_id: String,
        /// Required for pinned snapshots
        #[arg(long)]
        force: bool,
    },
    /// Delete old snapshots until the keep count remains
    Prune {
        #[arg(long, default_value_t = 10)]
        keep_count: usize,
    },
}

#[derive(Subcommand)]
enum TelemetryAction {
    /// Show whether telemetry is enabled
    Status,
    Enable,
    Disable,
    /// Aggregate events over a period
    Report {
        /// Period like `30d`
        #[arg(long, default_value = "30d")]
        period: String,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Write an export document
    Export {
        #[arg(long, default_value = "30d")]
        period: String,
    },
    /// Delete all stored events
    Purge {
        /// Purge refuses to run without confirmation
        #[arg(long)]
        confirm: bool,
    },
    /// Record one event
    LogEvent {
        #[arg(long)]
        r#type: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Check whether a subagent spawn would be admitted
    CheckSpawn {
        #[arg(long)]
        min_free_mb: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match MaestroConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(exit::EXIT_FATAL);
        }
    };

    match run(cli.command, config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "Command failed");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(command: Commands, config: MaestroConfig) -> MaestroResult<i32> {
    match command {
        Commands::Process { prompt, run_id } => cmd_process(&config, &prompt, run_id).await,
        Commands::Recover {
            run_id,
            include_reasoning,
        } => cmd_recover(&config, &run_id, include_reasoning).await,
        Commands::Snapshot { action } => cmd_snapshot(&config, action).await,
        Commands::Telemetry { action } => cmd_telemetry(&config, action).await,
        Commands::Memory { action } => cmd_memory(&config, action),
    }
}

async fn cmd_process(
    config: &MaestroConfig,
    prompt: &str,
    run_id: Option<String>,
) -> MaestroResult<i32> {
    if let Some(tag) = MaestroConfig::session_tag() {
        info!(session = %tag, "Session tag detected");
    }

    let runs = Arc::new(RunManager::new(&config.data_dir));

    let mut router = WorkflowRouter::new(WorkflowTable::default());
    if let Some(cuj_index) = &config.cuj_index {
        match tokio::fs::read_to_string(cuj_index).await {
            Ok(raw) => match CujMapping::parse(&raw) {
                Ok(mapping) => router = router.with_cuj_mapping(mapping),
                Err(e) => warn!(error = %e, "CUJ mapping unusable, semantic routing only"),
            },
            Err(e) => warn!(error = %e, "CUJ index unreadable, semantic routing only"),
        }
    }

    // Skill summaries: load the persisted index, refresh from sources when
    // a skills directory is configured.
    let index_path = config.data_dir.join("skill-summaries.json");
    let mut index = SummaryIndex::load(&index_path).await?;
    if let Some(skills_dir) = &config.skills_dir {
        let rebuilt = SummaryBuilder::new(skills_dir).refresh(&mut index).await?;
        if rebuilt > 0 {
            index.save(&index_path).await?;
        }
    }

    let cache = Arc::new(SharedCache::new(&config.data_dir));
    let memory = Arc::new(MemoryMonitor::new(config.memory.clone()));
    let oracle = Arc::new(ProcessOracle::new(BackendRegistry::new()));

    let coordinator = Coordinator::new(
        runs,
        router,
        Arc::new(SkillOptimizer::new(index)),
        memory.clone(),
        oracle,
        CoordinatorConfig {
            workflows_dir: config.workflows_dir.clone(),
            min_free_mb_spawn: config.memory.min_free_mb_spawn_subagent,
            max_context_tokens: config.max_context_tokens,
            ..CoordinatorConfig::default()
        },
    )
    .with_cache(cache);

    let telemetry = TelemetryStore::new(config.data_dir.join("telemetry"))
        .with_retention_days(config.telemetry_retention_days);
    let outcome = coordinator
        .process(prompt, CreateRunOptions { run_id })
        .await?;
    telemetry
        .log_event(TelemetryEvent::new(
            "run_finished",
            serde_json::json!({
                "run_id": outcome.run_id,
                "status": outcome.status.to_string(),
                "routing_method": outcome.routing.routing_method,
                "completed_steps": outcome.completed_steps,
            }),
        ))
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(match outcome.status {
        RunStatus::Completed => exit::EXIT_OK,
        RunStatus::Paused
            if outcome.stop_reason
                == Some(maestro_orchestrator::StopReason::MemoryPressure) =>
        {
            exit::EXIT_MEMORY_ABORT
        }
        _ => exit::EXIT_FAILURE,
    })
}

async fn cmd_recover(
    config: &MaestroConfig,
    run_id: &str,
    include_reasoning: bool,
) -> MaestroResult<i32> {
    let runs = RunManager::new(&config.data_dir);
    let run = runs.read_run(run_id).await?;
    let workflow_rel = run.selected_workflow.clone().ok_or_else(|| {
        MaestroError::Validation(format!("run {run_id} has no selected workflow"))
    })?;
    let workflow = WorkflowDef::load(&config.workflows_dir.join(&workflow_rel)).await?;

    let report = recover(&runs, run_id, &workflow.step_requirements(), include_reasoning).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit::EXIT_OK)
}

fn parse_snapshot_type(s: &str) -> MaestroResult<SnapshotType> {
    match s {
        "auto" => Ok(SnapshotType::Auto),
        "manual" => Ok(SnapshotType::Manual),
        "checkpoint" => Ok(SnapshotType::Checkpoint),
        "milestone" => Ok(SnapshotType::Milestone),
        "recovery" => Ok(SnapshotType::Recovery),
        other => Err(MaestroError::Validation(format!(
            "unknown snapshot type: {other}"
        ))),
    }
}

async fn cmd_snapshot(config: &MaestroConfig, action: SnapshotAction) -> MaestroResult<i32> {
    let manager = SnapshotManager::new(config.data_dir.join("snapshots"));
    match action {
        SnapshotAction::Create { r#type, run_id } => {
            let snapshot_type = parse_snapshot_type(&r#type)?;
            let mut state = SnapshotState {
                project: SnapshotManager::capture_project_state(&config.data_dir).await,
                ..SnapshotState::default()
            };
            if let Some(run_id) = run_id {
                let runs = RunManager::new(&config.data_dir);
                let run = runs.read_run(&run_id).await?;
                state.workflows.push(maestro_snapshot::RunSummary {
                    run_id: run.run_id.clone(),
                    status: run.status.to_string(),
                    current_step: run.current_step,
                    selected_workflow: run.selected_workflow.clone(),
                });
                let registry = runs.read_artifact_registry(&run_id).await?;
                state.artifacts = registry.artifacts.values().cloned().collect();
            }
            let record = manager.create(snapshot_type, state).await?;
            println!("{}", record.snapshot_id);
        }
        SnapshotAction::List { include_invalid } => {
            let records = manager.list(include_invalid).await?;
            for record in records {
                println!(
                    "{}  {}  {}  valid={}",
                    record.snapshot_id,
                    record.snapshot_type,
                    record.created_at.to_rfc3339(),
                    record.validation.is_valid
                );
            }
        }
        SnapshotAction::Get { snapshot_id } => {
            let record = manager.get(&snapshot_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        SnapshotAction::Delete { snapshot_id, force } => {
            manager.delete(&snapshot_id, force).await?;
        }
        SnapshotAction::Prune { keep_count } => {
            let pruned = manager.prune(keep_count, true).await?;
            println!("pruned {pruned} snapshots");
        }
    }
    Ok(exit::EXIT_OK)
}

/// Parse a `--period 30d` argument.
fn parse_period_days(period: &str) -> MaestroResult<u32> {
    period
        .strip_suffix('d')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| MaestroError::Validation(format!("invalid period: {period} (want Nd)")))
}

async fn cmd_telemetry(config: &MaestroConfig, action: TelemetryAction) -> MaestroResult<i32> {
    let store = TelemetryStore::new(config.data_dir.join("telemetry"))
        .with_retention_days(config.telemetry_retention_days);
    match action {
        TelemetryAction::Status => {
            println!(
                "telemetry: {}",
                if store.is_enabled().await { "enabled" } else { "disabled" }
            );
        }
        TelemetryAction::Enable => store.enable().await?,
        TelemetryAction::Disable => store.disable().await?,
        TelemetryAction::Report { period, format } => {
            let report = store.report(parse_period_days(&period)?).await?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} events over {}d",
                    report.total_events, report.period_days
                );
                for (event_type, count) in &report.by_type {
                    println!("  {event_type}: {count}");
                }
            }
        }
        TelemetryAction::Export { period } => {
            let out = config.data_dir.join("telemetry").join(format!(
                "export-{}.json",
                chrono::Utc::now().timestamp()
            ));
            let count = store.export(parse_period_days(&period)?, &out).await?;
            println!("exported {count} events to {}", out.display());
        }
        TelemetryAction::Purge { confirm } => {
            if !confirm {
                return Err(MaestroError::Validation(
                    "refusing to purge without --confirm".to_string(),
                ));
            }
            let removed = store.purge_all().await?;
            println!("purged {removed} event files");
        }
        TelemetryAction::LogEvent { r#type, data } => {
            let payload: serde_json::Value = serde_json::from_str(&data)?;
            let logged = store.log_event(TelemetryEvent::new(r#type, payload)).await?;
            if !logged {
                warn!("Telemetry disabled, event dropped");
            }
        }
    }
    Ok(exit::EXIT_OK)
}

fn cmd_memory(config: &MaestroConfig, action: MemoryAction) -> MaestroResult<i32> {
    match action {
        MemoryAction::CheckSpawn { min_free_mb } => {
            let monitor = MemoryMonitor::new(config.memory.clone());
            let admission = monitor.can_spawn_subagent(
                min_free_mb.unwrap_or(config.memory.min_free_mb_spawn_subagent),
            );
            println!("{}", serde_json::to_string_pretty(&admission)?);
            Ok(if admission.can_spawn {
                exit::EXIT_OK
            } else {
                exit::EXIT_MEMORY_ABORT
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period_days("30d").unwrap(), 30);
        assert_eq!(parse_period_days("7d").unwrap(), 7);
        assert!(parse_period_days("monthly").is_err());
        assert!(parse_period_days("30").is_err());
    }

    #[test]
    fn test_parse_snapshot_type() {
        assert_eq!(parse_snapshot_type("manual").unwrap(), SnapshotType::Manual);
        assert_eq!(
            parse_snapshot_type("milestone").unwrap(),
            SnapshotType::Milestone
        );
        assert!(parse_snapshot_type("weekly").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        Cli::try_parse_from(["maestro", "process", "build a login form"]).unwrap();
        Cli::try_parse_from(["maestro", "recover", "run-1-aaaaaaaa", "--include-reasoning"])
            .unwrap();
        Cli::try_parse_from(["maestro", "snapshot", "prune", "--keep-count", "5"]).unwrap();
        Cli::try_parse_from(["maestro", "telemetry", "report", "--period", "7d"]).unwrap();
        Cli::try_parse_from(["maestro", "memory", "check-spawn", "--min-free-mb", "500"])
            .unwrap();
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["maestro", "teleport"]).is_err());
    }
}
