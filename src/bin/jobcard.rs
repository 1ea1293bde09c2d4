//! JobCard CLI
//!
//! Inspect the transition tables, compute progress and material coverage, and run an in-memory
//! job through both workflows to watch the events it produces.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobcard_flow::{
    progress_of, stage_of, CreateInstance, CrossWorkflowReactor, InMemoryStore, JobStatus,
    MaterialAvailability, MaterialCoverageAnalyzer, MaterialRequirement, Metadata,
    NotificationBroadcaster, PrepressStatus, Topic, TopicBroadcaster, TransitionRequest,
    TransitionTables, WorkflowConfig, WorkflowEngine, WorkflowKind, WorkflowStatus,
};

#[derive(Parser)]
#[command(name = "jobcard")]
#[command(about = "JobCard workflow CLI - tables, progress, material coverage and simulation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "JOBCARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the transition table of a workflow kind
    Table {
        /// JOB_LIFECYCLE or PREPRESS
        #[arg(long)]
        kind: WorkflowKind,
    },

    /// Print progress and stage of a status
    Progress {
        #[arg(long)]
        kind: WorkflowKind,

        #[arg(long)]
        status: String,
    },

    /// Compute material coverage from two JSON files
    Analyze {
        /// JSON array of {materialId, requiredQuantity, priority?}
        #[arg(long)]
        requirements: PathBuf,

        /// JSON array of {materialId, availableStock}
        #[arg(long)]
        availability: PathBuf,

        /// Override materials.coverage_threshold
        #[arg(long)]
        threshold: Option<u8>,
    },

    /// Run one job through both workflows in memory, printing every event
    Simulate {
        /// Override auto_progression.delay_ms
        #[arg(long, default_value_t = 200)]
        delay_ms: u64,

        #[arg(long, default_value = "JC-DEMO")]
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded before the log filter is built so RUST_LOG can come from .env
    let dotenv_result = dotenv();

    let cli = Cli::parse();

    // Logs go to stderr so command output stays machine-readable
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // .env is optional; anything other than a missing file is worth a warning
    match dotenv_result {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(dotenv::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("No .env file found")
        }
        Err(err) => warn!(error = %err, "Could not load .env file"),
    }

    let config = WorkflowConfig::load(cli.config.as_deref()).context("loading configuration")?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Table { kind } => print_table(kind)?,

        Commands::Progress { kind, status } => {
            let status = WorkflowStatus::parse(kind, &status)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "workflowKind": kind,
                    "status": status,
                    "stage": stage_of(status),
                    "progress": progress_of(status),
                }))?
            );
        }

        Commands::Analyze {
            requirements,
            availability,
            threshold,
        } => {
            let requirements: Vec<MaterialRequirement> = read_json(&requirements)?;
            let availability: Vec<MaterialAvailability> = read_json(&availability)?;
            let analyzer = MaterialCoverageAnalyzer::new(
                threshold.unwrap_or(config.materials.coverage_threshold),
            );

            let result = analyzer.analyze(&requirements, &availability)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Simulate { delay_ms, job_id } => {
            let config = config.with_auto_progression_delay(Duration::from_millis(delay_ms));
            simulate(&config, &job_id).await?;
        }
    }

    Ok(())
}

fn print_table(kind: WorkflowKind) -> Result<()> {
    let tables = TransitionTables::standard()?;
    let table = tables.for_kind(kind);

    println!("{} (initial: {})", kind, table.initial());
    println!(
        "{:<24} {:<16} {:>8}  {:<8} {}",
        "STATUS", "STAGE", "PROGRESS", "FOLLOWS", "TARGETS"
    );

    for status in kind.statuses() {
        let targets: Vec<&str> = table
            .allowed_targets(status)
            .iter()
            .map(|target| target.as_str())
            .collect();
        let targets = if table.is_terminal(status) {
            "(terminal)".to_string()
        } else {
            targets.join(", ")
        };
        let follow_up = table
            .auto_follow_up(status)
            .map_or("-".to_string(), |target| format!("-> {}", target));

        println!(
            "{:<24} {:<16} {:>7}%  {:<8} {}",
            status.as_str(),
            table.stage_of(status),
            table.progress_of(status),
            follow_up,
            targets
        );
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn simulate(config: &WorkflowConfig, job_id: &str) -> Result<()> {
    let broadcaster = Arc::new(TopicBroadcaster::new());
    let engine = WorkflowEngine::new(Arc::new(InMemoryStore::new()), broadcaster.clone(), config)?;
    let reactor = CrossWorkflowReactor::start_if_enabled(&engine, &config.reactions)?;

    let (subscription, mut events) = broadcaster.subscribe_channel(Topic::Global);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => eprintln!("unprintable event: {}", err),
            }
        }
    });

    info!(job_id, delay_ms = config.auto_progression.delay_ms, "Simulation starting");

    let job = engine
        .create_instance(WorkflowKind::JobLifecycle, CreateInstance::new(job_id, "sales-1"))
        .await?;
    let prepress = engine
        .create_instance(WorkflowKind::Prepress, CreateInstance::new(job_id, "hod-1"))
        .await?;

    step(&engine, job.id, JobStatus::AssignedToPrepress, "sales-1").await?;

    let mut assignment = Metadata::new();
    assignment.insert("assignedTo".to_string(), json!("designer-1"));
    engine
        .transition(
            prepress.id,
            TransitionRequest::new(PrepressStatus::Assigned, "hod-1").with_metadata(assignment),
        )
        .await?;

    step(&engine, prepress.id, PrepressStatus::Designing, "designer-1").await?;
    step(&engine, prepress.id, PrepressStatus::DesigningCompleted, "designer-1").await?;
    follow_up(&engine, prepress.id, PrepressStatus::DieMaking).await?;
    step(&engine, prepress.id, PrepressStatus::DieMakingCompleted, "designer-1").await?;
    follow_up(&engine, prepress.id, PrepressStatus::PlateMaking).await?;
    step(&engine, prepress.id, PrepressStatus::PlateMakingCompleted, "designer-1").await?;
    follow_up(&engine, prepress.id, PrepressStatus::PrepressCompleted).await?;
    step(&engine, prepress.id, PrepressStatus::Completed, "hod-1").await?;

    if reactor.is_some() {
        wait_for(&engine, job.id, JobStatus::PrepressCompleted.into()).await?;
    } else {
        step(&engine, job.id, JobStatus::PrepressInProgress, "hod-1").await?;
        step(&engine, job.id, JobStatus::PrepressCompleted, "hod-1").await?;
    }

    for status in [
        JobStatus::HodReview,
        JobStatus::ReadyForProduction,
        JobStatus::InProduction,
        JobStatus::Completed,
    ] {
        step(&engine, job.id, status, "pm-1").await?;
    }

    let finished = engine.get_instance(job.id).await?;
    info!(
        job_id,
        status = %finished.status,
        progress = engine.progress_of(finished.status),
        "Simulation finished"
    );

    if let Some(reactor) = reactor {
        reactor.shutdown().await;
    }
    engine.shutdown();
    // dropping the subscription closes the channel; the printer drains what's left
    broadcaster.unsubscribe(&subscription);
    if let Err(err) = printer.await {
        eprintln!("event printer failed: {}", err);
    }

    Ok(())
}

async fn step<S: Into<WorkflowStatus>>(
    engine: &WorkflowEngine,
    id: Uuid,
    to: S,
    actor: &str,
) -> Result<()> {
    engine.transition(id, TransitionRequest::new(to, actor)).await?;
    Ok(())
}

/// Let the scheduler make an automatic move, or make it by hand when auto-progression is off
async fn follow_up<S: Into<WorkflowStatus>>(engine: &WorkflowEngine, id: Uuid, to: S) -> Result<()> {
    let to = to.into();
    if engine.scheduler().is_enabled() {
        wait_for(engine, id, to).await
    } else {
        step(engine, id, to, "designer-1").await
    }
}

/// Wait for an automatic transition, giving up well after the configured delay
async fn wait_for(engine: &WorkflowEngine, id: Uuid, status: WorkflowStatus) -> Result<()> {
    let deadline = engine.scheduler().delay() * 10 + Duration::from_secs(2);
    let started = tokio::time::Instant::now();

    loop {
        if engine.get_instance(id).await?.status == status {
            return Ok(());
        }
        if started.elapsed() > deadline {
            bail!("instance {} did not reach {} within {:?}", id, status, deadline);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
