//! CLI command definitions for queuectl.
//!
//! Every invocation opens the store under the home directory, applies the
//! schema, runs one command and exits. The only long-running command is
//! `worker run`, which the supervisor launches in the background.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Settings, HOME_ENV};
use crate::error::ConfigError;
use crate::runner::CommandExecutor;
use crate::scheduler::{Job, JobQueue, JobState, NewJob, PollOutcome, QueueStats, Worker, WorkerConfig};
use crate::storage::{ConfigStore, Database};
use crate::supervisor::{
    CommandSpawner, SignalTerminator, StopReport, Supervisor, WorkerRegistry, MAX_WORKERS,
};

/// Persistent background job queue for shell commands.
#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Persistent background job queue with retries and a dead letter queue")]
#[command(version)]
#[command(
    long_about = "queuectl stores shell commands in a local SQLite queue and runs them in background worker processes.\n\nFailed jobs are retried with exponential backoff and moved to a dead letter queue once their retries are exhausted.\n\nExample usage:\n  queuectl enqueue 'echo hello' --max-retries 5\n  queuectl worker start --count 2\n  queuectl status"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Directory holding the database, job logs and worker registry (default: ~/.queuectl).
    #[arg(long, env = HOME_ENV, global = true)]
    pub home: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Add a shell command to the queue.
    #[command(alias = "add")]
    Enqueue(EnqueueArgs),

    /// Start, stop or run workers.
    Worker(WorkerArgs),

    /// Show job counts per state and the registered workers.
    Status(StatusArgs),

    /// List jobs, optionally filtered by state.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Inspect and retry jobs in the dead letter queue.
    Dlq(DlqArgs),

    /// Read and write persistent settings.
    Config(ConfigArgs),
}

/// Arguments for `queuectl enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Shell command line to run.
    pub command: String,

    /// Failed attempts allowed before the job moves to the DLQ (default: the `max-retries` setting).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: Option<u32>,

    /// Output the created job as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `queuectl worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerSubcommand,
}

/// Worker subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum WorkerSubcommand {
    /// Spawn background workers.
    Start(WorkerStartArgs),

    /// Stop the background workers started by `worker start`.
    Stop,

    /// Run a worker in the foreground.
    Run(WorkerRunArgs),
}

/// Arguments for `queuectl worker start`.
#[derive(Parser, Debug)]
pub struct WorkerStartArgs {
    /// Number of worker processes.
    #[arg(
        short = 'n',
        long,
        default_value = "1",
        value_parser = clap::value_parser!(u16).range(1..=MAX_WORKERS as i64)
    )]
    pub count: u16,
}

/// Arguments for `queuectl worker run`.
#[derive(Parser, Debug)]
pub struct WorkerRunArgs {
    /// Sleep between polls when the queue is empty, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Process at most one job and exit.
    #[arg(long)]
    pub once: bool,
}

/// Arguments for `queuectl status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `queuectl list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only show jobs in this state (pending, processing, completed, failed, dead).
    #[arg(short = 's', long, value_parser = parse_state)]
    pub state: Option<JobState>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `queuectl dlq`.
#[derive(Parser, Debug)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqSubcommand,
}

/// DLQ subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum DlqSubcommand {
    /// List dead jobs.
    List {
        /// Output JSON.
        #[arg(short = 'j', long)]
        json: bool,
    },

    /// Move a dead job back to pending with its attempts reset.
    Retry {
        /// ID of the dead job.
        job_id: Uuid,
    },
}

/// Arguments for `queuectl config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

/// Config subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Set a value (max-retries, backoff-base).
    Set { key: String, value: String },

    /// Print the effective value of a key.
    Get { key: String },

    /// Print every key with its effective value.
    List,
}

fn parse_state(raw: &str) -> Result<JobState, String> {
    raw.parse()
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::resolve(cli.home);

    match cli.command {
        Commands::Enqueue(args) => run_enqueue_command(&settings, args).await,
        Commands::Worker(args) => match args.command {
            WorkerSubcommand::Start(args) => {
                run_worker_start_command(&settings, &cli.log_level, args).await
            }
            WorkerSubcommand::Stop => run_worker_stop_command(&settings, &cli.log_level),
            WorkerSubcommand::Run(args) => {
                let settings =
                    settings.with_poll_interval(Duration::from_millis(args.poll_interval_ms));
                run_worker_run_command(&settings, args.once).await
            }
        },
        Commands::Status(args) => run_status_command(&settings, args).await,
        Commands::List(args) => run_list_command(&settings, args).await,
        Commands::Dlq(args) => run_dlq_command(&settings, args).await,
        Commands::Config(args) => run_config_command(&settings, args).await,
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

async fn open_database(settings: &Settings) -> anyhow::Result<Database> {
    let path = settings.db_path();
    Database::connect(&path)
        .await
        .with_context(|| format!("Failed to open job store at {}", path.display()))
}

fn supervisor(settings: &Settings, log_level: &str) -> anyhow::Result<Supervisor> {
    let spawner = CommandSpawner::current_exe(settings, log_level)
        .context("Failed to locate the queuectl executable")?;
    Ok(Supervisor::new(
        WorkerRegistry::new(settings.registry_path()),
        spawner,
        SignalTerminator,
    ))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json_output = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json_output);
    Ok(())
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:>8}  {:<25}  COMMAND",
        "ID", "STATE", "ATTEMPTS", "UPDATED"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:>8}  {:<25}  {}",
            job.id,
            job.state,
            format!("{}/{}", job.attempts, job.max_retries),
            job.updated_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            job.command
        );
    }
}

// ============================================================================
// Job commands
// ============================================================================

async fn run_enqueue_command(settings: &Settings, args: EnqueueArgs) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let config = ConfigStore::new(db.pool().clone());

    let max_retries = match args.max_retries {
        Some(n) => n,
        None => config.max_retries().await?,
    };

    let job = JobQueue::new(db)
        .enqueue(NewJob::new(args.command, max_retries))
        .await?;

    if args.json {
        return print_json(&job);
    }
    println!("Enqueued job {}", job.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    jobs: QueueStats,
    total: usize,
    workers: Vec<u32>,
}

async fn run_status_command(settings: &Settings, args: StatusArgs) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let stats = JobQueue::new(db).stats().await?;
    let workers = WorkerRegistry::new(settings.registry_path())
        .read()?
        .unwrap_or_default();

    let output = StatusOutput {
        total: stats.total_jobs(),
        jobs: stats,
        workers,
    };

    if args.json {
        return print_json(&output);
    }

    println!("Jobs:");
    for state in JobState::ALL {
        println!("  {:<11} {}", state, output.jobs.count(state));
    }
    println!("  {:<11} {}", "total", output.total);

    if output.workers.is_empty() {
        println!("Workers: none running");
    } else {
        let pids: Vec<String> = output.workers.iter().map(u32::to_string).collect();
        println!("Workers: {} ({})", output.workers.len(), pids.join(", "));
    }
    Ok(())
}

async fn run_list_command(settings: &Settings, args: ListArgs) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let jobs = JobQueue::new(db).list(args.state).await?;

    if args.json {
        return print_json(&jobs);
    }
    print_jobs(&jobs);
    Ok(())
}

async fn run_dlq_command(settings: &Settings, args: DlqArgs) -> anyhow::Result<()> {
    let queue = JobQueue::new(open_database(settings).await?);

    match args.command {
        DlqSubcommand::List { json } => {
            let jobs = queue.dead_letters().await?;
            if json {
                return print_json(&jobs);
            }
            print_jobs(&jobs);
        }
        DlqSubcommand::Retry { job_id } => {
            let job = queue
                .retry_dead(job_id)
                .await
                .with_context(|| format!("Cannot retry job {}", job_id))?;
            info!(job_id = %job.id, "Job moved from DLQ back to pending");
            println!("Job {} re-queued", job.id);
        }
    }
    Ok(())
}

async fn run_config_command(settings: &Settings, args: ConfigArgs) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let config = ConfigStore::new(db.pool().clone());

    match args.command {
        ConfigSubcommand::Set { key, value } => {
            config.set(&key, &value).await?;
            println!("{} = {}", key, value);
        }
        ConfigSubcommand::Get { key } => {
            let effective = config.list().await?;
            match effective.into_iter().find(|(k, _)| *k == key) {
                Some((_, value)) => println!("{}", value),
                None => return Err(ConfigError::UnknownKey(key).into()),
            }
        }
        ConfigSubcommand::List => {
            for (key, value) in config.list().await? {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Worker commands
// ============================================================================

async fn run_worker_start_command(
    settings: &Settings,
    log_level: &str,
    args: WorkerStartArgs,
) -> anyhow::Result<()> {
    // Apply the schema once here rather than racing it from every new worker.
    open_database(settings).await?.close().await;

    let pids = supervisor(settings, log_level)?.start(usize::from(args.count))?;
    println!(
        "Started {} worker(s): {}",
        pids.len(),
        pids.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
    );
    println!("Worker output: {}", settings.worker_log_path().display());
    Ok(())
}

fn run_worker_stop_command(settings: &Settings, log_level: &str) -> anyhow::Result<()> {
    match supervisor(settings, log_level)?.stop()? {
        StopReport::NothingRunning => println!("No workers running."),
        StopReport::Stopped { requested, stopped } => {
            println!("Stopped {} of {} worker(s).", stopped, requested)
        }
    }
    Ok(())
}

async fn run_worker_run_command(settings: &Settings, once: bool) -> anyhow::Result<()> {
    let db = open_database(settings).await?;
    let worker = Worker::new(
        format!("worker-{}", std::process::id()),
        JobQueue::new(db.clone()),
        ConfigStore::new(db.pool().clone()),
        CommandExecutor::new(settings.log_dir()),
        WorkerConfig::default().with_poll_interval(settings.poll_interval()),
    );

    if once {
        let outcome = worker.poll_once().await;
        db.close().await;
        return match outcome {
            PollOutcome::Idle => {
                println!("No pending jobs.");
                Ok(())
            }
            PollOutcome::ClaimFailed => Err(anyhow::anyhow!("Failed to claim a job")),
            PollOutcome::Completed(id) => {
                println!("Job {} completed", id);
                Ok(())
            }
            PollOutcome::Retried { job_id, attempts } => {
                println!("Job {} failed (attempt {}), re-queued", job_id, attempts);
                Ok(())
            }
            PollOutcome::Buried { job_id, attempts } => {
                println!("Job {} failed (attempt {}), moved to DLQ", job_id, attempts);
                Ok(())
            }
            PollOutcome::TransitionFailed(id) => {
                Err(anyhow::anyhow!("Job {} ran but its result was not recorded", id))
            }
        };
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    worker.run(shutdown_rx).await;
    db.close().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
