//! # CheckIn: scheduled HTTP check-in runner
//!
//! Usage:
//!   checkin serve                     # Run the scheduler until Ctrl-C
//!   checkin add --file task.json      # Add a task definition
//!   checkin update <ID> --file e.json # Edit fields of a task
//!   checkin run <TASK_ID>             # Run a task now
//!   checkin tasks                     # List tasks and next run times
//!   checkin logs --task <ID>          # Recent run logs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use checkin_core::config::CheckinConfig;
use checkin_core::traits::TaskStore;
use checkin_core::types::{Task, TaskStatus, TaskUpdate};
use checkin_scheduler::{CronSchedule, ExecutionEngine, JobScheduler, SqliteStore};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "checkin",
    version,
    about = "⏰ CheckIn: scheduled HTTP check-in runner"
)]
struct Cli {
    /// Config file (default: ~/.checkin/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Run one task now and print the result
    Run { task_id: String },
    /// List tasks with their next run time
    Tasks,
    /// Show recent run logs, newest first
    Logs {
        /// Only logs of this task
        #[arg(long)]
        task: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Add a task from a JSON file
    Add {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Change fields of a task from a JSON file
    Update {
        task_id: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a task and its logs
    Remove { task_id: String },
    /// Stop scheduling a task
    Pause { task_id: String },
    /// Schedule a paused task again
    Resume { task_id: String },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config_path = cli.config.clone().unwrap_or_else(CheckinConfig::default_path);
    if let Command::Init { force } = cli.command {
        return init_config(&config_path, force);
    }

    let config = load_config(cli.config.as_deref())?;
    let db_path = config.database.resolved_path();
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?,
    );
    tracing::debug!("📂 Database: {}", db_path.display());

    match cli.command {
        Command::Serve => serve(store, &config).await,
        Command::Run { task_id } => run_task(store, &config, &task_id).await,
        Command::Tasks => list_tasks(store, &config),
        Command::Logs { task, limit } => list_logs(store.as_ref(), task.as_deref(), limit),
        Command::Add { file } => add_task(store.as_ref(), &file),
        Command::Update { task_id, file } => update_task(store.as_ref(), &task_id, &file),
        Command::Remove { task_id } => {
            if !store.session()?.delete_task(&task_id)? {
                bail!("task {task_id} not found");
            }
            println!("🗑️  Removed task {task_id}");
            Ok(())
        }
        Command::Pause { task_id } => set_status(store.as_ref(), &task_id, TaskStatus::Paused),
        Command::Resume { task_id } => set_status(store.as_ref(), &task_id, TaskStatus::Active),
        Command::Init { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "checkin=debug,checkin_scheduler=debug,checkin_core=debug"
    } else {
        "checkin=info,checkin_scheduler=info,checkin_core=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<CheckinConfig> {
    match path {
        Some(path) => {
            let mut config = CheckinConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(CheckinConfig::load()?),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    CheckinConfig::default().save_to(path)?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}

async fn serve(store: Arc<dyn TaskStore>, config: &CheckinConfig) -> Result<()> {
    let engine = Arc::new(ExecutionEngine::from_config(store, config));
    let scheduler = JobScheduler::new(engine, &config.scheduler);

    scheduler.start();
    let jobs = scheduler.resync();
    tracing::info!("🚀 CheckIn running with {jobs} scheduled task(s), Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown();
    Ok(())
}

async fn run_task(store: Arc<dyn TaskStore>, config: &CheckinConfig, task_id: &str) -> Result<()> {
    if store.session()?.get_task(task_id)?.is_none() {
        bail!("task {task_id} not found");
    }
    let engine = ExecutionEngine::from_config(store, config);
    let Some(report) = engine.execute_task(task_id).await else {
        bail!("run of task {task_id} could not be recorded, see log output");
    };
    println!(
        "{} {} (log {})",
        if report.success { "✅" } else { "❌" },
        if report.success { "Success" } else { "Failed" },
        report.log_id
    );
    println!("{}", report.output);
    Ok(())
}

fn list_tasks(store: Arc<dyn TaskStore>, config: &CheckinConfig) -> Result<()> {
    let tasks = store.session()?.list_tasks()?;
    if tasks.is_empty() {
        println!("No tasks. Add one with `checkin add --file task.json`.");
        return Ok(());
    }

    // Not started: only used to compute next run times.
    let engine = Arc::new(ExecutionEngine::from_config(Arc::clone(&store), config));
    let scheduler = JobScheduler::new(engine, &config.scheduler);
    scheduler.resync();

    for task in &tasks {
        let next = scheduler
            .next_run_time(&task.id)
            .map_or_else(|| "-".to_string(), format_time);
        let last = match (&task.last_result, task.last_run) {
            (Some(result), Some(at)) => format!("{result} at {}", format_time(at)),
            _ => "never run".to_string(),
        };
        println!("{}  {} [{}] {}", task.id, task.name, task.mode, task.status);
        println!("    schedule: {}  next: {next}  last: {last}", task.schedule);
    }
    Ok(())
}

fn list_logs(store: &dyn TaskStore, task_id: Option<&str>, limit: usize) -> Result<()> {
    let logs = store.session()?.list_logs(task_id, limit)?;
    if logs.is_empty() {
        println!("No logs.");
    }
    for log in logs {
        println!(
            "{} {} {}  {}",
            format_time(log.timestamp),
            if log.status { "✅" } else { "❌" },
            log.task_id,
            log.output.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

fn add_task(store: &dyn TaskStore, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let task: Task = serde_json::from_str(&content)
        .with_context(|| format!("parsing task definition {}", file.display()))?;
    CronSchedule::parse(&task.schedule)
        .with_context(|| format!("invalid schedule '{}'", task.schedule))?;

    store.session()?.insert_task(&task)?;
    println!("✅ Added task '{}' ({})", task.name, task.id);
    Ok(())
}

fn update_task(store: &dyn TaskStore, task_id: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let update: TaskUpdate = serde_json::from_str(&content)
        .with_context(|| format!("parsing task update {}", file.display()))?;

    let mut session = store.session()?;
    let Some(mut task) = session.get_task(task_id)? else {
        bail!("task {task_id} not found");
    };
    task.apply_update(update);
    CronSchedule::parse(&task.schedule)
        .with_context(|| format!("invalid schedule '{}'", task.schedule))?;
    session.update_task(&task)?;
    println!("✅ Updated task '{}' ({})", task.name, task.id);
    Ok(())
}

fn set_status(store: &dyn TaskStore, task_id: &str, status: TaskStatus) -> Result<()> {
    let mut session = store.session()?;
    let Some(mut task) = session.get_task(task_id)? else {
        bail!("task {task_id} not found");
    };
    task.status = status;
    task.updated_at = Utc::now();
    session.update_task(&task)?;
    println!("✅ Task '{}' is now {status}", task.name);
    Ok(())
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
