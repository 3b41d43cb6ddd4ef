//! taskq CLI: queue server, worker, and operator commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taskq::api::{self, AppState, AuthConfig};
use taskq::config::secrets::presence;
use taskq::config::{ClientConfig, Config, WorkerConfig, split_list};
use taskq::control::{ControlApi, HttpClient};
use taskq::db::Db;
use taskq::engine::{AuditHook, EnqueueHook, Engine};
use taskq::model::{CancelMode, ListQuery, NewTask, OrderBy, Task, TaskId};
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use taskq::worker::{HandlerRegistry, Worker, WorkerOptions};

#[derive(Parser)]
#[command(name = "taskq", about = "Persistent priority task queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Control API server
    Serve {
        /// Listen address (overrides TASKQ_BIND)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a worker
    Worker {
        /// Worker name (overrides TASKQ_WORKER_NAME)
        #[arg(long)]
        name: Option<String>,
        /// Directory of handler TOML files (overrides TASKQ_HANDLERS_DIR)
        #[arg(long)]
        handlers: Option<PathBuf>,
    },
    /// Task operations against a running server
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Enqueue a task
    Enqueue {
        /// Task type, e.g. bags.extract.topics
        task_type: String,
        /// JSON configuration
        #[arg(long)]
        config: Option<String>,
        /// Priority (higher claims first)
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma separated labels a worker must advertise
        #[arg(long)]
        labels: Option<String>,
    },
    /// List tasks
    List {
        #[arg(long)]
        running: bool,
        #[arg(long)]
        finished: bool,
        #[arg(long)]
        queued: bool,
        /// e.g. priority:desc,identifier:asc
        #[arg(long)]
        ordering: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one task
    Show { id: i64 },
    /// Cancel a queued task or request cancellation of a running one
    Cancel {
        id: i64,
        /// queued, running or any
        #[arg(long, default_value = "any")]
        mode: String,
    },
    /// Move a task ahead of every other task
    Boost { id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => cmd_serve(bind).await,
        Command::Worker { name, handlers } => cmd_worker(name, handlers).await,
        Command::Task { action } => {
            let config = ClientConfig::from_env()?;
            let client = HttpClient::new(
                &config.server_url,
                config.api_token,
                config.request_timeout,
            )?;
            cmd_task(&client, action).await
        }
    }
}

async fn cmd_serve(bind: Option<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(
        TelemetryConfig::new("taskq-server")
            .endpoint(config.otel_endpoint.clone())
            .log_level(config.log_level.clone()),
    )?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let engine = Engine::new(Arc::new(db), vec![Arc::new(AuditHook) as Arc<dyn EnqueueHook>]);
    let state = AppState::new(
        engine,
        AuthConfig {
            write_token: config.api_token,
            read_token: config.read_token,
        },
    );
    let bind = bind.unwrap_or(config.bind);

    tracing::info!(
        %bind,
        read_token = presence(state.auth.read_token.as_ref()),
        "starting control api"
    );

    api::serve(&bind, state, async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
    })
    .await?;
    Ok(())
}

async fn cmd_worker(name: Option<String>, handlers: Option<PathBuf>) -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;

    let name = name.unwrap_or_else(|| config.worker_name.clone());
    let _guard = init_telemetry(
        TelemetryConfig::new("taskq-worker")
            .endpoint(config.otel_endpoint.clone())
            .instance(name.clone())
            .log_level(config.log_level.clone()),
    )?;

    let handlers_dir = handlers.unwrap_or(config.handlers_dir);
    let registry = HandlerRegistry::load_from_dir(&handlers_dir)?;
    if registry.is_empty() {
        anyhow::bail!("no handlers found in {}", handlers_dir.display());
    }

    let client = HttpClient::new(&config.server_url, config.api_token, config.request_timeout)?;

    let mut options = WorkerOptions::new(name);
    options.work_dir = config.work_dir;
    options.poll_interval = config.poll_interval;
    options.update_interval = config.update_interval;
    options.labels = config.labels;
    options.stop_file = Some(config.stop_file);

    let worker = Arc::new(Worker::new(Arc::new(client), Arc::new(registry), options));

    let w = Arc::clone(&worker);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown requested, finishing current task");
        w.shutdown();
    });

    worker.run().await?;
    Ok(())
}

async fn cmd_task(client: &dyn ControlApi, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Enqueue {
            task_type,
            config,
            priority,
            description,
            labels,
        } => {
            let configuration: serde_json::Value = match config {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };
            let new = NewTask::new(task_type)
                .configuration(configuration)
                .priority(priority)
                .description(description)
                .worker_labels(labels.as_deref().map(split_list).unwrap_or_default());

            match client.enqueue(new).await {
                Ok(task) => println!("Created: {} (state: {})", task.id, task.state),
                Err(taskq::error::Error::Duplicate { existing }) => {
                    println!("Duplicate: task {existing} is already queued or running");
                }
                Err(e) => return Err(e.into()),
            }
        }
        TaskAction::List {
            running,
            finished,
            queued,
            ordering,
            limit,
            offset,
        } => {
            let query = ListQuery {
                running,
                finished,
                queued,
                ordering: match ordering {
                    Some(text) => OrderBy::parse_list(&text)?,
                    None => Vec::new(),
                },
                limit: Some(limit),
                offset: Some(offset),
            };
            let tasks = client.list(&query).await?;
            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }

            println!(
                "{:<8}  {:<28}  {:<22}  {:<5}  {:<16}  CREATED",
                "ID", "TYPE", "STATE", "PRI", "WORKER"
            );
            println!("{}", "-".repeat(100));
            for task in &tasks {
                let worker = if task.assigned_to.is_empty() {
                    "-"
                } else {
                    task.assigned_to.as_str()
                };
                println!(
                    "{:<8}  {:<28}  {:<22}  {:<5}  {:<16}  {}",
                    task.id,
                    task.task_type,
                    task.state,
                    task.priority,
                    worker,
                    task.created.format("%Y-%m-%d %H:%M")
                );
            }
            println!("\n{} task(s)", tasks.len());
        }
        TaskAction::Show { id } => {
            let task = client.get(TaskId(id)).await?;
            print_task(&task)?;
        }
        TaskAction::Cancel { id, mode } => {
            let mode = match mode.as_str() {
                "queued" => CancelMode::Queued,
                "running" => CancelMode::Running,
                "any" => CancelMode::Any,
                other => anyhow::bail!("unknown cancel mode {other:?}, expected queued, running or any"),
            };
            let task = client.cancel(TaskId(id), mode).await?;
            println!("Task {}: {}", task.id, task.state);
        }
        TaskAction::Boost { id } => {
            let task = client.priority_boost(TaskId(id)).await?;
            println!("Task {}: priority {}", task.id, task.priority);
        }
    }
    Ok(())
}

fn print_task(task: &Task) -> anyhow::Result<()> {
    println!("ID:          {}", task.id);
    println!("Type:        {}", task.task_type);
    println!("Description: {}", task.description);
    println!("State:       {}", task.state);
    println!("Priority:    {}", task.priority);
    println!(
        "Assigned:    {}",
        if task.is_assigned() { task.assigned_to.as_str() } else { "-" }
    );
    println!("Labels:      {}", task.worker_labels.join(","));
    println!("Config Hash: {}", task.config_hash);
    println!(
        "Config:      {}",
        serde_json::to_string_pretty(&task.configuration)?
    );
    println!("Created:     {}", task.created);
    println!("Updated:     {}", task.last_updated);
    if task.state.is_terminal() {
        println!("---");
        println!("Outcome:     {}", if task.success { "success" } else { "failure" });
        println!("Result:      {}", serde_json::to_string_pretty(&task.result)?);
        if let Some(runtime) = task.runtime {
            println!("Runtime:     {runtime:.1}s");
        }
    }
    if !task.log.is_empty() {
        println!("--- log");
        print!("{}", task.log);
    }
    Ok(())
}
