//! # Embedding Queue CLI (`embedq`)
//!
//! The `embedq` binary is the administrative interface for the embedding
//! task queue. It provides commands for database initialization, task
//! enqueueing, running the background worker, queue inspection and repair,
//! and starting the HTTP health server.
//!
//! ## Usage
//!
//! ```bash
//! embedq --config ./config/embedq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `embedq init` | Create the SQLite database and run schema migrations |
//! | `embedq enqueue <article-id>` | Queue an embedding task for an article |
//! | `embedq worker` | Run the background worker until Ctrl-C |
//! | `embedq serve` | Start the HTTP health/stats server |
//! | `embedq queue stats` | Backlog, throughput, and worker counters |
//! | `embedq queue health` | Derived health signal (nonzero exit when degraded) |
//! | `embedq queue list` | List tasks by status in claim order |
//! | `embedq queue show <task-id>` | Inspect one task |
//! | `embedq queue article <article-id>` | All tasks for one article |
//! | `embedq queue retry <task-id>` | Reschedule one failed task |
//! | `embedq queue retry-failed` | Reschedule every failed task |
//! | `embedq queue cleanup` | Purge old completed tasks |
//! | `embedq queue reset-stuck` | Reset tasks stranded in processing |
//! | `embedq queue monitor` | Live-refreshing monitor view |
//! | `embedq audit list` | Query the audit log |
//! | `embedq audit stats` | Audit log aggregates |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use embed_queue::articles::SqliteArticles;
use embed_queue::worker::Worker;
use embed_queue::{audit_cmd, config, db, embedding, migrate, monitor, server, stats, tasks_cmd};

/// Embedding queue CLI — durable background embedding tasks for a
/// markdown article manager.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/embedq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "embedq",
    about = "Embedding task queue — durable background embedding work for a markdown article manager",
    version,
    long_about = "embedq manages a durable, prioritized queue of embedding tasks stored in SQLite. \
    Producers enqueue work on article create/update/delete; a single polling worker claims tasks \
    atomically, calls the embedding provider, and records success or failure with bounded retries, \
    stuck-task recovery, and an audit trail."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/embedq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (articles, embedding_tasks, embedding_worker_status,
    /// embedding_audit_logs, article_vectors). Idempotent.
    Init,

    /// Enqueue an embedding task for an article.
    ///
    /// Resolves the article's slug from the store and inserts a pending
    /// task. A `delete` operation supersedes any still-pending tasks for
    /// the same article before enqueueing.
    Enqueue {
        /// Article id to (re)embed or remove from the index.
        article_id: String,

        /// Operation: `create`, `update`, or `delete`.
        #[arg(long, default_value = "update")]
        operation: String,

        /// Priority tier: `high`, `normal`, or `low`.
        #[arg(long, default_value = "normal")]
        priority: String,
    },

    /// Run the background worker until Ctrl-C.
    ///
    /// Claims pending tasks in priority order, generates embeddings via
    /// the configured provider, and records outcomes. Also sweeps stuck
    /// tasks on a coarser cadence.
    Worker,

    /// Start the HTTP health/stats server.
    ///
    /// Binds to `[server].bind` and exposes `GET /health` and
    /// `GET /stats` for load balancers and monitoring.
    Serve,

    /// Inspect and repair the task queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Query the audit log.
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

/// Queue inspection and repair subcommands.
#[derive(Subcommand)]
enum QueueAction {
    /// Show queue statistics and worker counters.
    Stats,

    /// Show the derived health signal. Exits nonzero when degraded.
    Health,

    /// List tasks in a status, in the order the worker claims them.
    List {
        /// Status to list: `pending`, `processing`, `completed`, or `failed`.
        #[arg(long, default_value = "pending")]
        status: String,

        /// Maximum number of tasks to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of tasks to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Inspect one task in full.
    Show {
        /// Task id.
        task_id: String,
    },

    /// Show all tasks for one article, newest first.
    Article {
        /// Article id.
        article_id: String,
    },

    /// Reschedule one failed task with a fresh retry budget.
    Retry {
        /// Task id.
        task_id: String,
    },

    /// Reschedule every failed task.
    RetryFailed,

    /// Purge completed tasks older than the retention window.
    ///
    /// Failed tasks are never touched; operators keep those for
    /// diagnosis until retried or purged explicitly.
    Cleanup {
        /// Override the retention window from config (days).
        #[arg(long)]
        days: Option<u64>,
    },

    /// Reset tasks stranded in `processing` beyond the stuck timeout.
    ResetStuck,

    /// Live-refreshing monitor view. Press Ctrl-C to exit.
    Monitor {
        /// Refresh interval in seconds.
        #[arg(long, default_value_t = 3)]
        interval: u64,
    },
}

/// Audit log subcommands.
#[derive(Subcommand)]
enum AuditAction {
    /// List audit events, newest first.
    List {
        /// Filter by level: `info`, `warn`, or `error`.
        #[arg(long)]
        level: Option<String>,

        /// Filter by category: `task`, `worker`, or `queue`.
        #[arg(long)]
        category: Option<String>,

        /// Filter by task id.
        #[arg(long)]
        task: Option<String>,

        /// Filter by article id.
        #[arg(long)]
        article: Option<String>,

        /// Only events from the last N hours.
        #[arg(long)]
        since_hours: Option<i64>,

        /// Maximum number of events to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show audit log aggregates.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Enqueue {
            article_id,
            operation,
            priority,
        } => {
            tasks_cmd::run_enqueue(&cfg, &article_id, &operation, &priority).await?;
        }
        Commands::Worker => {
            let pool = db::connect(&cfg).await?;
            let queue = stats::queue_for(&cfg, &pool);
            let provider: Arc<dyn embed_queue::embedding::EmbeddingProvider> =
                Arc::from(embedding::create_provider(&cfg.embedding)?);
            let articles = Arc::new(SqliteArticles::new(pool.clone()));
            let worker = Worker::new(queue, provider, articles);
            worker.run_until_shutdown().await?;
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Queue { action } => match action {
            QueueAction::Stats => stats::run_stats(&cfg).await?,
            QueueAction::Health => stats::run_health(&cfg).await?,
            QueueAction::List {
                status,
                limit,
                offset,
            } => tasks_cmd::run_list(&cfg, &status, limit, offset).await?,
            QueueAction::Show { task_id } => tasks_cmd::run_show(&cfg, &task_id).await?,
            QueueAction::Article { article_id } => {
                tasks_cmd::run_article(&cfg, &article_id).await?
            }
            QueueAction::Retry { task_id } => tasks_cmd::run_retry(&cfg, &task_id).await?,
            QueueAction::RetryFailed => tasks_cmd::run_retry_failed(&cfg).await?,
            QueueAction::Cleanup { days } => tasks_cmd::run_cleanup(&cfg, days).await?,
            QueueAction::ResetStuck => tasks_cmd::run_reset_stuck(&cfg).await?,
            QueueAction::Monitor { interval } => monitor::run_monitor(&cfg, interval).await?,
        },
        Commands::Audit { action } => match action {
            AuditAction::List {
                level,
                category,
                task,
                article,
                since_hours,
                limit,
            } => {
                audit_cmd::run_audit_list(&cfg, level, category, task, article, since_hours, limit)
                    .await?
            }
            AuditAction::Stats => audit_cmd::run_audit_stats(&cfg).await?,
        },
    }

    Ok(())
}
