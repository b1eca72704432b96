//! Core data models for the embedding task queue.
//!
//! These types represent the tasks, worker status, and queue diagnostics
//! that flow between producers, the worker loop, and administrative tooling.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// What the worker should do to the vector index for a task's article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOperation {
    Create,
    Update,
    Delete,
}

impl TaskOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Create => "create",
            TaskOperation::Update => "update",
            TaskOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(TaskOperation::Create),
            "update" => Ok(TaskOperation::Update),
            "delete" => Ok(TaskOperation::Delete),
            other => bail!(
                "Unknown task operation: '{}'. Must be create, update, or delete.",
                other
            ),
        }
    }
}

/// Dequeue precedence tier. High tasks are claimed before normal, normal
/// before low; ties within a tier break by age (oldest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => bail!(
                "Unknown task priority: '{}'. Must be high, normal, or low.",
                other
            ),
        }
    }
}

/// Task lifecycle state.
///
/// `pending → processing → completed`, or on failure back to `pending`
/// while attempts remain, else terminal `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => bail!(
                "Unknown task status: '{}'. Must be pending, processing, completed, or failed.",
                other
            ),
        }
    }
}

/// One unit of deferred embedding work, stored in `embedding_tasks`.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingTask {
    pub id: String,
    pub article_id: String,
    pub slug: String,
    pub operation: TaskOperation,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub created_at: i64,
    pub scheduled_at: i64,
    pub processed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
    /// Free-form JSON object (reason codes such as "superseded").
    pub metadata: Option<String>,
}

impl EmbeddingTask {
    /// Map a row selected with [`TASK_COLUMNS`] into a task.
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let operation: String = row.get("operation");
        let priority: String = row.get("priority");
        let status: String = row.get("status");

        Ok(EmbeddingTask {
            id: row.get("id"),
            article_id: row.get("article_id"),
            slug: row.get("slug"),
            operation: TaskOperation::parse(&operation)?,
            priority: TaskPriority::parse(&priority)?,
            status: TaskStatus::parse(&status)?,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            created_at: row.get("created_at"),
            scheduled_at: row.get("scheduled_at"),
            processed_at: row.get("processed_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
            metadata: row.get("metadata"),
        })
    }
}

/// Column list matching [`EmbeddingTask::from_row`].
pub const TASK_COLUMNS: &str =
    "id, article_id, slug, operation, priority, status, attempts, max_attempts, \
     created_at, scheduled_at, processed_at, completed_at, error_message, metadata";

/// Singleton row describing the worker's own lifecycle.
///
/// Exactly one row exists (id fixed to 1); the worker loop writes it,
/// everything else only reads.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub is_running: bool,
    pub last_heartbeat: Option<i64>,
    pub tasks_processed: i64,
    pub tasks_succeeded: i64,
    pub tasks_failed: i64,
    pub started_at: Option<i64>,
}

impl WorkerStatus {
    pub fn from_row(row: &SqliteRow) -> Self {
        WorkerStatus {
            is_running: row.get::<i64, _>("is_running") != 0,
            last_heartbeat: row.get("last_heartbeat"),
            tasks_processed: row.get("tasks_processed"),
            tasks_succeeded: row.get("tasks_succeeded"),
            tasks_failed: row.get("tasks_failed"),
            started_at: row.get("started_at"),
        }
    }
}

/// Task counts by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Extended statistics for operators and the `/stats` endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetailedQueueStats {
    pub by_status: QueueStats,
    /// (priority, count) pairs, high first.
    pub by_priority: Vec<(String, i64)>,
    /// (operation, count) pairs.
    pub by_operation: Vec<(String, i64)>,
    pub completed_last_24h: i64,
    pub failed_last_24h: i64,
    /// Mean claim-to-completion duration over the last 24h, in milliseconds.
    pub avg_processing_ms: Option<f64>,
}

/// Derived health signal. A degraded-but-live queue is reported through
/// `issues`, never as an error.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub is_healthy: bool,
    pub issues: Vec<String>,
}

/// A minimal article record, as seen by the queue subsystem.
///
/// The wider article manager owns the `articles` table; the worker only
/// reads content from it when generating embeddings.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: String,
    pub slug: String,
    pub title: Option<String>,
    pub body: String,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
