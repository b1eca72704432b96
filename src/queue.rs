//! Queue service: enqueue, claim, completion, recovery, and diagnostics
//! over the `embedding_tasks` table.
//!
//! Every state-changing operation is a single SQL statement, so producers,
//! the worker, and administrative readers can share the store without any
//! in-process locks. [`TaskQueue::claim_next_task`] is the one operation
//! that needs true mutual exclusion between would-be concurrent workers;
//! it is expressed as a conditional `UPDATE ... RETURNING` rather than a
//! read-then-write, so two racing callers can never claim the same row.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditLogger};
use crate::config::{HealthConfig, QueueConfig};
use crate::models::{
    now_ms, DetailedQueueStats, EmbeddingTask, QueueHealth, QueueStats, TaskOperation,
    TaskPriority, TaskStatus, WorkerStatus, TASK_COLUMNS,
};

/// SQL fragment ranking priorities for ORDER BY (high first).
const PRIORITY_RANK: &str = "CASE priority WHEN 'high' THEN 0 WHEN 'normal' THEN 1 ELSE 2 END";

#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
    queue_cfg: QueueConfig,
    health_cfg: HealthConfig,
    audit: AuditLogger,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool, queue_cfg: QueueConfig, health_cfg: HealthConfig) -> Self {
        let audit = AuditLogger::new(pool.clone());
        Self {
            pool,
            queue_cfg,
            health_cfg,
            audit,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn config(&self) -> &QueueConfig {
        &self.queue_cfg
    }

    /// Enqueue a new task. Fire-and-forget from the producer's point of
    /// view: this succeeds unless the store itself is unavailable.
    ///
    /// No deduplication is applied; callers that want to supersede earlier
    /// work should call [`TaskQueue::cancel_pending_for_article`] first.
    pub async fn enqueue_task(
        &self,
        article_id: &str,
        slug: &str,
        operation: TaskOperation,
        priority: TaskPriority,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let metadata = metadata.map(|m| m.to_string());

        sqlx::query(
            r#"
            INSERT INTO embedding_tasks
                (id, article_id, slug, operation, priority, status, attempts,
                 max_attempts, created_at, scheduled_at, metadata)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(article_id)
        .bind(slug)
        .bind(operation.as_str())
        .bind(priority.as_str())
        .bind(self.queue_cfg.max_attempts)
        .bind(now)
        .bind(now)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<Option<EmbeddingTask>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM embedding_tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(EmbeddingTask::from_row).transpose()
    }

    /// List tasks in a status, high priority first, oldest first within a
    /// tier — the same order the worker claims in.
    pub async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmbeddingTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM embedding_tasks WHERE status = ? \
             ORDER BY {}, scheduled_at ASC LIMIT ? OFFSET ?",
            TASK_COLUMNS, PRIORITY_RANK
        ))
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(EmbeddingTask::from_row).collect()
    }

    /// All tasks for one article, newest first. For debugging and
    /// duplicate detection.
    pub async fn get_tasks_for_article(&self, article_id: &str) -> Result<Vec<EmbeddingTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM embedding_tasks WHERE article_id = ? ORDER BY created_at DESC",
            TASK_COLUMNS
        ))
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(EmbeddingTask::from_row).collect()
    }

    /// Atomically claim the next eligible task: select the highest-priority,
    /// oldest pending task whose `scheduled_at` has passed and flip it to
    /// `processing` in one statement.
    ///
    /// The outer `AND status = 'pending'` re-checks the predicate at update
    /// time, so a row selected by the subquery that a concurrent caller
    /// already claimed updates zero rows instead of being claimed twice.
    pub async fn claim_next_task(&self) -> Result<Option<EmbeddingTask>> {
        let now = now_ms();

        let row = sqlx::query(&format!(
            r#"
            UPDATE embedding_tasks
            SET status = 'processing', processed_at = ?
            WHERE id = (
                SELECT id FROM embedding_tasks
                WHERE status = 'pending' AND scheduled_at <= ?
                ORDER BY {}, scheduled_at ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            PRIORITY_RANK, TASK_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(EmbeddingTask::from_row).transpose()
    }

    /// Mark a claimed task completed and clear any stale error message.
    pub async fn record_success(&self, task_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE embedding_tasks \
             SET status = 'completed', completed_at = ?, error_message = NULL \
             WHERE id = ?",
        )
        .bind(now_ms())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Task not found: {}", task_id);
        }
        Ok(())
    }

    /// Record a processing failure. Increments `attempts`; while attempts
    /// remain the task goes back to `pending` for another claim, otherwise
    /// it reaches terminal `failed` with `completed_at` set.
    ///
    /// Retries are immediate by default. With `queue.retry_backoff` the
    /// reschedule is deferred by `base * 2^attempts` (attempts before this
    /// failure), capped at 2^10.
    ///
    /// Returns the resulting status so the caller can distinguish
    /// retry-scheduled from exhausted.
    pub async fn record_failure(&self, task_id: &str, error: &str) -> Result<TaskStatus> {
        let now = now_ms();
        let backoff_base_ms: i64 = if self.queue_cfg.retry_backoff {
            (self.queue_cfg.retry_backoff_base_secs * 1000) as i64
        } else {
            0
        };

        let row = sqlx::query(
            r#"
            UPDATE embedding_tasks SET
                attempts = attempts + 1,
                status = CASE WHEN attempts + 1 < max_attempts
                              THEN 'pending' ELSE 'failed' END,
                scheduled_at = CASE WHEN attempts + 1 < max_attempts
                               THEN ?1 + (?2 << MIN(attempts, 10)) ELSE scheduled_at END,
                processed_at = CASE WHEN attempts + 1 < max_attempts
                               THEN NULL ELSE processed_at END,
                completed_at = CASE WHEN attempts + 1 < max_attempts
                               THEN NULL ELSE ?1 END,
                error_message = ?3
            WHERE id = ?4
            RETURNING status
            "#,
        )
        .bind(now)
        .bind(backoff_base_ms)
        .bind(error)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = sqlx::Row::get(&row, "status");
                TaskStatus::parse(&status)
            }
            None => bail!("Task not found: {}", task_id),
        }
    }

    /// Reset tasks stranded in `processing` longer than `timeout` back to
    /// `pending`. Recovers from a worker that crashed or hung mid-task;
    /// the timeout should exceed realistic provider latency with margin so
    /// a slow-but-alive worker is not preempted.
    ///
    /// Idempotent: a reset task has `processed_at = NULL` and no longer
    /// matches the predicate, so a second sweep is a no-op.
    pub async fn reset_stuck_tasks(&self, timeout: Duration) -> Result<u64> {
        let cutoff = now_ms() - timeout.as_millis() as i64;
        let message = format!(
            "Reset after stuck in processing for over {}s",
            timeout.as_secs()
        );

        let rows = sqlx::query(
            "UPDATE embedding_tasks \
             SET status = 'pending', processed_at = NULL, error_message = ? \
             WHERE status = 'processing' AND processed_at IS NOT NULL AND processed_at < ? \
             RETURNING id, article_id, operation",
        )
        .bind(&message)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let id: String = sqlx::Row::get(row, "id");
            let article_id: String = sqlx::Row::get(row, "article_id");
            let operation: String = sqlx::Row::get(row, "operation");
            self.audit
                .log(
                    AuditEvent::warn("task", "Stuck task reset to pending")
                        .task(&id)
                        .article(&article_id)
                        .operation(&operation),
                )
                .await;
        }

        Ok(rows.len() as u64)
    }

    /// Purge completed tasks finished before `cutoff` (ms). Failed tasks
    /// are kept for diagnosis until an operator purges them explicitly.
    pub async fn clear_completed_tasks(&self, cutoff: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM embedding_tasks \
             WHERE status = 'completed' AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cancel pending tasks for an article, marking them failed with a
    /// metadata reason. Producers call this before enqueueing a superseding
    /// task (article deleted, indexing opted out).
    pub async fn cancel_pending_for_article(
        &self,
        article_id: &str,
        reason: &str,
    ) -> Result<u64> {
        let metadata = serde_json::json!({ "reason": reason }).to_string();
        let message = format!("Cancelled: {}", reason);

        let result = sqlx::query(
            "UPDATE embedding_tasks \
             SET status = 'failed', completed_at = ?, error_message = ?, metadata = ? \
             WHERE article_id = ? AND status = 'pending'",
        )
        .bind(now_ms())
        .bind(&message)
        .bind(&metadata)
        .bind(article_id)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            self.audit
                .log(
                    AuditEvent::info(
                        "queue",
                        format!("Cancelled {} pending task(s): {}", count, reason),
                    )
                    .article(article_id),
                )
                .await;
        }
        Ok(count)
    }

    /// Manually retry a failed task: back to `pending` with a fresh retry
    /// budget and the metadata reason replaced by `manual_retry`, so the
    /// task's history shows the operator intervention rather than a stale
    /// cancellation reason. Errors if the task does not exist or is not
    /// failed.
    pub async fn retry_task(&self, task_id: &str) -> Result<()> {
        let metadata = serde_json::json!({ "reason": "manual_retry" }).to_string();
        let result = sqlx::query(
            "UPDATE embedding_tasks \
             SET status = 'pending', attempts = 0, scheduled_at = ?, \
                 processed_at = NULL, completed_at = NULL, error_message = NULL, \
                 metadata = ? \
             WHERE id = ? AND status = 'failed'",
        )
        .bind(now_ms())
        .bind(&metadata)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.get_task_status(task_id).await? {
                Some(task) => bail!(
                    "Task {} is {}, not failed; only failed tasks can be retried",
                    task_id,
                    task.status.as_str()
                ),
                None => bail!("Task not found: {}", task_id),
            }
        }

        self.audit
            .log(AuditEvent::info("queue", "Manual retry requested").task(task_id))
            .await;
        Ok(())
    }

    /// Retry every genuinely failed task. Returns the number rescheduled.
    ///
    /// Tasks that reached `failed` without ever being attempted were
    /// cancelled (superseded or opted out), not failed; the blanket retry
    /// leaves those alone. [`TaskQueue::retry_task`] can still resurrect
    /// one deliberately.
    pub async fn retry_failed_tasks(&self) -> Result<u64> {
        let metadata = serde_json::json!({ "reason": "manual_retry" }).to_string();
        let result = sqlx::query(
            "UPDATE embedding_tasks \
             SET status = 'pending', attempts = 0, scheduled_at = ?, \
                 processed_at = NULL, completed_at = NULL, error_message = NULL, \
                 metadata = ? \
             WHERE status = 'failed' AND attempts > 0",
        )
        .bind(now_ms())
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            self.audit
                .log(AuditEvent::info(
                    "queue",
                    format!("Manual retry of {} failed task(s)", count),
                ))
                .await;
        }
        Ok(count)
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM embedding_tasks GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status: String = sqlx::Row::get(row, "status");
            let count: i64 = sqlx::Row::get(row, "count");
            match status.as_str() {
                "pending" => stats.pending = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }

    pub async fn get_detailed_queue_stats(&self) -> Result<DetailedQueueStats> {
        let by_status = self.get_queue_stats().await?;

        let priority_rows = sqlx::query(&format!(
            "SELECT priority, COUNT(*) AS count FROM embedding_tasks \
             GROUP BY priority ORDER BY {}",
            PRIORITY_RANK
        ))
        .fetch_all(&self.pool)
        .await?;
        let by_priority = priority_rows
            .iter()
            .map(|r| {
                (
                    sqlx::Row::get::<String, _>(r, "priority"),
                    sqlx::Row::get::<i64, _>(r, "count"),
                )
            })
            .collect();

        let operation_rows = sqlx::query(
            "SELECT operation, COUNT(*) AS count FROM embedding_tasks \
             GROUP BY operation ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_operation = operation_rows
            .iter()
            .map(|r| {
                (
                    sqlx::Row::get::<String, _>(r, "operation"),
                    sqlx::Row::get::<i64, _>(r, "count"),
                )
            })
            .collect();

        let day_ago = now_ms() - 24 * 3600 * 1000;

        let completed_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_tasks \
             WHERE status = 'completed' AND completed_at >= ?",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;

        let failed_last_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_tasks \
             WHERE status = 'failed' AND completed_at >= ?",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;

        let avg_processing_ms: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(completed_at - processed_at) FROM embedding_tasks \
             WHERE status = 'completed' AND completed_at >= ? AND processed_at IS NOT NULL",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;

        Ok(DetailedQueueStats {
            by_status,
            by_priority,
            by_operation,
            completed_last_24h,
            failed_last_24h,
            avg_processing_ms,
        })
    }

    /// Derive the queue health signal from backlog depth, backlog age,
    /// stuck tasks, and the 24h failure rate. Never fails for a
    /// degraded-but-live queue; the issues list is the diagnostic.
    pub async fn get_queue_health(&self) -> Result<QueueHealth> {
        let now = now_ms();
        let mut issues = Vec::new();

        let pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embedding_tasks WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        if pending > self.health_cfg.max_pending {
            issues.push(format!(
                "Pending backlog is {} tasks (threshold {})",
                pending, self.health_cfg.max_pending
            ));
        }

        let oldest_eligible: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(scheduled_at) FROM embedding_tasks \
             WHERE status = 'pending' AND scheduled_at <= ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        if let Some(oldest) = oldest_eligible {
            let age_secs = (now - oldest) / 1000;
            if age_secs > self.health_cfg.max_pending_age_secs {
                issues.push(format!(
                    "Oldest pending task has waited {}s (threshold {}s)",
                    age_secs, self.health_cfg.max_pending_age_secs
                ));
            }
        }

        let stuck_cutoff = now - (self.queue_cfg.stuck_timeout_secs * 1000) as i64;
        let stuck: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_tasks \
             WHERE status = 'processing' AND processed_at IS NOT NULL AND processed_at < ?",
        )
        .bind(stuck_cutoff)
        .fetch_one(&self.pool)
        .await?;
        if stuck > 0 {
            issues.push(format!(
                "{} task(s) stuck in processing beyond {}s",
                stuck, self.queue_cfg.stuck_timeout_secs
            ));
        }

        let day_ago = now - 24 * 3600 * 1000;
        let completed_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_tasks \
             WHERE status = 'completed' AND completed_at >= ?",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;
        let failed_24h: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_tasks \
             WHERE status = 'failed' AND completed_at >= ?",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;
        let finished = completed_24h + failed_24h;
        if finished > 0 {
            let rate = failed_24h as f64 / finished as f64;
            if rate > self.health_cfg.max_failure_rate {
                issues.push(format!(
                    "24h failure rate is {:.0}% ({} of {} tasks; threshold {:.0}%)",
                    rate * 100.0,
                    failed_24h,
                    finished,
                    self.health_cfg.max_failure_rate * 100.0
                ));
            }
        }

        Ok(QueueHealth {
            is_healthy: issues.is_empty(),
            issues,
        })
    }

    /// Read the worker status singleton. Only the worker loop writes it.
    pub async fn get_worker_status(&self) -> Result<WorkerStatus> {
        let row = sqlx::query(
            "SELECT is_running, last_heartbeat, tasks_processed, tasks_succeeded, \
             tasks_failed, started_at FROM embedding_worker_status WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(WorkerStatus::from_row(&row))
    }
}
