//! Administrative task commands: list, inspect, retry, cleanup, reset.
//!
//! Thin conveniences over the [`TaskQueue`](crate::queue::TaskQueue)
//! contract; no queue logic of its own lives here.

use anyhow::{bail, Result};

use crate::articles::{ArticleSource, SqliteArticles};
use crate::config::Config;
use crate::db;
use crate::models::{EmbeddingTask, TaskOperation, TaskPriority, TaskStatus};
use crate::stats::{format_ts_iso, format_ts_relative, queue_for};

/// Enqueue a task for an article, resolving the slug through the article
/// store first. On `delete`, prior pending tasks are superseded.
pub async fn run_enqueue(
    config: &Config,
    article_id: &str,
    operation: &str,
    priority: &str,
) -> Result<()> {
    let operation = TaskOperation::parse(operation)?;
    let priority = TaskPriority::parse(priority)?;

    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);
    let articles = SqliteArticles::new(pool.clone());

    let slug = match articles.fetch(article_id).await? {
        Some(article) => article.slug,
        None if operation == TaskOperation::Delete => {
            // The article row is already gone, and the cascade removed
            // its tasks and vector with it. Clear any orphan index entry
            // and skip the enqueue; a task row needs a live article.
            crate::index::VectorIndex::new(pool.clone())
                .delete(article_id)
                .await?;
            println!(
                "Article {} already removed; index entry cleared, no task needed.",
                article_id
            );
            pool.close().await;
            return Ok(());
        }
        None => bail!("Article not found: {}", article_id),
    };

    if operation == TaskOperation::Delete {
        let cancelled = queue
            .cancel_pending_for_article(article_id, "superseded")
            .await?;
        if cancelled > 0 {
            println!("Superseded {} pending task(s)", cancelled);
        }
    }

    let task_id = queue
        .enqueue_task(article_id, &slug, operation, priority, None)
        .await?;

    println!("Enqueued task {}", task_id);
    println!(
        "  article: {} ({}), operation: {}, priority: {}",
        article_id,
        slug,
        operation.as_str(),
        priority.as_str()
    );

    pool.close().await;
    Ok(())
}

/// List tasks in a status in claim order.
pub async fn run_list(config: &Config, status: &str, limit: i64, offset: i64) -> Result<()> {
    let status = TaskStatus::parse(status)?;
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let tasks = queue.get_tasks_by_status(status, limit, offset).await?;

    if tasks.is_empty() {
        println!("No {} tasks.", status.as_str());
    } else {
        println!("{} tasks ({} shown):", status.as_str(), tasks.len());
        println!(
            "  {:<36} {:<8} {:<7} {:<9} {:<20} {}",
            "ID", "PRIORITY", "OP", "ATTEMPTS", "SCHEDULED", "SLUG"
        );
        println!("  {}", "-".repeat(96));
        for task in &tasks {
            println!(
                "  {:<36} {:<8} {:<7} {:<9} {:<20} {}",
                task.id,
                task.priority.as_str(),
                task.operation.as_str(),
                format!("{}/{}", task.attempts, task.max_attempts),
                format_ts_iso(task.scheduled_at),
                task.slug
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// Inspect one task in full.
pub async fn run_show(config: &Config, task_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let task = queue
        .get_task_status(task_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Task not found: {}", task_id))?;

    print_task(&task);

    pool.close().await;
    Ok(())
}

/// Show all tasks for one article, newest first.
pub async fn run_article(config: &Config, article_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let tasks = queue.get_tasks_for_article(article_id).await?;

    if tasks.is_empty() {
        println!("No tasks for article {}.", article_id);
    } else {
        println!("{} task(s) for article {}:", tasks.len(), article_id);
        for task in &tasks {
            println!();
            print_task(task);
        }
    }

    pool.close().await;
    Ok(())
}

/// Retry one failed task.
pub async fn run_retry(config: &Config, task_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    queue.retry_task(task_id).await?;
    println!("Task {} rescheduled.", task_id);

    pool.close().await;
    Ok(())
}

/// Retry every failed task.
pub async fn run_retry_failed(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let count = queue.retry_failed_tasks().await?;
    println!("Rescheduled {} failed task(s).", count);

    pool.close().await;
    Ok(())
}

/// Purge completed tasks older than the retention window.
pub async fn run_cleanup(config: &Config, days_override: Option<u64>) -> Result<()> {
    let days = days_override.unwrap_or(config.queue.retention_days);
    let cutoff = crate::models::now_ms() - (days * 86_400 * 1000) as i64;

    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let deleted = queue.clear_completed_tasks(cutoff).await?;
    println!(
        "Purged {} completed task(s) older than {} day(s).",
        deleted, days
    );

    pool.close().await;
    Ok(())
}

/// Reset tasks stranded in `processing` beyond the stuck timeout.
pub async fn run_reset_stuck(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let timeout = std::time::Duration::from_secs(config.queue.stuck_timeout_secs);
    let count = queue.reset_stuck_tasks(timeout).await?;
    println!("Reset {} stuck task(s) to pending.", count);

    pool.close().await;
    Ok(())
}

fn print_task(task: &EmbeddingTask) {
    println!("Task {}", task.id);
    println!("  article:      {} ({})", task.article_id, task.slug);
    println!("  operation:    {}", task.operation.as_str());
    println!("  priority:     {}", task.priority.as_str());
    println!("  status:       {}", task.status.as_str());
    println!("  attempts:     {}/{}", task.attempts, task.max_attempts);
    println!(
        "  created:      {} ({})",
        format_ts_iso(task.created_at),
        format_ts_relative(task.created_at)
    );
    println!("  scheduled:    {}", format_ts_iso(task.scheduled_at));
    if let Some(ts) = task.processed_at {
        println!("  processed:    {}", format_ts_iso(ts));
    }
    if let Some(ts) = task.completed_at {
        println!("  completed:    {}", format_ts_iso(ts));
    }
    if let Some(err) = &task.error_message {
        println!("  last error:   {}", err);
    }
    if let Some(meta) = &task.metadata {
        println!("  metadata:     {}", meta);
    }
}
