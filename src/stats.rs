//! Queue statistics and health overview for the CLI.
//!
//! Gives operators a quick read on backlog depth, throughput, failure
//! rates, and the worker's own lifecycle. Used by `embedq queue stats`
//! and `embedq queue health`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::queue::TaskQueue;

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let stats = queue.get_detailed_queue_stats().await?;
    let worker = queue.get_worker_status().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Embedding Queue — Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Pending:     {}", stats.by_status.pending);
    println!("  Processing:  {}", stats.by_status.processing);
    println!("  Completed:   {}", stats.by_status.completed);
    println!("  Failed:      {}", stats.by_status.failed);
    println!("  Total:       {}", stats.by_status.total);

    if !stats.by_priority.is_empty() {
        println!();
        println!("  By priority:");
        for (priority, count) in &stats.by_priority {
            println!("    {:<8} {}", priority, count);
        }
    }

    if !stats.by_operation.is_empty() {
        println!();
        println!("  By operation:");
        for (operation, count) in &stats.by_operation {
            println!("    {:<8} {}", operation, count);
        }
    }

    println!();
    println!("  Last 24h:");
    println!("    completed: {}", stats.completed_last_24h);
    println!("    failed:    {}", stats.failed_last_24h);
    match stats.avg_processing_ms {
        Some(avg) => println!("    avg processing: {}", format_duration_ms(avg as i64)),
        None => println!("    avg processing: n/a"),
    }

    println!();
    println!(
        "  Worker:      {}",
        if worker.is_running { "running" } else { "stopped" }
    );
    match worker.last_heartbeat {
        Some(ts) => println!("  Heartbeat:   {}", format_ts_relative(ts)),
        None => println!("  Heartbeat:   never"),
    }
    println!(
        "  Processed:   {} ({} ok, {} failed)",
        worker.tasks_processed, worker.tasks_succeeded, worker.tasks_failed
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Run the health command. Exits nonzero when unhealthy so scripts can
/// gate on it.
pub async fn run_health(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);

    let health = queue.get_queue_health().await?;
    pool.close().await;

    if health.is_healthy {
        println!("Queue health: OK");
        Ok(())
    } else {
        println!("Queue health: DEGRADED");
        for issue in &health.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("{} issue(s) found", health.issues.len());
    }
}

pub fn queue_for(config: &Config, pool: &SqlitePool) -> TaskQueue {
    TaskQueue::new(pool.clone(), config.queue.clone(), config.health.clone())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a millisecond duration for display.
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{} ms", ms)
    } else if ms < 60_000 {
        format!("{:.1} s", ms as f64 / 1000.0)
    } else {
        format!("{:.1} min", ms as f64 / 60_000.0)
    }
}

/// Format a millisecond epoch timestamp as a relative time string
/// (e.g. "3 hours ago").
pub fn format_ts_relative(ts_ms: i64) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let delta = (now - ts_ms) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_ms);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_ms)
    }
}

pub fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}
