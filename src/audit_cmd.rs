//! CLI views over the audit log.

use anyhow::Result;

use crate::audit::{AuditFilter, AuditLogger};
use crate::config::Config;
use crate::db;
use crate::stats::{format_ts_iso, format_ts_relative};

#[allow(clippy::too_many_arguments)]
pub async fn run_audit_list(
    config: &Config,
    level: Option<String>,
    category: Option<String>,
    task_id: Option<String>,
    article_id: Option<String>,
    since_hours: Option<i64>,
    limit: i64,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let audit = AuditLogger::new(pool.clone());

    let filter = AuditFilter {
        level,
        category,
        task_id,
        article_id,
        since: since_hours.map(|h| crate::models::now_ms() - h * 3600 * 1000),
        limit: Some(limit),
    };

    let records = audit.query(&filter).await?;

    if records.is_empty() {
        println!("No matching audit events.");
    } else {
        for record in &records {
            println!(
                "{} [{:<5}] [{}] {}",
                format_ts_iso(record.timestamp),
                record.level,
                record.category,
                record.message
            );
            if let Some(task_id) = &record.task_id {
                println!("    task: {}", task_id);
            }
            if let Some(article_id) = &record.article_id {
                println!("    article: {}", article_id);
            }
            if let Some(duration) = record.duration_ms {
                println!("    duration: {} ms", duration);
            }
            if let Some(error) = &record.error {
                println!("    error: {}", error);
            }
        }
        println!();
        println!("{} event(s).", records.len());
    }

    pool.close().await;
    Ok(())
}

pub async fn run_audit_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let audit = AuditLogger::new(pool.clone());

    let stats = audit.stats().await?;

    println!("Audit Log — Stats");
    println!("=================");
    println!();
    println!("  Total events:   {}", stats.total);
    println!("  Errors (24h):   {}", stats.recent_errors);

    if !stats.by_level.is_empty() {
        println!();
        println!("  By level:");
        for (level, count) in &stats.by_level {
            println!("    {:<8} {}", level, count);
        }
    }
    if !stats.by_category.is_empty() {
        println!();
        println!("  By category:");
        for (category, count) in &stats.by_category {
            println!("    {:<8} {}", category, count);
        }
    }
    if let (Some(oldest), Some(newest)) = (stats.oldest_timestamp, stats.newest_timestamp) {
        println!();
        println!(
            "  Range:          {} — {} ({})",
            format_ts_iso(oldest),
            format_ts_iso(newest),
            format_ts_relative(newest)
        );
    }
    println!();

    pool.close().await;
    Ok(())
}
