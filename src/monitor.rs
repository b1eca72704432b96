//! Live-refreshing monitor view.
//!
//! Redraws queue stats, health, and the most recent audit events every few
//! seconds until interrupted. Intended for watching the worker chew
//! through a backlog or for keeping an eye on an incident.

use anyhow::Result;
use std::time::Duration;

use crate::audit::{AuditFilter, AuditLogger};
use crate::config::Config;
use crate::db;
use crate::stats::{format_duration_ms, format_ts_iso, format_ts_relative, queue_for};

pub async fn run_monitor(config: &Config, interval_secs: u64) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = queue_for(config, &pool);
    let audit = AuditLogger::new(pool.clone());
    let interval = Duration::from_secs(interval_secs.max(1));

    println!("Monitoring queue (refresh every {}s). Press Ctrl-C to exit.", interval.as_secs());

    loop {
        // ANSI clear screen + home
        print!("\x1b[2J\x1b[H");

        let stats = queue.get_detailed_queue_stats().await?;
        let health = queue.get_queue_health().await?;
        let worker = queue.get_worker_status().await?;

        println!(
            "Embedding Queue Monitor — {}",
            chrono::Local::now().format("%H:%M:%S")
        );
        println!("{}", "=".repeat(60));
        println!(
            "  pending {:>5}  processing {:>3}  completed {:>6}  failed {:>4}",
            stats.by_status.pending,
            stats.by_status.processing,
            stats.by_status.completed,
            stats.by_status.failed
        );
        println!(
            "  24h: {} completed, {} failed, avg {}",
            stats.completed_last_24h,
            stats.failed_last_24h,
            stats
                .avg_processing_ms
                .map(|a| format_duration_ms(a as i64))
                .unwrap_or_else(|| "n/a".to_string())
        );
        println!(
            "  worker: {}  heartbeat: {}",
            if worker.is_running { "running" } else { "stopped" },
            worker
                .last_heartbeat
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string())
        );

        if health.is_healthy {
            println!("  health: OK");
        } else {
            println!("  health: DEGRADED");
            for issue in &health.issues {
                println!("    - {}", issue);
            }
        }

        let recent = audit
            .query(&AuditFilter {
                limit: Some(8),
                ..Default::default()
            })
            .await?;
        if !recent.is_empty() {
            println!();
            println!("  Recent events:");
            for event in &recent {
                println!(
                    "    {} [{:<5}] {}{}",
                    format_ts_iso(event.timestamp),
                    event.level,
                    event.message,
                    event
                        .task_id
                        .as_deref()
                        .map(|id| format!(" ({})", id))
                        .unwrap_or_default()
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    pool.close().await;
    Ok(())
}
