//! Append-only audit log for queue and worker events.
//!
//! Every state change worth diagnosing later (task claimed, succeeded,
//! failed, stuck-reset; worker started/stopped) lands in
//! `embedding_audit_logs`. Writes are best-effort: a logging failure must
//! never abort the queue operation that triggered it, so insert errors are
//! reported to stderr and swallowed.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::now_ms;

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
        }
    }
}

/// An event to append. Construct with [`AuditEvent::info`] / `warn` /
/// `error` and chain the optional identifiers.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub level: AuditLevel,
    pub category: String,
    pub message: String,
    pub task_id: Option<String>,
    pub article_id: Option<String>,
    pub operation: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl AuditEvent {
    fn new(level: AuditLevel, category: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            category: category.to_string(),
            message: message.into(),
            task_id: None,
            article_id: None,
            operation: None,
            metadata: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn info(category: &str, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Info, category, message)
    }

    pub fn warn(category: &str, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Warn, category, message)
    }

    pub fn error(category: &str, message: impl Into<String>) -> Self {
        Self::new(AuditLevel::Error, category, message)
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn article(mut self, article_id: &str) -> Self {
        self.article_id = Some(article_id.to_string());
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn duration(mut self, ms: i64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A stored audit record, as returned by queries.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: i64,
    pub level: String,
    pub category: String,
    pub message: String,
    pub task_id: Option<String>,
    pub article_id: Option<String>,
    pub operation: Option<String>,
    pub metadata: Option<String>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl AuditRecord {
    fn from_row(row: &SqliteRow) -> Self {
        AuditRecord {
            id: row.get("id"),
            timestamp: row.get("timestamp"),
            level: row.get("level"),
            category: row.get("category"),
            message: row.get("message"),
            task_id: row.get("task_id"),
            article_id: row.get("article_id"),
            operation: row.get("operation"),
            metadata: row.get("metadata"),
            duration_ms: row.get("duration_ms"),
            error: row.get("error"),
        }
    }
}

/// Filter for [`AuditLogger::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub level: Option<String>,
    pub category: Option<String>,
    pub task_id: Option<String>,
    pub article_id: Option<String>,
    /// Only events at or after this timestamp (ms).
    pub since: Option<i64>,
    pub limit: Option<i64>,
}

/// Aggregate statistics over the audit log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_level: Vec<(String, i64)>,
    pub by_category: Vec<(String, i64)>,
    /// Error-level events in the last 24h.
    pub recent_errors: i64,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// Writer/reader for the audit log table.
#[derive(Clone)]
pub struct AuditLogger {
    pool: SqlitePool,
}

impl AuditLogger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an event. Best-effort: insert failures are reported to
    /// stderr and swallowed so the triggering operation is never aborted.
    pub async fn log(&self, event: AuditEvent) {
        let metadata = event
            .metadata
            .as_ref()
            .map(|m| m.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO embedding_audit_logs
                (id, timestamp, level, category, message, task_id, article_id,
                 operation, metadata, duration_ms, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(now_ms())
        .bind(event.level.as_str())
        .bind(&event.category)
        .bind(&event.message)
        .bind(&event.task_id)
        .bind(&event.article_id)
        .bind(&event.operation)
        .bind(&metadata)
        .bind(event.duration_ms)
        .bind(&event.error)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            eprintln!(
                "Warning: failed to write audit event '{}': {}",
                event.message, e
            );
        }
    }

    /// Query events matching the filter, newest first.
    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let mut sql = String::from(
            "SELECT id, timestamp, level, category, message, task_id, article_id, \
             operation, metadata, duration_ms, error \
             FROM embedding_audit_logs WHERE 1=1",
        );
        if filter.level.is_some() {
            sql.push_str(" AND level = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.task_id.is_some() {
            sql.push_str(" AND task_id = ?");
        }
        if filter.article_id.is_some() {
            sql.push_str(" AND article_id = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(level) = &filter.level {
            query = query.bind(level);
        }
        if let Some(category) = &filter.category {
            query = query.bind(category);
        }
        if let Some(task_id) = &filter.task_id {
            query = query.bind(task_id);
        }
        if let Some(article_id) = &filter.article_id {
            query = query.bind(article_id);
        }
        if let Some(since) = filter.since {
            query = query.bind(since);
        }
        query = query.bind(filter.limit.unwrap_or(100));

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(AuditRecord::from_row).collect())
    }

    /// Aggregate statistics: counts by level and category, recent error
    /// count, and the covered time range.
    pub async fn stats(&self) -> Result<AuditStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_audit_logs")
            .fetch_one(&self.pool)
            .await?;

        let level_rows = sqlx::query(
            "SELECT level, COUNT(*) AS count FROM embedding_audit_logs \
             GROUP BY level ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_level = level_rows
            .iter()
            .map(|r| (r.get::<String, _>("level"), r.get::<i64, _>("count")))
            .collect();

        let category_rows = sqlx::query(
            "SELECT category, COUNT(*) AS count FROM embedding_audit_logs \
             GROUP BY category ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_category = category_rows
            .iter()
            .map(|r| (r.get::<String, _>("category"), r.get::<i64, _>("count")))
            .collect();

        let day_ago = now_ms() - 24 * 3600 * 1000;
        let recent_errors: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embedding_audit_logs \
             WHERE level = 'error' AND timestamp >= ?",
        )
        .bind(day_ago)
        .fetch_one(&self.pool)
        .await?;

        let range = sqlx::query(
            "SELECT MIN(timestamp) AS oldest, MAX(timestamp) AS newest \
             FROM embedding_audit_logs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(AuditStats {
            total,
            by_level,
            by_category,
            recent_errors,
            oldest_timestamp: range.get("oldest"),
            newest_timestamp: range.get("newest"),
        })
    }
}
