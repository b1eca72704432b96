use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an already-open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Minimal articles table. The article manager owns the full schema;
    // the queue needs id/slug/body plus the cascade target for task rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_tasks (
            id TEXT PRIMARY KEY,
            article_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
            priority TEXT NOT NULL DEFAULT 'normal'
                CHECK (priority IN ('high', 'normal', 'low')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            created_at INTEGER NOT NULL,
            scheduled_at INTEGER NOT NULL,
            processed_at INTEGER,
            completed_at INTEGER,
            error_message TEXT,
            metadata TEXT,
            FOREIGN KEY (article_id) REFERENCES articles(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Singleton worker status row; the CHECK makes the single-row shape a
    // schema invariant rather than a convention.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_worker_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_running INTEGER NOT NULL DEFAULT 0,
            last_heartbeat INTEGER,
            tasks_processed INTEGER NOT NULL DEFAULT 0,
            tasks_succeeded INTEGER NOT NULL DEFAULT 0,
            tasks_failed INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_audit_logs (
            id TEXT PRIMARY KEY,
            timestamp INTEGER NOT NULL,
            level TEXT NOT NULL CHECK (level IN ('info', 'warn', 'error')),
            category TEXT NOT NULL,
            message TEXT NOT NULL,
            task_id TEXT,
            article_id TEXT,
            operation TEXT,
            metadata TEXT,
            duration_ms INTEGER,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index the worker writes into (little-endian f32 blobs).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS article_vectors (
            article_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (article_id) REFERENCES articles(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_claim \
         ON embedding_tasks(status, priority, scheduled_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_article ON embedding_tasks(article_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON embedding_tasks(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON embedding_audit_logs(timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_level ON embedding_audit_logs(level)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_category ON embedding_audit_logs(category)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_task ON embedding_audit_logs(task_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_article ON embedding_audit_logs(article_id)")
        .execute(pool)
        .await?;

    // Seed the worker status singleton so readers never see a missing row.
    sqlx::query(
        "INSERT INTO embedding_worker_status (id, is_running) VALUES (1, 0) \
         ON CONFLICT(id) DO NOTHING",
    )
    .execute(pool)
    .await?;

    Ok(())
}
