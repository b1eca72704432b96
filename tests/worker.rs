//! Worker loop end-to-end against a scripted embedding provider.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use embed_queue::articles::SqliteArticles;
use embed_queue::audit::AuditFilter;
use embed_queue::config::{Config, DbConfig, HealthConfig, QueueConfig};
use embed_queue::embedding::EmbeddingProvider;
use embed_queue::index::VectorIndex;
use embed_queue::models::{now_ms, TaskOperation, TaskPriority, TaskStatus};
use embed_queue::queue::TaskQueue;
use embed_queue::worker::{Worker, WorkerState};
use embed_queue::{db, migrate};

/// Provider whose first `fail_first` calls error and the rest return a
/// fixed vector.
struct ScriptedProvider {
    fail_first: u32,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn reliable() -> Self {
        Self {
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted-model"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            bail!("scripted provider failure {}", call + 1);
        }
        Ok(vec![0.1, 0.2, 0.3, 0.4])
    }
}

async fn setup() -> (TempDir, SqlitePool, TaskQueue) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("embedq.sqlite"),
        },
        queue: QueueConfig {
            poll_interval_secs: 1,
            ..QueueConfig::default()
        },
        health: HealthConfig::default(),
        embedding: Default::default(),
        server: Default::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let queue = TaskQueue::new(pool.clone(), config.queue.clone(), config.health.clone());
    (tmp, pool, queue)
}

fn worker_with(queue: &TaskQueue, pool: &SqlitePool, provider: ScriptedProvider) -> Worker {
    Worker::new(
        queue.clone(),
        Arc::new(provider),
        Arc::new(SqliteArticles::new(pool.clone())),
    )
}

/// Poll until the task reaches `want` or the deadline passes.
async fn wait_for_status(queue: &TaskQueue, task_id: &str, want: TaskStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = queue.get_task_status(task_id).await.unwrap().unwrap();
        if task.status == want {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "task {} never reached {}; last status {}",
                task_id,
                want.as_str(),
                task.status.as_str()
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn processes_task_end_to_end() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "hello-world", Some("Hello"), "World body.")
        .await
        .unwrap();
    let id = queue
        .enqueue_task(
            "a1",
            "hello-world",
            TaskOperation::Create,
            TaskPriority::Normal,
            None,
        )
        .await
        .unwrap();

    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Completed).await;
    worker.stop().await.unwrap();

    let vector = VectorIndex::new(pool.clone()).get("a1").await.unwrap();
    assert_eq!(vector.unwrap(), vec![0.1, 0.2, 0.3, 0.4]);

    let status = queue.get_worker_status().await.unwrap();
    assert!(!status.is_running);
    assert_eq!(status.tasks_processed, 1);
    assert_eq!(status.tasks_succeeded, 1);
    assert_eq!(status.tasks_failed, 0);
    assert!(status.last_heartbeat.is_some());
    assert!(status.started_at.is_some());

    // Lifecycle and task events landed in the audit log.
    let events = queue
        .audit()
        .query(&AuditFilter {
            task_id: Some(id.clone()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.message == "Task claimed"));
    let completed = events
        .iter()
        .find(|e| e.message == "Task completed")
        .unwrap();
    assert!(completed.duration_ms.is_some());
    assert_eq!(completed.operation.as_deref(), Some("create"));
}

#[tokio::test]
async fn transient_failure_retries_then_succeeds() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "flaky", Some("Flaky"), "Body.")
        .await
        .unwrap();
    let id = queue
        .enqueue_task("a1", "flaky", TaskOperation::Update, TaskPriority::Normal, None)
        .await
        .unwrap();

    let worker = worker_with(&queue, &pool, ScriptedProvider::failing_first(1));
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Completed).await;
    worker.stop().await.unwrap();

    let task = queue.get_task_status(&id).await.unwrap().unwrap();
    assert_eq!(task.attempts, 1);
    assert!(task.error_message.is_none());

    let status = queue.get_worker_status().await.unwrap();
    assert_eq!(status.tasks_processed, 2);
    assert_eq!(status.tasks_succeeded, 1);
    assert_eq!(status.tasks_failed, 1);

    let warns = queue
        .audit()
        .query(&AuditFilter {
            level: Some("warn".to_string()),
            task_id: Some(id.clone()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(warns.len(), 1);
    assert!(warns[0].error.as_deref().unwrap().contains("scripted"));
}

#[tokio::test]
async fn persistent_failure_exhausts_attempts() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "doomed", Some("Doomed"), "Body.")
        .await
        .unwrap();
    let id = queue
        .enqueue_task("a1", "doomed", TaskOperation::Update, TaskPriority::Normal, None)
        .await
        .unwrap();

    let worker = worker_with(&queue, &pool, ScriptedProvider::failing_first(u32::MAX));
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Failed).await;
    worker.stop().await.unwrap();

    let task = queue.get_task_status(&id).await.unwrap().unwrap();
    assert_eq!(task.attempts, 3);
    assert!(task.completed_at.is_some());
    assert!(task.error_message.unwrap().contains("scripted"));

    let errors = queue
        .audit()
        .query(&AuditFilter {
            level: Some("error".to_string()),
            task_id: Some(id.clone()),
            ..AuditFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "Task failed; attempts exhausted");
}

#[tokio::test]
async fn delete_task_removes_vector() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "old", Some("Old"), "Body.")
        .await
        .unwrap();
    let index = VectorIndex::new(pool.clone());
    index
        .upsert("a1", "scripted-model", 4, &[1.0, 2.0, 3.0, 4.0])
        .await
        .unwrap();

    let id = queue
        .enqueue_task("a1", "old", TaskOperation::Delete, TaskPriority::High, None)
        .await
        .unwrap();

    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Completed).await;
    worker.stop().await.unwrap();

    assert!(index.get("a1").await.unwrap().is_none());
}

#[tokio::test]
async fn empty_article_body_fails_task() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "blank", None, "   ")
        .await
        .unwrap();
    let id = queue
        .enqueue_task("a1", "blank", TaskOperation::Create, TaskPriority::Normal, None)
        .await
        .unwrap();

    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Failed).await;
    worker.stop().await.unwrap();

    let task = queue.get_task_status(&id).await.unwrap().unwrap();
    assert!(task.error_message.unwrap().contains("no content"));
}

#[tokio::test]
async fn stranded_task_is_swept_on_startup() {
    let (_tmp, pool, queue) = setup().await;
    SqliteArticles::new(pool.clone())
        .upsert("a1", "stranded", Some("Stranded"), "Body.")
        .await
        .unwrap();
    let id = queue
        .enqueue_task("a1", "stranded", TaskOperation::Update, TaskPriority::Normal, None)
        .await
        .unwrap();

    // Simulate a previous worker that claimed the task and crashed.
    queue.claim_next_task().await.unwrap().unwrap();
    sqlx::query("UPDATE embedding_tasks SET processed_at = ? WHERE id = ?")
        .bind(now_ms() - 31 * 60 * 1000)
        .bind(&id)
        .execute(&pool)
        .await
        .unwrap();

    // The first sweep runs before the first claim, so the stranded task
    // is reset and processed without waiting a sweep interval.
    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());
    worker.start().await.unwrap();
    wait_for_status(&queue, &id, TaskStatus::Completed).await;
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn failed_start_leaves_worker_startable() {
    let (_tmp, pool, queue) = setup().await;
    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());

    // Break the status table so marking the worker running fails.
    sqlx::query("DROP TABLE embedding_worker_status")
        .execute(&pool)
        .await
        .unwrap();

    assert!(worker.start().await.is_err());
    assert_eq!(worker.state(), WorkerState::Stopped);

    // Once the store is healthy again the same worker can start.
    migrate::apply(&pool).await.unwrap();
    assert_eq!(worker.start().await.unwrap(), WorkerState::Running);
    assert_eq!(worker.stop().await.unwrap(), WorkerState::Stopped);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let (_tmp, pool, queue) = setup().await;

    let worker = worker_with(&queue, &pool, ScriptedProvider::reliable());
    assert_eq!(worker.state(), WorkerState::Stopped);

    assert_eq!(worker.start().await.unwrap(), WorkerState::Running);
    assert_eq!(worker.start().await.unwrap(), WorkerState::Running);
    assert!(queue.get_worker_status().await.unwrap().is_running);

    assert_eq!(worker.stop().await.unwrap(), WorkerState::Stopped);
    assert_eq!(worker.stop().await.unwrap(), WorkerState::Stopped);
    assert!(!queue.get_worker_status().await.unwrap().is_running);
}
