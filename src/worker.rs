//! Background worker loop.
//!
//! A single polling loop claims tasks from the queue in priority order,
//! invokes the embedding provider, and records the outcome. Correctness
//! rests entirely on the atomicity of [`TaskQueue::claim_next_task`]; the
//! loop itself holds no locks and keeps no task state outside the store.
//!
//! Task-level failures are always recovered locally and never crash the
//! loop. Store-level failures back off and retry the store call itself.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::articles::ArticleSource;
use crate::audit::{AuditEvent, AuditLogger};
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::{now_ms, EmbeddingTask, TaskOperation, TaskStatus};
use crate::queue::TaskQueue;

/// Worker lifecycle: `Stopped → Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
        }
    }
}

pub struct Worker {
    queue: TaskQueue,
    provider: Arc<dyn EmbeddingProvider>,
    articles: Arc<dyn ArticleSource>,
    index: VectorIndex,
    state_tx: watch::Sender<WorkerState>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        provider: Arc<dyn EmbeddingProvider>,
        articles: Arc<dyn ArticleSource>,
    ) -> Self {
        let index = VectorIndex::new(queue.pool().clone());
        let (state_tx, _) = watch::channel(WorkerState::Stopped);
        Self {
            queue,
            provider,
            articles,
            index,
            state_tx,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Start the worker loop. Idempotent: starting a worker that is not
    /// stopped logs and returns the current state.
    pub async fn start(&self) -> Result<WorkerState> {
        let mut handle = self.handle.lock().await;

        let current = *self.state_tx.borrow();
        if current != WorkerState::Stopped {
            println!("Worker already {}; start is a no-op", current.as_str());
            return Ok(current);
        }

        self.state_tx.send_replace(WorkerState::Starting);

        let now = now_ms();
        let marked = sqlx::query(
            "UPDATE embedding_worker_status \
             SET is_running = 1, started_at = ?, last_heartbeat = ? WHERE id = 1",
        )
        .bind(now)
        .bind(now)
        .execute(self.queue.pool())
        .await;
        if let Err(e) = marked {
            // Back to Stopped, or a later start() would see Starting
            // forever and no-op.
            self.state_tx.send_replace(WorkerState::Stopped);
            return Err(e.into());
        }

        self.queue
            .audit()
            .log(AuditEvent::info("worker", "Worker started"))
            .await;

        let ctx = LoopContext {
            queue: self.queue.clone(),
            provider: self.provider.clone(),
            articles: self.articles.clone(),
            index: self.index.clone(),
            audit: self.queue.audit().clone(),
            state_rx: self.state_tx.subscribe(),
        };
        *handle = Some(tokio::spawn(run_loop(ctx)));

        self.state_tx.send_replace(WorkerState::Running);
        Ok(WorkerState::Running)
    }

    /// Signal the loop to exit after the current task and wait for it.
    /// In-flight provider calls are never cancelled destructively.
    pub async fn stop(&self) -> Result<WorkerState> {
        let mut handle = self.handle.lock().await;

        let current = *self.state_tx.borrow();
        if current != WorkerState::Running {
            return Ok(current);
        }

        self.state_tx.send_replace(WorkerState::Stopping);

        if let Some(h) = handle.take() {
            let _ = h.await;
        }

        sqlx::query(
            "UPDATE embedding_worker_status \
             SET is_running = 0, last_heartbeat = ? WHERE id = 1",
        )
        .bind(now_ms())
        .execute(self.queue.pool())
        .await?;

        self.queue
            .audit()
            .log(AuditEvent::info("worker", "Worker stopped"))
            .await;

        self.state_tx.send_replace(WorkerState::Stopped);
        Ok(WorkerState::Stopped)
    }

    /// Run until Ctrl-C, then stop cooperatively. CLI entry point.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.start().await?;
        println!(
            "Worker running (poll every {}s, stuck sweep every {}s). Press Ctrl-C to stop.",
            self.queue.config().poll_interval_secs,
            self.queue.config().sweep_interval_secs
        );
        tokio::signal::ctrl_c().await?;
        println!("Shutting down after current task...");
        self.stop().await?;
        Ok(())
    }
}

struct LoopContext {
    queue: TaskQueue,
    provider: Arc<dyn EmbeddingProvider>,
    articles: Arc<dyn ArticleSource>,
    index: VectorIndex,
    audit: AuditLogger,
    state_rx: watch::Receiver<WorkerState>,
}

async fn run_loop(mut ctx: LoopContext) {
    let cfg = ctx.queue.config().clone();
    let poll = Duration::from_secs(cfg.poll_interval_secs);
    let sweep_every = Duration::from_secs(cfg.sweep_interval_secs);
    let stuck_timeout = Duration::from_secs(cfg.stuck_timeout_secs);

    // First sweep runs immediately: tasks stranded by a previous crash
    // should not wait a full sweep interval.
    let mut last_sweep: Option<Instant> = None;

    loop {
        if *ctx.state_rx.borrow() == WorkerState::Stopping {
            break;
        }

        let sweep_due = last_sweep.map_or(true, |t| t.elapsed() >= sweep_every);
        if sweep_due {
            match ctx.queue.reset_stuck_tasks(stuck_timeout).await {
                Ok(0) => {}
                Ok(n) => println!("Reset {} stuck task(s) to pending", n),
                Err(e) => eprintln!("Warning: stuck-task sweep failed: {}", e),
            }
            last_sweep = Some(Instant::now());
        }

        touch_heartbeat(&ctx.queue).await;

        match ctx.queue.claim_next_task().await {
            Ok(Some(task)) => {
                process_task(&ctx, task).await;
            }
            Ok(None) => {
                idle_sleep(&mut ctx.state_rx, poll).await;
            }
            Err(e) => {
                // Store unavailability is not a task failure; back off and
                // retry the claim itself.
                eprintln!("Warning: failed to claim next task: {}", e);
                idle_sleep(&mut ctx.state_rx, poll).await;
            }
        }
    }
}

/// Sleep the poll interval, waking early if the state changes.
async fn idle_sleep(state_rx: &mut watch::Receiver<WorkerState>, poll: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(poll) => {}
        _ = state_rx.changed() => {}
    }
}

async fn touch_heartbeat(queue: &TaskQueue) {
    let result = sqlx::query(
        "UPDATE embedding_worker_status SET last_heartbeat = ? WHERE id = 1",
    )
    .bind(now_ms())
    .execute(queue.pool())
    .await;
    if let Err(e) = result {
        eprintln!("Warning: failed to update worker heartbeat: {}", e);
    }
}

async fn process_task(ctx: &LoopContext, task: EmbeddingTask) {
    let start = Instant::now();

    ctx.audit
        .log(
            AuditEvent::info("task", "Task claimed")
                .task(&task.id)
                .article(&task.article_id)
                .operation(task.operation.as_str()),
        )
        .await;

    let outcome = execute_operation(ctx, &task).await;
    let elapsed_ms = start.elapsed().as_millis() as i64;

    match outcome {
        Ok(()) => {
            if let Err(e) = ctx.queue.record_success(&task.id).await {
                eprintln!("Warning: failed to record success for {}: {}", task.id, e);
            }
            bump_counters(ctx, true).await;
            ctx.audit
                .log(
                    AuditEvent::info("task", "Task completed")
                        .task(&task.id)
                        .article(&task.article_id)
                        .operation(task.operation.as_str())
                        .duration(elapsed_ms),
                )
                .await;
        }
        Err(e) => {
            let error = format!("{:#}", e);
            match ctx.queue.record_failure(&task.id, &error).await {
                Ok(TaskStatus::Failed) => {
                    ctx.audit
                        .log(
                            AuditEvent::error("task", "Task failed; attempts exhausted")
                                .task(&task.id)
                                .article(&task.article_id)
                                .operation(task.operation.as_str())
                                .duration(elapsed_ms)
                                .with_error(&error),
                        )
                        .await;
                }
                Ok(_) => {
                    ctx.audit
                        .log(
                            AuditEvent::warn("task", "Task failed; will retry")
                                .task(&task.id)
                                .article(&task.article_id)
                                .operation(task.operation.as_str())
                                .duration(elapsed_ms)
                                .with_error(&error),
                        )
                        .await;
                }
                Err(store_err) => {
                    eprintln!(
                        "Warning: failed to record failure for {}: {}",
                        task.id, store_err
                    );
                }
            }
            bump_counters(ctx, false).await;
        }
    }
}

/// Apply the task's operation to the vector index.
async fn execute_operation(ctx: &LoopContext, task: &EmbeddingTask) -> Result<()> {
    match task.operation {
        TaskOperation::Delete => ctx.index.delete(&task.article_id).await,
        TaskOperation::Create | TaskOperation::Update => {
            let article = ctx
                .articles
                .fetch(&task.article_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("Article not found: {} ({})", task.article_id, task.slug)
                })?;

            let text = match &article.title {
                Some(title) => format!("{}\n\n{}", title, article.body),
                None => article.body.clone(),
            };
            if text.trim().is_empty() {
                bail!("Article {} has no content to embed", task.article_id);
            }

            let vector = ctx.provider.embed(&text).await?;
            ctx.index
                .upsert(
                    &task.article_id,
                    ctx.provider.model_name(),
                    ctx.provider.dims(),
                    &vector,
                )
                .await
        }
    }
}

async fn bump_counters(ctx: &LoopContext, succeeded: bool) {
    let (ok, fail) = if succeeded { (1i64, 0i64) } else { (0, 1) };
    let result = sqlx::query(
        "UPDATE embedding_worker_status SET \
         tasks_processed = tasks_processed + 1, \
         tasks_succeeded = tasks_succeeded + ?, \
         tasks_failed = tasks_failed + ?, \
         last_heartbeat = ? WHERE id = 1",
    )
    .bind(ok)
    .bind(fail)
    .bind(now_ms())
    .execute(ctx.queue.pool())
    .await;
    if let Err(e) = result {
        eprintln!("Warning: failed to update worker counters: {}", e);
    }
}
