//! CLI integration tests driving the `embedq` binary end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use embed_queue::articles::SqliteArticles;
use embed_queue::config::{Config, DbConfig};
use embed_queue::db;

fn embedq_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("embedq");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/embedq.sqlite"

[queue]
max_attempts = 3
poll_interval_secs = 1

[embedding]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("embedq.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_embedq(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = embedq_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run embedq binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Seed an article row through the library, the way the article manager
/// would.
fn seed_article(tmp: &TempDir, id: &str, slug: &str) {
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data/embedq.sqlite"),
        },
        queue: Default::default(),
        health: Default::default(),
        embedding: Default::default(),
        server: Default::default(),
    };
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(async move {
            let pool = db::connect(&config).await.unwrap();
            SqliteArticles::new(pool.clone())
                .upsert(id, slug, Some("Title"), "Body text.")
                .await
                .unwrap();
            pool.close().await;
        });
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_embedq(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/embedq.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_embedq(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_embedq(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_enqueue_requires_existing_article() {
    let (_tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);

    let (stdout, stderr, success) = run_embedq(&config_path, &["enqueue", "ghost"]);
    assert!(!success, "enqueue for missing article should fail");
    assert!(
        stderr.contains("Article not found") || stdout.contains("Article not found"),
        "stdout={}, stderr={}",
        stdout,
        stderr
    );
}

#[test]
fn test_enqueue_and_list() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);
    seed_article(&tmp, "a1", "first-post");

    let (stdout, stderr, success) = run_embedq(
        &config_path,
        &["enqueue", "a1", "--operation", "create", "--priority", "high"],
    );
    assert!(success, "enqueue failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Enqueued task"));
    assert!(stdout.contains("first-post"));

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "list"]);
    assert!(success);
    assert!(stdout.contains("first-post"));
    assert!(stdout.contains("high"));
    assert!(stdout.contains("0/3"));
}

#[test]
fn test_enqueue_rejects_bad_operation() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);
    seed_article(&tmp, "a1", "post");

    let (_, stderr, success) =
        run_embedq(&config_path, &["enqueue", "a1", "--operation", "destroy"]);
    assert!(!success);
    assert!(stderr.contains("operation"), "stderr={}", stderr);
}

#[test]
fn test_enqueue_delete_for_missing_article() {
    let (_tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);

    // The article row is already gone; the cascade cleaned up with it,
    // so no task is created.
    let (stdout, stderr, success) = run_embedq(
        &config_path,
        &["enqueue", "gone-id", "--operation", "delete"],
    );
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("already removed"));

    let (stdout, _, _) = run_embedq(&config_path, &["queue", "list"]);
    assert!(stdout.contains("No pending tasks"));
}

#[test]
fn test_delete_supersedes_pending_tasks() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);
    seed_article(&tmp, "a1", "doomed");

    run_embedq(&config_path, &["enqueue", "a1"]);
    run_embedq(&config_path, &["enqueue", "a1"]);

    let (stdout, _, success) =
        run_embedq(&config_path, &["enqueue", "a1", "--operation", "delete"]);
    assert!(success);
    assert!(stdout.contains("Superseded 2 pending task(s)"));
}

#[test]
fn test_list_empty_queue() {
    let (_tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "list"]);
    assert!(success);
    assert!(stdout.contains("No pending tasks"));
}

#[test]
fn test_show_task() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);
    seed_article(&tmp, "a1", "shown");

    let (stdout, _, _) = run_embedq(&config_path, &["enqueue", "a1"]);
    let task_id = stdout
        .lines()
        .find(|l| l.starts_with("Enqueued task "))
        .unwrap()
        .trim_start_matches("Enqueued task ")
        .to_string();

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "show", &task_id]);
    assert!(success);
    assert!(stdout.contains(&task_id));
    assert!(stdout.contains("status:       pending"));
    assert!(stdout.contains("attempts:     0/3"));

    let (_, stderr, success) = run_embedq(&config_path, &["queue", "show", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Task not found"));
}

#[test]
fn test_stats_and_health_on_fresh_queue() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);
    seed_article(&tmp, "a1", "counted");
    run_embedq(&config_path, &["enqueue", "a1"]);

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "stats"]);
    assert!(success);
    assert!(stdout.contains("Pending:     1"));
    assert!(stdout.contains("Total:       1"));
    assert!(stdout.contains("Worker:      stopped"));

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "health"]);
    assert!(success, "fresh queue should be healthy: {}", stdout);
    assert!(stdout.contains("Queue health: OK"));
}

#[test]
fn test_maintenance_commands_on_empty_queue() {
    let (_tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "retry-failed"]);
    assert!(success);
    assert!(stdout.contains("Rescheduled 0 failed task(s)"));

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "cleanup", "--days", "7"]);
    assert!(success);
    assert!(stdout.contains("Purged 0 completed task(s)"));

    let (stdout, _, success) = run_embedq(&config_path, &["queue", "reset-stuck"]);
    assert!(success);
    assert!(stdout.contains("Reset 0 stuck task(s)"));
}

#[test]
fn test_audit_commands() {
    let (tmp, config_path) = setup_test_env();
    run_embedq(&config_path, &["init"]);

    let (stdout, _, success) = run_embedq(&config_path, &["audit", "list"]);
    assert!(success);
    assert!(stdout.contains("No matching audit events"));

    // Superseding pending tasks writes a queue-category audit event.
    seed_article(&tmp, "a1", "audited");
    run_embedq(&config_path, &["enqueue", "a1"]);
    run_embedq(&config_path, &["enqueue", "a1", "--operation", "delete"]);

    let (stdout, _, success) =
        run_embedq(&config_path, &["audit", "list", "--category", "queue"]);
    assert!(success);
    assert!(stdout.contains("Cancelled"));

    let (stdout, _, success) = run_embedq(&config_path, &["audit", "stats"]);
    assert!(success);
    assert!(stdout.contains("Total events:   1"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let bogus = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_embedq(&bogus, &["queue", "stats"]);
    assert!(!success);
    assert!(stderr.contains("config"), "stderr={}", stderr);
}
