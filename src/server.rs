//! HTTP health and stats endpoints.
//!
//! A small axum server exposing the queue's diagnostic signals to load
//! balancers and monitoring tools:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Queue health signal (always 200; payload carries the verdict) |
//! | `GET`  | `/stats` | Detailed queue statistics |
//!
//! `/health` returns 200 even for a degraded queue: the signal is the
//! `queue.is_healthy` field plus the issues list, not the status code.
//! A 5xx from this endpoint means the store itself is unreachable.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::models::{DetailedQueueStats, QueueHealth, WorkerStatus};
use crate::queue::TaskQueue;

#[derive(Clone)]
struct AppState {
    queue: Arc<TaskQueue>,
}

/// Start the health/stats HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let queue = Arc::new(TaskQueue::new(
        pool,
        config.queue.clone(),
        config.health.clone(),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { queue });

    println!("Queue health server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    queue: QueueHealth,
    worker: WorkerStatus,
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = match state.queue.get_queue_health().await {
        Ok(h) => h,
        Err(e) => return store_unavailable(e),
    };
    let worker = match state.queue.get_worker_status().await {
        Ok(w) => w,
        Err(e) => return store_unavailable(e),
    };

    let status = if health.is_healthy { "ok" } else { "degraded" };
    (
        StatusCode::OK,
        Json(json!(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            queue: health,
            worker,
        })),
    )
}

/// JSON response body for `GET /stats`.
#[derive(Serialize)]
struct StatsResponse {
    queue: DetailedQueueStats,
    worker: WorkerStatus,
}

async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = match state.queue.get_detailed_queue_stats().await {
        Ok(s) => s,
        Err(e) => return store_unavailable(e),
    };
    let worker = match state.queue.get_worker_status().await {
        Ok(w) => w,
        Err(e) => return store_unavailable(e),
    };

    (
        StatusCode::OK,
        Json(json!(StatsResponse {
            queue: stats,
            worker,
        })),
    )
}

fn store_unavailable(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {
                "code": "store_unavailable",
                "message": e.to_string(),
            }
        })),
    )
}
