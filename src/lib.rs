//! # Embed Queue
//!
//! A durable, prioritized background task queue that decouples expensive
//! embedding-generation work from the request path of a markdown article
//! manager.
//!
//! Producers (article create/update/delete handlers) enqueue tasks; a
//! single long-running worker claims them in priority order, calls the
//! embedding provider, and writes vectors into the index. Retry,
//! stuck-task recovery, and health diagnostics keep the pipeline
//! observable without ever blocking an interactive request.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  enqueue   ┌───────────────┐  claim   ┌──────────┐
//! │ Producers │──────────▶ │    SQLite     │◀─────────│  Worker  │
//! │ (CRUD)    │            │ tasks + audit │  record  │   loop   │
//! └───────────┘            └──────┬────────┘──────────└────┬─────┘
//!                                 │                        │ embed
//!                   ┌─────────────┤                        ▼
//!                   ▼             ▼                  ┌──────────┐
//!              ┌─────────┐  ┌──────────┐             │ Provider │
//!              │   CLI   │  │   HTTP   │             │ (OpenAI/ │
//!              │ (embedq)│  │ /health  │             │  Ollama) │
//!              └─────────┘  └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! embedq init                     # create database
//! embedq enqueue <article-id>     # queue an embedding task
//! embedq worker                   # run the worker until Ctrl-C
//! embedq queue stats              # backlog and throughput
//! embedq queue health             # derived health signal
//! embedq serve                    # HTTP health/stats endpoints
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`queue`] | Enqueue, atomic claim, completion, cleanup, health |
//! | [`worker`] | Claim/process/complete worker loop |
//! | [`audit`] | Append-only audit log |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index storage |
//! | [`articles`] | Article source collaborator |
//! | [`server`] | HTTP health/stats server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod articles;
pub mod audit;
pub mod audit_cmd;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod server;
pub mod stats;
pub mod tasks_cmd;
pub mod worker;
