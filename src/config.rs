use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Default retry budget stamped onto new tasks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Worker sleep between empty claim attempts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Tasks in `processing` older than this are presumed abandoned.
    /// Must exceed realistic provider latency with margin.
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_secs: u64,
    /// Cadence of the stuck-task sweep, coarser than the poll interval.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Completed tasks older than this are eligible for cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// When true, failed retries are deferred by an exponential delay
    /// instead of being rescheduled immediately.
    #[serde(default)]
    pub retry_backoff: bool,
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            poll_interval_secs: 5,
            stuck_timeout_secs: 1800,
            sweep_interval_secs: 300,
            retention_days: 7,
            retry_backoff: false,
            retry_backoff_base_secs: 30,
        }
    }
}

fn default_max_attempts() -> i64 {
    3
}
fn default_poll_interval() -> u64 {
    5
}
fn default_stuck_timeout() -> u64 {
    1800
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_retention_days() -> u64 {
    7
}
fn default_backoff_base() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Pending backlog above this is reported as an issue.
    #[serde(default = "default_max_pending")]
    pub max_pending: i64,
    /// Oldest pending task above this age (seconds) is reported as an issue.
    #[serde(default = "default_max_pending_age")]
    pub max_pending_age_secs: i64,
    /// 24h failure rate above this fraction is reported as an issue.
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_pending: 100,
            max_pending_age_secs: 3600,
            max_failure_rate: 0.25,
        }
    }
}

fn default_max_pending() -> i64 {
    100
}
fn default_max_pending_age() -> i64 {
    3600
}
fn default_max_failure_rate() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_provider_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_provider_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7343".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate queue
    if config.queue.max_attempts < 1 {
        anyhow::bail!("queue.max_attempts must be >= 1");
    }
    if config.queue.poll_interval_secs == 0 {
        anyhow::bail!("queue.poll_interval_secs must be > 0");
    }
    if config.queue.stuck_timeout_secs == 0 {
        anyhow::bail!("queue.stuck_timeout_secs must be > 0");
    }

    // Validate health thresholds
    if config.health.max_pending < 1 {
        anyhow::bail!("health.max_pending must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.health.max_failure_rate) {
        anyhow::bail!("health.max_failure_rate must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}
