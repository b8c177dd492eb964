use std::time::Duration;

use crate::error::{AppError, Result};

pub const TENNIS_VENUES_URL: &str = "https://www.tennisvenues.com.au";
pub const SQUARESPACE_URL: &str = "https://app.squarespacescheduling.com";

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Size of one coverage unit; every window duration must be a multiple of it.
pub const SLOT_MINUTES: u32 = 30;

/// Channel capacity between the orchestrator and the background writer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// How orchestrated results reach the partition writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// One `replace_partitions` call per sport after every task has finished.
    Batch,
    /// Each completed task is written as soon as it finishes.
    PerTask,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Path to the JSON venue registry (VENUES_PATH)
    pub venues_path: String,
    /// Admission gate size (MAX_CONCURRENT_FETCHES)
    pub max_concurrent: usize,
    /// Cool-down each task holds its slot for after finishing (POLITENESS_DELAY_MS)
    pub politeness_delay: Duration,
    /// Minimum spacing between request starts against one host (HOST_MIN_INTERVAL_MS)
    pub host_min_interval: Duration,
    /// Upper bound for a single adapter call (FETCH_TIMEOUT_SECS)
    pub fetch_timeout: Duration,
    /// Dates fetched per venue, starting today (DAYS_TO_SCRAPE)
    pub days_to_scrape: u32,
    /// Window durations emitted by the expander (SLOT_DURATIONS, comma-separated minutes)
    pub slot_durations: Vec<u32>,
    pub write_mode: WriteMode,
    /// Seconds between ingestion cycles; 0 runs a single cycle at startup (INGEST_INTERVAL_SECS)
    pub ingest_interval_secs: u64,
    pub user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "availability.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            venues_path: std::env::var("VENUES_PATH").unwrap_or_else(|_| "venues.json".to_string()),
            max_concurrent: std::env::var("MAX_CONCURRENT_FETCHES")
                .unwrap_or_else(|_| "2".to_string())
                .parse::<usize>()
                .unwrap_or(2),
            politeness_delay: Duration::from_millis(
                std::env::var("POLITENESS_DELAY_MS")
                    .unwrap_or_else(|_| "4000".to_string())
                    .parse::<u64>()
                    .unwrap_or(4000),
            ),
            host_min_interval: Duration::from_millis(
                std::env::var("HOST_MIN_INTERVAL_MS")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse::<u64>()
                    .unwrap_or(0),
            ),
            fetch_timeout: Duration::from_secs(
                std::env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse::<u64>()
                    .unwrap_or(10),
            ),
            days_to_scrape: std::env::var("DAYS_TO_SCRAPE")
                .unwrap_or_else(|_| "28".to_string())
                .parse::<u32>()
                .unwrap_or(28),
            slot_durations: parse_durations(
                &std::env::var("SLOT_DURATIONS").unwrap_or_else(|_| "30,60,90,120".to_string()),
            )?,
            write_mode: parse_write_mode(
                &std::env::var("WRITE_MODE").unwrap_or_else(|_| "batch".to_string()),
            )?,
            ingest_interval_secs: std::env::var("INGEST_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u64>()
                .unwrap_or(0),
            user_agent: std::env::var("USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(AppError::Config(
                "MAX_CONCURRENT_FETCHES must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(AppError::Config("FETCH_TIMEOUT_SECS must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "availability.db".to_string(),
            api_port: 3000,
            venues_path: "venues.json".to_string(),
            max_concurrent: 2,
            politeness_delay: Duration::from_millis(4000),
            host_min_interval: Duration::ZERO,
            fetch_timeout: Duration::from_secs(10),
            days_to_scrape: 28,
            slot_durations: vec![30, 60, 90, 120],
            write_mode: WriteMode::Batch,
            ingest_interval_secs: 0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Parse `SLOT_DURATIONS`. Every entry must be a positive multiple of 30.
pub fn parse_durations(raw: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let minutes = part
            .parse::<u32>()
            .map_err(|_| AppError::Config(format!("SLOT_DURATIONS entry `{part}` is not a number")))?;
        if minutes == 0 || minutes % SLOT_MINUTES != 0 {
            return Err(AppError::Config(format!(
                "SLOT_DURATIONS entry {minutes} must be a positive multiple of {SLOT_MINUTES}"
            )));
        }
        if !out.contains(&minutes) {
            out.push(minutes);
        }
    }
    if out.is_empty() {
        return Err(AppError::Config("SLOT_DURATIONS must not be empty".to_string()));
    }
    out.sort_unstable();
    Ok(out)
}

fn parse_write_mode(raw: &str) -> Result<WriteMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "batch" => Ok(WriteMode::Batch),
        "per_task" | "per-task" => Ok(WriteMode::PerTask),
        other => Err(AppError::Config(format!(
            "WRITE_MODE must be `batch` or `per_task`, got `{other}`"
        ))),
    }
}
