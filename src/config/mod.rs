//! Typed configuration from environment variables.
//!
//! Loaded once at startup; missing required variables fail fast. Tokens and
//! the database URL are wrapped in `SecretString` so they never reach logs.

pub mod secrets;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Settings for `taskq serve`.
#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Bearer token allowed to mutate tasks.
    pub api_token: SecretString,
    /// Optional bearer token limited to reads.
    pub read_token: Option<SecretString>,
    pub bind: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            api_token: SecretString::from(required_var("TASKQ_API_TOKEN")?),
            read_token: optional_var("TASKQ_READ_TOKEN").map(SecretString::from),
            bind: optional_var("TASKQ_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: log_level(),
        })
    }
}

/// Settings for `taskq worker`.
#[derive(Debug)]
pub struct WorkerConfig {
    pub server_url: String,
    pub api_token: SecretString,
    pub worker_name: String,
    pub handlers_dir: PathBuf,
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
    pub update_interval: Duration,
    pub labels: Vec<String>,
    pub stop_file: PathBuf,
    pub request_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_url: required_var("TASKQ_SERVER_URL")?,
            api_token: SecretString::from(required_var("TASKQ_API_TOKEN")?),
            worker_name: required_var("TASKQ_WORKER_NAME")?,
            handlers_dir: optional_var("TASKQ_HANDLERS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("handlers")),
            work_dir: optional_var("TASKQ_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("taskq-runs")),
            poll_interval: secs_var("TASKQ_POLL_INTERVAL_SECS", 10)?,
            update_interval: secs_var("TASKQ_UPDATE_INTERVAL_SECS", 20)?,
            labels: optional_var("TASKQ_WORKER_LABELS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            stop_file: optional_var("TASKQ_STOP_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./taskq-stop")),
            request_timeout: secs_var("TASKQ_REQUEST_TIMEOUT_SECS", 30)?,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: log_level(),
        })
    }
}

/// Settings for the operator commands, which only talk to the Control API.
#[derive(Debug)]
pub struct ClientConfig {
    pub server_url: String,
    pub api_token: SecretString,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_url: required_var("TASKQ_SERVER_URL")?,
            api_token: SecretString::from(required_var("TASKQ_API_TOKEN")?),
            request_timeout: secs_var("TASKQ_REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    match optional_var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("{name} must be a whole number of seconds, got {v:?}"))),
    }
}

fn log_level() -> String {
    optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string())
}
