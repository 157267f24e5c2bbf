//! Upload client configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/ferry/upload.toml`
//! - Windows: `%APPDATA%/ferry/upload.toml`
//!
//! Every field is optional; command-line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_client::{RetryPolicy, TransportConfig, WorkerConfig};
use ferry_transfer::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Chunk payload size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Resume state file (`~/` is expanded).
    #[serde(default = "default_resume_file")]
    pub resume_file: String,

    /// Attempts per chunk before the file is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// How often aggregate progress is logged.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Forget a file's resume entry once it is fully uploaded.
    #[serde(default)]
    pub prune_completed: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8005
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_resume_file() -> String {
    "./history.json".into()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    250
}

fn default_max_retry_delay_ms() -> u64 {
    15_000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_response_timeout_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            chunk_size: default_chunk_size(),
            resume_file: default_resume_file(),
            max_attempts: default_max_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            prune_completed: false,
        }
    }
}

impl Config {
    /// Loads `explicit` if given (it must exist), else the platform file if
    /// present, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_path();
                if !path.exists() {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            chunk_size: self.chunk_size,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
                ..RetryPolicy::default()
            },
            prune_completed: self.prune_completed,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            ..TransportConfig::default()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ferry").join("upload.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("ferry")
            .join("upload.toml")
    }
}
