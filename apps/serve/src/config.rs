//! Server configuration, stored as TOML. Missing fields take defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_server::{DEFAULT_READ_INCREMENT, ServerConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory for staged uploads.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Socket and verification read size in bytes.
    #[serde(default = "default_read_increment")]
    pub read_increment: usize,

    /// Abort a connection after this many seconds without data.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Abort a connection that takes longer than this overall.
    #[serde(default)]
    pub transfer_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8005
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data_cache")
}

fn default_read_increment() -> usize {
    DEFAULT_READ_INCREMENT
}

fn default_idle_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            staging_dir: default_staging_dir(),
            read_increment: default_read_increment(),
            idle_timeout_secs: default_idle_timeout_secs(),
            transfer_timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads `path` if given, otherwise returns defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            read_increment: self.read_increment,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            transfer_timeout: self.transfer_timeout_secs.map(Duration::from_secs),
            ..ServerConfig::default()
        }
    }
}
