//! Configuration loaded from a YAML file.

use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::Level;

/// Errors that can occur when loading a [Config].
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid {0}: must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("retry_initial_ms ({0}) exceeds retry_max_ms ({1})")]
    InvalidRetry(u64, u64),
}

fn default_partition() -> String {
    "shorthash".into()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_retry_initial_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".into()
}

/// Configuration for the `shorthash` binary.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the registry partitions.
    pub storage_directory: PathBuf,

    /// Partition holding the registry journal.
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Ethereum JSON-RPC endpoint blocks are read from.
    pub rpc_url: String,

    /// Geth-style genesis file whose allocations are ingested before block 0.
    #[serde(default)]
    pub genesis: Option<PathBuf>,

    /// Address the read API listens on.
    pub listen: SocketAddr,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Stop ingesting once this block has been ingested.
    #[serde(default)]
    pub stop_at: Option<u64>,
}

impl Config {
    /// Read and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    fn validate(&self) -> Result<(), Error> {
        self.level()?;
        if self.poll_interval_ms == 0 {
            return Err(Error::ZeroInterval("poll_interval_ms"));
        }
        if self.retry_initial_ms == 0 {
            return Err(Error::ZeroInterval("retry_initial_ms"));
        }
        if self.retry_initial_ms > self.retry_max_ms {
            return Err(Error::InvalidRetry(
                self.retry_initial_ms,
                self.retry_max_ms,
            ));
        }
        Ok(())
    }

    /// Maximum level of emitted logs.
    pub fn level(&self) -> Result<Level, Error> {
        Level::from_str(&self.log_level).map_err(|_| Error::InvalidLogLevel(self.log_level.clone()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
