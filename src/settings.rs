use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::fixture::AutoIncrementParams;

/// Optional file-level configuration. Everything here has a default so the
/// CLI runs without a config file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Fixed waits used by the scenarios.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Wait after setting a global variable before a new connection is
    /// guaranteed to observe it.
    #[serde(default = "default_global_settle_ms")]
    pub global_settle_ms: u64,
    /// Wait on each side of the schema change in a race window.
    #[serde(default = "default_race_settle_ms")]
    pub race_settle_ms: u64,
    /// Wait after creating the fixture table before the first equality check.
    #[serde(default = "default_table_settle_ms")]
    pub table_settle_ms: u64,
    /// Sleep between two "not equal yet" oracle answers.
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
    /// Give up waiting for convergence after this long.
    #[serde(default = "default_convergence_deadline_ms")]
    pub convergence_deadline_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_global_settle_ms() -> u64 {
    3_000
}

fn default_race_settle_ms() -> u64 {
    1_000
}

fn default_table_settle_ms() -> u64 {
    6_000
}

fn default_poll_backoff_ms() -> u64 {
    10_000
}

fn default_convergence_deadline_ms() -> u64 {
    60 * 60 * 1_000
}

fn default_read_timeout_ms() -> u64 {
    60_000
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            global_settle_ms: default_global_settle_ms(),
            race_settle_ms: default_race_settle_ms(),
            table_settle_ms: default_table_settle_ms(),
            poll_backoff_ms: default_poll_backoff_ms(),
            convergence_deadline_ms: default_convergence_deadline_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Timing {
    pub fn global_settle(&self) -> Duration {
        Duration::from_millis(self.global_settle_ms)
    }

    pub fn race_settle(&self) -> Duration {
        Duration::from_millis(self.race_settle_ms)
    }

    pub fn table_settle(&self) -> Duration {
        Duration::from_millis(self.table_settle_ms)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    pub fn convergence_deadline(&self) -> Duration {
        Duration::from_millis(self.convergence_deadline_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Where and how to connect to one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Label used in logs, e.g. `db1`.
    pub label: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Pool size. Scenarios set this to the worker count.
    pub max_connections: usize,
    pub read_timeout: Duration,
    /// Applied to every new connection when set.
    pub session_params: Option<AutoIncrementParams>,
}

impl EndpointConfig {
    pub fn new(label: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            label: label.into(),
            user: "root".to_string(),
            password: String::new(),
            host: host.into(),
            port,
            database: "test".to_string(),
            max_connections: 1,
            read_timeout: Duration::from_millis(default_read_timeout_ms()),
            session_params: None,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_max_connections(&self, max_connections: usize) -> Self {
        Self {
            max_connections,
            ..self.clone()
        }
    }

    pub fn with_session_params(&self, params: Option<AutoIncrementParams>) -> Self {
        Self {
            session_params: params,
            ..self.clone()
        }
    }
}
