use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::export::health::DEFAULT_ADDR;
use crate::telemetry::DEFAULT_TOP_K;

/// Largest accepted `top_k`. Each offer scans every slot.
pub const MAX_TOP_K: usize = 1024;

/// Top-level configuration for the proctel agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Number of longest-lived processes retained. Default: 5.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// How often the report is logged. Default: 60s.
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,

    /// Event source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Which event source feeds the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Poll the proc filesystem.
    #[default]
    Procfs,
    /// Replay a recorded file of wire records.
    Replay,
}

/// Event source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source kind. Default: procfs.
    #[serde(default)]
    pub kind: SourceKind,

    /// Interval between `/proc` scans. Default: 250ms.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Recorded event file, required for the replay source.
    #[serde(default)]
    pub replay_path: PathBuf,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_report_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_health_addr() -> String {
    DEFAULT_ADDR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            top_k: default_top_k(),
            report_interval: default_report_interval(),
            source: SourceConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            poll_interval: default_poll_interval(),
            replay_path: PathBuf::new(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("loading config file {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            bail!("top_k must be positive");
        }

        if self.top_k > MAX_TOP_K {
            bail!("top_k must be at most {MAX_TOP_K}, got {}", self.top_k);
        }

        if self.report_interval.is_zero() {
            bail!("report_interval must be positive");
        }

        match self.source.kind {
            SourceKind::Procfs => {
                if self.source.poll_interval.is_zero() {
                    bail!("source.poll_interval must be positive");
                }
            }
            SourceKind::Replay => {
                if self.source.replay_path.as_os_str().is_empty() {
                    bail!("source.replay_path is required for the replay source");
                }
            }
        }

        if self.health.addr.is_empty() {
            bail!("health.addr is required");
        }

        Ok(())
    }
}
