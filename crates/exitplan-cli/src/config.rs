//! Configuration loading from TOML files

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use exitplan_core::{PlanConfig, Signal, default_signals};
use serde::Deserialize;

/// Global configuration for exitplan
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub plan: PlanSection,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanSection {
    pub grade_period_secs: u64,
    pub timeout_secs: u64,
    pub signals: Vec<Signal>,
    pub max_concurrency: Option<usize>,
    /// Process exit code used when the shutdown deadline passes
    pub force_exit_code: i32,
}

impl Default for PlanSection {
    fn default() -> Self {
        let defaults = PlanConfig::default();
        Self {
            grade_period_secs: defaults.grade_period.as_secs(),
            timeout_secs: defaults.timeout.as_secs(),
            signals: default_signals(),
            max_concurrency: None,
            force_exit_code: 0,
        }
    }
}

impl PlanSection {
    pub fn to_plan_config(&self) -> PlanConfig {
        PlanConfig {
            signals: self.signals.clone(),
            grade_period: Duration::from_secs(self.grade_period_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            max_concurrency: self.max_concurrency,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8855,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./exitplan.toml (current directory)
    /// 2. ~/.config/exitplan/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("exitplan.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "exitplan") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
