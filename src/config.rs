use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::util::duration_secs;
use crate::{Error, Result};

/// Orchestrator settings, read once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers in the pool.
    pub max_concurrent_tasks: usize,
    /// Deadline applied to a task when the submitter gives none.
    #[serde(with = "duration_secs")]
    pub task_timeout: Duration,
    /// Fixed pause before a failed task is queued again.
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    /// Period of the health supervisor.
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,
    /// Deadline for a single agent health probe.
    #[serde(with = "duration_secs")]
    pub health_probe_timeout: Duration,
    /// Queue depth above which a health cycle logs a warning.
    pub queue_depth_warning: usize,
    /// Retry budget applied when the submitter gives none.
    pub default_max_retries: u32,
    /// Bounded wait of a worker asking for its next task.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Register the built-in workflow templates on start.
    pub load_builtin_templates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            task_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(60),
            health_probe_timeout: Duration::from_secs(5),
            queue_depth_warning: 100,
            default_max_retries: 3,
            poll_interval: Duration::from_secs(1),
            load_builtin_templates: true,
        }
    }
}

impl Config {
    pub fn wagon_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".wagon"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::wagon_dir()?.join("wagon.toml"))
    }

    /// Load from `~/.wagon/wagon.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            task_timeout = ?config.task_timeout,
            retry_delay = ?config.retry_delay,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_toml()?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Validation(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::Validation(
                "health_check_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
