//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use rowpipe_core::{DEFAULT_BATCH_SIZE, DEFAULT_CAPACITY, LoopConfig, PipeConfig};

/// Global configuration for rowpipe
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub pipe: PipeSection,
    #[serde(rename = "loop")]
    pub run_loop: LoopSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub default_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PipeSection {
    pub capacity: usize,
    pub batch_size: usize,
    pub max_wait_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for PipeSection {
    fn default() -> Self {
        let defaults = PipeConfig::default();
        Self {
            capacity: DEFAULT_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_wait_ms: defaults.max_wait.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

impl PipeSection {
    pub fn pipe_config(&self) -> PipeConfig {
        PipeConfig::with_capacity(self.capacity)
            .max_wait(Duration::from_millis(self.max_wait_ms))
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LoopSection {
    /// No-progress budget; unset means wait indefinitely
    pub timeout_secs: Option<u64>,
    pub min_sleep_ms: u64,
    pub max_sleep_ms: u64,
}

impl Default for LoopSection {
    fn default() -> Self {
        let defaults = LoopConfig::default();
        Self {
            timeout_secs: None,
            min_sleep_ms: defaults.min_sleep.as_millis() as u64,
            max_sleep_ms: defaults.max_sleep.as_millis() as u64,
        }
    }
}

impl LoopSection {
    pub fn loop_config(&self, label: &str) -> LoopConfig {
        let mut config = LoopConfig::new(label);
        config.timeout = self.timeout_secs.map(Duration::from_secs);
        config.min_sleep = Duration::from_millis(self.min_sleep_ms);
        config.max_sleep = Duration::from_millis(self.max_sleep_ms.max(self.min_sleep_ms));
        config
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./rowpipe.toml (current directory)
    /// 2. ~/.config/rowpipe/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("rowpipe.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "rowpipe") {
            let user_config = dirs.config_dir().join("config.toml");
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
