use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use encounter_engine::EngineConfig;
use encounter_engine::config::millis_serde;
use encounter_radio::RadioConfig;
use serde::{Deserialize, Serialize};

use crate::logging::DEFAULT_FILTER;

/// Settings for the simulation binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub engine: EngineConfig,
    pub radio: RadioConfig,
    /// How many nodes share the simulated air.
    pub simulated_peers: usize,
    /// How long to run before stopping every engine.
    #[serde(with = "millis_serde")]
    pub run_for: Duration,
    /// Text each node sends to the peers it meets.
    pub greeting: String,
    pub logging: LogSettings,
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log directory. Defaults to `~/.encounter/logs/`.
    pub dir: Option<PathBuf>,
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also print records to the terminal.
    pub console: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            filter: DEFAULT_FILTER.into(),
            console: true,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            radio: RadioConfig::default(),
            simulated_peers: 3,
            run_for: Duration::from_secs(20),
            greeting: "hello".into(),
            logging: LogSettings::default(),
        }
    }
}

impl AppSettings {
    /// Returns the base directory: `~/.encounter/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".encounter"))
    }

    /// Returns the settings file path: `~/.encounter/settings.json`
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("settings.json"))
    }

    /// Returns the logs directory: `~/.encounter/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Load settings from `path`, writing defaults there first if the file
    /// does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            let settings = Self::default();
            settings.save_to_path(path)?;
            Ok(settings)
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }
}
