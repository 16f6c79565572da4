//! LoadGate configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;

/// Main LoadGate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator timing
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.min_display_ms == 0 {
            return Err(eyre::eyre!("coordinator.min-display-ms must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration
    ///
    /// An explicit path must load. Otherwise the first readable file from
    /// [`search_paths`](Self::search_paths) is used, or defaults if none is.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }
        Ok(Self::load_first(&Self::search_paths()))
    }

    /// `./loadgate.yml`, then `loadgate/loadgate.yml` in the user config directory
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("loadgate.yml")];
        paths.extend(dirs::config_dir().map(|dir| dir.join("loadgate").join("loadgate.yml")));
        paths
    }

    fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), "Skipping unreadable config: {:#}", e),
            }
        }
        tracing::info!("No config file found, using defaults");
        Self::default()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
