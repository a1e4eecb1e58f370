//! Configuration file support.
//!
//! Two configuration file locations are consulted:
//! - Global: `~/.cairn/config.toml` - User-wide defaults
//! - Project: `.cairn/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Directory name used for both the global and the project configuration.
pub const CONFIG_DIR: &str = ".cairn";

/// Build orchestration configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build cache settings
    pub cache: CacheConfig,

    /// Execution settings
    pub build: BuildConfig,
}

/// Build cache settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether builders run through the cache (default: true)
    pub enabled: Option<bool>,

    /// Cache directory (default: `.cairn/cache` under the project root)
    pub dir: Option<PathBuf>,
}

/// Execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build output root (default: `target` under the project root)
    pub target_dir: Option<PathBuf>,

    /// Run independent builders concurrently (default: false)
    pub parallel: Option<bool>,

    /// Number of worker threads for parallel runs (None = auto-detect)
    pub jobs: Option<usize>,

    /// Show a progress bar while building (default: false)
    pub progress: Option<bool>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file is missing
    /// or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).with_context(|| "failed to serialize config")?;
        crate::util::fs::write_atomic(path, contents.as_bytes())
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.cache.enabled.is_some() {
            self.cache.enabled = other.cache.enabled;
        }
        if other.cache.dir.is_some() {
            self.cache.dir = other.cache.dir;
        }
        if other.build.target_dir.is_some() {
            self.build.target_dir = other.build.target_dir;
        }
        if other.build.parallel.is_some() {
            self.build.parallel = other.build.parallel;
        }
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.progress.is_some() {
            self.build.progress = other.build.progress;
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.enabled.unwrap_or(true)
    }

    pub fn parallel(&self) -> bool {
        self.build.parallel.unwrap_or(false)
    }

    pub fn progress(&self) -> bool {
        self.build.progress.unwrap_or(false)
    }

    /// Cache directory, resolved against the project root when relative.
    pub fn cache_dir(&self, project_root: &Path) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => project_root.join(dir),
            None => project_root.join(CONFIG_DIR).join("cache"),
        }
    }

    /// Target directory, resolved against the project root when relative.
    pub fn target_dir(&self, project_root: &Path) -> PathBuf {
        match &self.build.target_dir {
            Some(dir) => project_root.join(dir),
            None => project_root.join("target"),
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.cairn/config.toml)
/// 2. Global config (~/.cairn/config.toml)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }

    config.merge(Config::load_or_default(project_path));

    config
}

/// Get the global config directory (~/.cairn).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(CONFIG_DIR))
}

/// Get the global config path (~/.cairn/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.cairn/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_DIR).join("config.toml")
}
