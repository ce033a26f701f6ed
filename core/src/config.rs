use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FnError, Result};
use crate::platform::Platform;

/// File name of the user-level builder configuration.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Port every function image exposes.
pub const DEFAULT_PORT: u16 = 8080;

/// Builder configuration
///
/// Values are fixed for the duration of a build; the coordinator copies them
/// into each build context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuilderConfig {
    /// Platforms to build, in index order
    pub platforms: Vec<Platform>,

    /// File and directory names excluded from the data layer
    pub ignored: Vec<String>,

    /// Go toolchain binary
    pub go_binary: String,

    /// TCP port declared in the image config
    pub exposed_port: u16,

    /// Fixed build timestamp (overrides the per-build stamp)
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            platforms: Platform::defaults(),
            ignored: default_ignored(),
            go_binary: std::env::var("FUNC_GO_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "go".to_string()),
            exposed_port: DEFAULT_PORT,
            timestamp: source_date_epoch(),
        }
    }
}

impl BuilderConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            FnError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: BuilderConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            platforms = config.platforms.len(),
            "Loaded builder config"
        );
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No builder config, using defaults");
            Ok(Self::default())
        }
    }

    /// Write configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_yaml::to_string(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.iter().any(|i| i == name)
    }

    fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(FnError::ConfigError(
                "at least one platform must be configured".to_string(),
            ));
        }
        if self.go_binary.trim().is_empty() {
            return Err(FnError::ConfigError("goBinary may not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_ignored() -> Vec<String> {
    [".git", ".func", ".funcignore", ".gitignore"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Reproducible-builds timestamp, when `SOURCE_DATE_EPOCH` is set.
fn source_date_epoch() -> Option<DateTime<Utc>> {
    let secs: i64 = std::env::var("SOURCE_DATE_EPOCH").ok()?.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Path of the user-level config file.
///
/// `$XDG_CONFIG_HOME/fnbuild` takes precedence over `~/.config/fnbuild`; with
/// neither available the relative `.config/fnbuild` is used.
pub fn config_path() -> PathBuf {
    let dir = if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        PathBuf::from(xdg).join("fnbuild")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join("fnbuild")
    } else {
        PathBuf::from(".config").join("fnbuild")
    };
    dir.join(CONFIG_FILENAME)
}
