//! Function definitions as read from `func.yaml`.
//!
//! The builder treats a [`Function`] as read-only input: its source root,
//! runtime, declared environment, volumes and target image name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{FnError, Result};

/// Function definition file name.
pub const FUNCTION_FILE: &str = "func.yaml";

/// Private per-function data directory, relative to the function root.
pub const RUN_DATA_DIR: &str = ".func";

/// A named environment variable. Entries without a name are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Env {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Env {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
        }
    }

    /// `NAME=value` form, or `None` for an unnamed entry.
    pub fn key_value_pair(&self) -> Option<String> {
        let name = self.name.as_deref().filter(|n| !n.is_empty())?;
        Some(format!("{}={}", name, self.value.as_deref().unwrap_or("")))
    }
}

/// A volume mounted into the running function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildSpec {
    /// Replaces the language toolchain invocation, split on whitespace
    #[serde(skip_serializing_if = "String::is_empty")]
    pub build_command: String,
    /// Environment visible to the language toolchain at build time
    pub build_envs: Vec<Env>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunSpec {
    /// Environment baked into the image config
    pub envs: Vec<Env>,
    pub volumes: Vec<Volume>,
}

/// A function project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Function {
    /// Source root; not serialized
    #[serde(skip)]
    pub root: PathBuf,
    pub name: String,
    /// Language runtime, e.g. "go"
    pub runtime: String,
    /// Target image reference for push
    pub image: String,
    /// Invocation hint passed to scaffolding ("http" when empty)
    pub invoke: String,
    pub build: BuildSpec,
    pub run: RunSpec,
}

impl Function {
    pub fn new(root: impl Into<PathBuf>, runtime: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            runtime: runtime.into(),
            ..Default::default()
        }
    }

    /// Load `func.yaml` from a function root.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(FUNCTION_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            FnError::FunctionError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut function: Function = serde_yaml::from_str(&data)?;
        function.root = root.to_path_buf();
        if function.runtime.is_empty() {
            return Err(FnError::FunctionError(format!(
                "{} does not declare a runtime",
                path.display()
            )));
        }
        Ok(function)
    }

    /// Write `func.yaml` into the function root.
    pub fn write(&self) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        std::fs::write(self.root.join(FUNCTION_FILE), data)?;
        Ok(())
    }

    pub fn invoke_or_default(&self) -> &str {
        if self.invoke.is_empty() {
            "http"
        } else {
            &self.invoke
        }
    }

    /// `<root>/.func`
    pub fn data_dir(&self) -> PathBuf {
        self.root.join(RUN_DATA_DIR)
    }

    /// `<root>/.func/builds`
    pub fn builds_dir(&self) -> PathBuf {
        self.data_dir().join("builds")
    }

    /// Image volume paths, skipping volumes without a mount path.
    pub fn volume_paths(&self) -> Vec<String> {
        self.run
            .volumes
            .iter()
            .filter_map(|v| v.path.clone())
            .collect()
    }

    /// Deterministic hash of the function's source tree.
    ///
    /// Covers every path (sorted) and file body under the root except the
    /// private data directory and version control metadata.
    pub fn fingerprint(&self) -> Result<String> {
        if !self.root.is_dir() {
            return Err(FnError::FunctionError(format!(
                "function root {} is not a directory",
                self.root.display()
            )));
        }

        let mut hasher = Sha256::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name();
                name != RUN_DATA_DIR && name != ".git"
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                FnError::FunctionError(format!("Failed to walk function source: {}", e))
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| FnError::FunctionError(e.to_string()))?;
            let relative = relative.to_string_lossy().replace('\\', "/");

            let file_type = entry.file_type();
            if file_type.is_dir() {
                hasher.update(b"d:");
                hasher.update(relative.as_bytes());
                hasher.update([0u8]);
            } else if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())?;
                hasher.update(b"l:");
                hasher.update(relative.as_bytes());
                hasher.update([0u8]);
                hasher.update(target.to_string_lossy().as_bytes());
                hasher.update([0u8]);
            } else {
                let data = std::fs::read(entry.path())?;
                hasher.update(b"f:");
                hasher.update(relative.as_bytes());
                hasher.update([0u8]);
                hasher.update((data.len() as u64).to_le_bytes());
                hasher.update(&data);
            }
        }

        Ok(hex::encode(hasher.finalize()))
    }
}
