//! Target platforms for multi-platform images.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FnError;

/// An (OS, architecture, variant) triple identifying one image in an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// The platform set built when none is configured.
    pub fn defaults() -> Vec<Platform> {
        vec![
            Platform::new("linux", "amd64"),
            Platform::new("linux", "arm64"),
            Platform::new("linux", "arm").with_variant("v6"),
            Platform::new("linux", "arm").with_variant("v7"),
            Platform::new("darwin", "amd64"),
            Platform::new("darwin", "arm64"),
        ]
    }

    /// Platform of the running host, using OCI architecture names.
    pub fn host() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        Platform::new(os, arch)
    }

    /// Dotted form used for file names, e.g. `linux.arm.v7`.
    pub fn file_suffix(&self) -> String {
        match &self.variant {
            Some(v) => format!("{}.{}.{}", self.os, self.architecture, v),
            None => format!("{}.{}", self.os, self.architecture),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.architecture, v),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}

impl FromStr for Platform {
    type Err = FnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(FnError::ConfigError(format!(
                "invalid platform '{}': expected os/arch[/variant]",
                s
            )));
        }
        match parts.as_slice() {
            [os, arch] => Ok(Platform::new(*os, *arch)),
            [os, arch, variant] => Ok(Platform::new(*os, *arch).with_variant(*variant)),
            _ => Err(FnError::ConfigError(format!(
                "invalid platform '{}': expected os/arch[/variant]",
                s
            ))),
        }
    }
}
