//! Per-invocation build state.

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use fnbuild_core::{BuilderConfig, FnError, Function, Result};
use tokio_util::sync::CancellationToken;

/// State for a single `build` call.
///
/// Owns a copy of the function and configuration so nothing it reads can
/// change underneath a running build. The content hash is computed on first
/// use and cached.
#[derive(Debug)]
pub struct BuildContext {
    cancel: CancellationToken,
    function: Function,
    config: BuilderConfig,
    verbose: bool,
    hash: OnceLock<String>,
    timestamp: OnceLock<DateTime<Utc>>,
    scaffolded: bool,
}

impl BuildContext {
    pub fn new(
        cancel: CancellationToken,
        function: Function,
        config: BuilderConfig,
        verbose: bool,
    ) -> Self {
        Self {
            cancel,
            function,
            config,
            verbose,
            hash: OnceLock::new(),
            timestamp: OnceLock::new(),
            scaffolded: false,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Content hash of the function source.
    pub fn hash(&self) -> Result<&str> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let computed = self.function.fingerprint()?;
        Ok(self.hash.get_or_init(|| computed))
    }

    /// Build timestamp. Falls back to the configured fixed timestamp, then
    /// to the current time, if the coordinator has not pinned one.
    pub fn timestamp(&self) -> DateTime<Utc> {
        *self
            .timestamp
            .get_or_init(|| self.config.timestamp.unwrap_or_else(Utc::now))
    }

    /// Fix the timestamp used for every entry and document of this build.
    /// Has no effect once a timestamp has been observed.
    pub fn pin_timestamp(&self, timestamp: DateTime<Utc>) {
        let _ = self.timestamp.set(timestamp);
    }

    pub(crate) fn mark_scaffolded(&mut self) {
        self.scaffolded = true;
    }

    /// `<root>/.func/builds`
    pub fn builds_dir(&self) -> PathBuf {
        self.function.builds_dir()
    }

    /// `<root>/.func/builds/by-hash/<hash>`
    pub fn build_dir(&self) -> Result<PathBuf> {
        Ok(self.builds_dir().join("by-hash").join(self.hash()?))
    }

    /// OCI layout root inside the build directory.
    pub fn oci_dir(&self) -> Result<PathBuf> {
        Ok(self.build_dir()?.join("oci"))
    }

    /// Compiler output directory.
    pub fn result_dir(&self) -> Result<PathBuf> {
        Ok(self.build_dir()?.join("result"))
    }

    pub fn scaffolding_dir(&self) -> Result<PathBuf> {
        Ok(self.build_dir()?.join("scaffolding"))
    }

    /// Directory language builders compile from.
    pub fn source_dir(&self) -> Result<PathBuf> {
        if self.scaffolded {
            self.scaffolding_dir()
        } else {
            Ok(self.function.root.clone())
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(FnError::Cancelled)
        } else {
            Ok(())
        }
    }
}
