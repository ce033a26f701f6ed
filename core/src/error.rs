use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a build or push at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    DataLayer,
    ExecLayer,
    Config,
    Manifest,
    Index,
    LastPointer,
    Teardown,
    Push,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::DataLayer => "data layer",
            Phase::ExecLayer => "exec layer",
            Phase::Config => "config",
            Phase::Manifest => "manifest",
            Phase::Index => "index",
            Phase::LastPointer => "last pointer",
            Phase::Teardown => "teardown",
            Phase::Push => "push",
        };
        f.write_str(name)
    }
}

/// fnbuild error types
#[derive(Error, Debug)]
pub enum FnError {
    /// Another live process holds the advisory lock for this content hash
    #[error("Build in progress: {hash} is being built by process {pid}")]
    BuildInProgress { hash: String, pid: u32 },

    /// No layer builder is registered for the function's runtime
    #[error("{message}")]
    UnsupportedRuntime { runtime: String, message: String },

    /// Filesystem or encoding failure while writing the image layout
    #[error("Build failed during {phase}: {message}")]
    Layout { phase: Phase, message: String },

    /// The language toolchain exited unsuccessfully
    #[error("Compilation for {platform} failed: {message}")]
    CompileFailed { platform: String, message: String },

    /// Push was requested before any successful build
    #[error("No prior build found at {}. Has the function been built?", path.display())]
    NoBuildFound { path: PathBuf },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// The function definition could not be loaded or is incomplete
    #[error("Function error: {0}")]
    FunctionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl FnError {
    /// Build a layout error tagged with the failing phase.
    pub fn layout(phase: Phase, message: impl Into<String>) -> Self {
        FnError::Layout {
            phase,
            message: message.into(),
        }
    }

    /// Whether this failure is worth retrying without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FnError::BuildInProgress { .. } | FnError::RegistryError { .. } | FnError::Cancelled
        )
    }

    pub fn is_build_in_progress(&self) -> bool {
        matches!(self, FnError::BuildInProgress { .. })
    }

    /// The phase a layout error was raised in, if known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            FnError::Layout { phase, .. } => Some(*phase),
            FnError::CompileFailed { .. } => Some(Phase::ExecLayer),
            FnError::RegistryError { .. } => Some(Phase::Push),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FnError {
    fn from(err: serde_json::Error) -> Self {
        FnError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for FnError {
    fn from(err: serde_yaml::Error) -> Self {
        FnError::SerializationError(err.to_string())
    }
}

/// Result type alias for fnbuild operations
pub type Result<T> = std::result::Result<T, FnError>;

/// Tags filesystem and encoding failures with the phase they occurred in.
///
/// Errors of any other kind pass through unchanged so callers can still
/// branch on them.
pub trait PhaseContext<T> {
    fn during(self, phase: Phase) -> Result<T>;
}

impl<T> PhaseContext<T> for Result<T> {
    fn during(self, phase: Phase) -> Result<T> {
        self.map_err(|e| match e {
            FnError::IoError(err) => FnError::layout(phase, err.to_string()),
            FnError::SerializationError(msg) => FnError::layout(phase, msg),
            other => other,
        })
    }
}

impl<T> PhaseContext<T> for std::io::Result<T> {
    fn during(self, phase: Phase) -> Result<T> {
        self.map_err(|e| FnError::layout(phase, e.to_string()))
    }
}
