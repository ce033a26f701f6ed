//! fnbuild Core - Foundational Types
//!
//! Types shared by every build backend: the function model, target
//! platforms, builder configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod function;
pub mod platform;

// Re-export commonly used types
pub use config::{config_path, BuilderConfig};
pub use error::{FnError, Phase, PhaseContext, Result};
pub use function::{Env, Function, Volume};
pub use platform::Platform;

/// fnbuild version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
