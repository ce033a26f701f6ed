//! fnbuild Runtime - daemonless OCI image builder for functions.
//!
//! Builds a function's source into a multi-platform OCI image layout under
//! its `.func/builds` directory without a container daemon, coordinating
//! concurrent builders through filesystem locks, and pushes the last
//! successful build to a registry.

#![allow(clippy::result_large_err)]

pub mod build;
pub mod oci;
pub mod scaffold;

// Re-export common types
pub use build::{BuildContext, BuildDirs, Builder, ProcessTable, SystemProcesses};
pub use oci::{BlobStore, Descriptor, ImageIndex, ImageReference, Layer, OciLayout};
pub use oci::{GoLayerBuilder, LayerBuilder, LayerBuilders};
pub use oci::{PushProgress, Pusher, RegistryAuth};
pub use scaffold::Scaffolder;

/// fnbuild Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
