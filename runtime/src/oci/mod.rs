//! OCI image layout support.
//!
//! Everything needed to turn a function into a multi-platform OCI image
//! layout and ship it to a registry.
//!
//! ```text
//! oci/
//! ├── oci-layout           {"imageLayoutVersion":"1.0.0"}
//! ├── index.json           one manifest per platform
//! └── blobs/
//!     └── sha256/
//!         ├── <data layer>     shared by every platform
//!         ├── <exec layer>     one per platform
//!         ├── <config>         one per platform
//!         └── <manifest>       one per platform
//! ```

pub mod blob;
pub mod containerize;
pub mod golang;
pub mod language;
pub mod layer;
pub mod layout;
pub mod manifest;
pub mod reference;
pub mod registry;

pub use blob::{sha256_bytes, sha256_file, BlobStore, DigestWriter};
pub use containerize::containerize;
pub use golang::GoLayerBuilder;
pub use language::{LayerBuilder, LayerBuilders};
pub use layer::{create_data_layer, create_exec_layer, Layer, LayerWriter};
pub use layout::{LayoutImage, OciLayout};
pub use manifest::{Descriptor, ImageConfig, ImageIndex, ImageManifest};
pub use reference::ImageReference;
pub use registry::{push_digest, PushProgress, Pusher, RegistryAuth};
