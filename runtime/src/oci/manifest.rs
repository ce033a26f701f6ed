//! OCI image documents written into the layout.
//!
//! Only the fields this builder emits are modelled. Maps are `BTreeMap` so
//! serialized output is byte-stable between builds.

use std::collections::BTreeMap;

use fnbuild_core::Platform;
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Contents of the `oci-layout` marker file.
pub const OCI_LAYOUT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Reference to a blob in the layout's blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    /// `sha256:<hex>`
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Hex portion of the digest, i.e. the blob's file name.
    pub fn hex(&self) -> &str {
        self.digest.strip_prefix("sha256:").unwrap_or(&self.digest)
    }
}

/// JSON `{}` used as the value of OCI set-like maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub typ: String,
    pub diff_ids: Vec<String>,
}

/// Execution parameters of the image (`config` object in the config blob).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub exposed_ports: BTreeMap<String, Empty>,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub stop_signal: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Empty>,
}

/// Image configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub created: String,
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub config: ContainerConfig,
    pub rootfs: RootFs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_MANIFEST.to_string(),
            config,
            layers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_INDEX.to_string(),
            manifests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(digest: &str) -> Descriptor {
        Descriptor {
            media_type: MEDIA_TYPE_LAYER.to_string(),
            digest: digest.to_string(),
            size: 10,
            platform: None,
        }
    }

    #[test]
    fn test_descriptor_hex() {
        assert_eq!(descriptor("sha256:abc").hex(), "abc");
        assert_eq!(descriptor("abc").hex(), "abc");
    }

    #[test]
    fn test_descriptor_json_field_names() {
        let mut d = descriptor("sha256:abc");
        d.platform = Some(Platform::new("linux", "arm").with_variant("v7"));
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value["mediaType"], MEDIA_TYPE_LAYER);
        assert_eq!(value["platform"]["architecture"], "arm");
        assert_eq!(value["platform"]["variant"], "v7");
    }

    #[test]
    fn test_config_json_field_names() {
        let mut volumes = BTreeMap::new();
        volumes.insert("/data".to_string(), Empty {});
        let mut ports = BTreeMap::new();
        ports.insert("8080/tcp".to_string(), Empty {});

        let config = ImageConfig {
            created: "2024-01-01T00:00:00Z".to_string(),
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            variant: None,
            config: ContainerConfig {
                exposed_ports: ports,
                env: vec!["A=1".to_string()],
                cmd: vec!["/func/f".to_string()],
                working_dir: "/func/".to_string(),
                stop_signal: "SIGKILL".to_string(),
                volumes,
            },
            rootfs: RootFs {
                typ: "layers".to_string(),
                diff_ids: vec!["sha256:00".to_string()],
            },
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["config"]["Cmd"][0], "/func/f");
        assert_eq!(value["config"]["WorkingDir"], "/func/");
        assert_eq!(value["config"]["StopSignal"], "SIGKILL");
        assert!(value["config"]["ExposedPorts"]["8080/tcp"].is_object());
        assert!(value["config"]["Volumes"]["/data"].is_object());
        assert_eq!(value["rootfs"]["type"], "layers");
        assert!(value.get("variant").is_none());
    }

    #[test]
    fn test_manifest_and_index_schema() {
        let manifest = ImageManifest::new(descriptor("sha256:c"), vec![descriptor("sha256:l")]);
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], MEDIA_TYPE_MANIFEST);

        let index = ImageIndex::new(vec![]);
        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], MEDIA_TYPE_INDEX);
    }
}
