//! Reading a written OCI image layout back from disk.

use std::path::{Path, PathBuf};

use fnbuild_core::error::{FnError, Phase, Result};
use oci_spec::image::{ImageIndex, ImageManifest};

use super::blob::{digest_hex, sha256_file};

/// A multi-platform OCI layout on disk.
#[derive(Debug)]
pub struct OciLayout {
    root_dir: PathBuf,
    index: ImageIndex,
}

/// One platform image listed in the index.
#[derive(Debug, Clone)]
pub struct LayoutImage {
    /// Manifest digest as listed in the index
    pub digest: String,
    /// `os/arch[/variant]`, when the index entry carries a platform
    pub platform: Option<String>,
    pub manifest: ImageManifest,
}

impl OciLayout {
    /// Open a layout, checking the required files exist and the index parses.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate(&root_dir)?;

        let index_path = root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            invalid(format!(
                "Failed to read index.json at {}: {}",
                index_path.display(),
                e
            ))
        })?;
        let index: ImageIndex = serde_json::from_str(&content)
            .map_err(|e| invalid(format!("Failed to parse index.json: {}", e)))?;

        Ok(Self { root_dir, index })
    }

    fn validate(root_dir: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(invalid(format!(
                    "Not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    pub fn index_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.root_dir.join("index.json"))?)
    }

    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.root_dir
            .join("blobs")
            .join("sha256")
            .join(digest_hex(digest))
    }

    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        std::fs::read(&path).map_err(|e| {
            invalid(format!("Failed to read blob {}: {}", path.display(), e))
        })
    }

    /// Every platform image in index order.
    pub fn images(&self) -> Result<Vec<LayoutImage>> {
        self.index
            .manifests()
            .iter()
            .map(|desc| {
                let digest = desc.digest().to_string();
                let data = self.read_blob(&digest)?;
                let manifest: ImageManifest = serde_json::from_slice(&data)
                    .map_err(|e| invalid(format!("Failed to parse manifest {}: {}", digest, e)))?;
                let platform = desc.platform().as_ref().map(|p| {
                    let mut s = format!("{}/{}", p.os(), p.architecture());
                    if let Some(variant) = p.variant() {
                        s.push('/');
                        s.push_str(variant);
                    }
                    s
                });
                Ok(LayoutImage {
                    digest,
                    platform,
                    manifest,
                })
            })
            .collect()
    }

    /// Check every blob reachable from the index exists and matches its
    /// digest. Returns the number of distinct blobs checked.
    pub fn verify(&self) -> Result<usize> {
        let mut digests: Vec<String> = Vec::new();
        for image in self.images()? {
            digests.push(image.digest.clone());
            digests.push(image.manifest.config().digest().to_string());
            for layer in image.manifest.layers() {
                digests.push(layer.digest().to_string());
            }
        }
        digests.sort();
        digests.dedup();

        for digest in &digests {
            let path = self.blob_path(digest);
            if !path.is_file() {
                return Err(invalid(format!("Missing blob {}", digest)));
            }
            let actual = sha256_file(&path)?;
            if actual != digest_hex(digest) {
                return Err(invalid(format!(
                    "Blob {} does not match its digest (found sha256:{})",
                    digest, actual
                )));
            }
        }
        tracing::debug!(blobs = digests.len(), path = %self.root_dir.display(), "Verified layout");
        Ok(digests.len())
    }
}

fn invalid(message: String) -> FnError {
    FnError::layout(Phase::Push, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildContext;
    use crate::oci::containerize::containerize;
    use crate::oci::containerize::tests::{two_platforms, FakeLayerBuilder};
    use fnbuild_core::Function;
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn built_layout(tmp: &TempDir) -> PathBuf {
        fs::write(tmp.path().join("handle.go"), "package function\n").unwrap();
        let ctx = BuildContext::new(
            CancellationToken::new(),
            Function::new(tmp.path(), "go"),
            two_platforms(),
            false,
        );
        containerize(&ctx, &FakeLayerBuilder).await.unwrap();
        ctx.oci_dir().unwrap()
    }

    #[test]
    fn test_open_missing_oci_layout_file() {
        let tmp = TempDir::new().unwrap();
        let err = OciLayout::open(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("oci-layout"));
    }

    #[test]
    fn test_open_missing_index() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
        let err = OciLayout::open(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("index.json"));
    }

    #[tokio::test]
    async fn test_open_built_layout() {
        let tmp = TempDir::new().unwrap();
        let layout = OciLayout::open(built_layout(&tmp).await).unwrap();

        let images = layout.images().unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].platform.as_deref(), Some("linux/amd64"));
        assert_eq!(images[1].platform.as_deref(), Some("linux/arm64"));
        assert_eq!(images[0].manifest.layers().len(), 2);
    }

    #[tokio::test]
    async fn test_verify_counts_distinct_blobs() {
        let tmp = TempDir::new().unwrap();
        let layout = OciLayout::open(built_layout(&tmp).await).unwrap();
        // shared data layer is counted once
        assert_eq!(layout.verify().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_verify_detects_missing_blob() {
        let tmp = TempDir::new().unwrap();
        let layout = OciLayout::open(built_layout(&tmp).await).unwrap();
        let images = layout.images().unwrap();
        let config = images[0].manifest.config().digest().to_string();
        fs::remove_file(layout.blob_path(&config)).unwrap();

        let err = layout.verify().unwrap_err();
        assert!(err.to_string().contains("Missing blob"));
    }
}
