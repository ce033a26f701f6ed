//! Pushing a built OCI layout to a container registry.
//!
//! Uses the `oci-distribution` client. Blobs and manifests go out exactly as
//! stored in the layout: config and layer blobs first, then each platform
//! manifest by digest, then `index.json` to the function's tag.

use std::path::Path;

use fnbuild_core::error::{FnError, Phase, Result};
use fnbuild_core::Function;
use http::HeaderValue;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::blob::sha256_bytes;
use super::layout::OciLayout;
use super::manifest::{MEDIA_TYPE_INDEX, MEDIA_TYPE_MANIFEST};
use super::reference::ImageReference;
use crate::build::dirs::BuildDirs;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, falling back to
    /// anonymous unless both are set.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Bytes transmitted so far out of the layout's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushProgress {
    pub complete: u64,
    pub total: u64,
}

/// One platform image ready to send, as stored in the layout.
struct PlannedImage {
    platform: Option<String>,
    digest: String,
    manifest: Vec<u8>,
}

/// Everything a push sends, read from a layout without rewriting any of it.
struct PushPlan {
    /// Distinct config and layer blobs as `(digest, size)`, in first-use order
    blobs: Vec<(String, u64)>,
    images: Vec<PlannedImage>,
    index: Vec<u8>,
    index_digest: String,
    total: u64,
}

impl PushPlan {
    fn from_layout(layout: &OciLayout) -> Result<Self> {
        let mut blobs: Vec<(String, u64)> = Vec::new();
        let mut images = Vec::new();
        let mut total = 0u64;

        for image in layout.images()? {
            let manifest = layout.read_blob(&image.digest)?;
            if format!("sha256:{}", sha256_bytes(&manifest)) != image.digest {
                return Err(FnError::layout(
                    Phase::Push,
                    format!("Manifest {} does not match its digest", image.digest),
                ));
            }

            let config = image.manifest.config();
            let referenced = std::iter::once(config).chain(image.manifest.layers());
            for desc in referenced {
                let digest = desc.digest().to_string();
                if blobs.iter().any(|(d, _)| *d == digest) {
                    continue;
                }
                let size = desc.size().max(0) as u64;
                total += size;
                blobs.push((digest, size));
            }

            total += manifest.len() as u64;
            images.push(PlannedImage {
                platform: image.platform,
                digest: image.digest,
                manifest,
            });
        }

        let index = layout.index_bytes()?;
        total += index.len() as u64;
        Ok(Self {
            blobs,
            images,
            index_digest: format!("sha256:{}", sha256_bytes(&index)),
            index,
            total,
        })
    }
}

/// Pushes the last successful build of a function.
pub struct Pusher {
    client: Client,
    auth: RegistryAuth,
    progress: Option<mpsc::Sender<PushProgress>>,
}

impl Pusher {
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    pub fn with_auth(auth: RegistryAuth) -> Self {
        Self::with_protocol(auth, ClientProtocol::Https)
    }

    /// Talk plain HTTP to the registry, e.g. a local test registry.
    pub fn insecure(auth: RegistryAuth) -> Self {
        Self::with_protocol(auth, ClientProtocol::Http)
    }

    fn with_protocol(auth: RegistryAuth, protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
            progress: None,
        }
    }

    /// Send progress updates to `sender` instead of the log.
    pub fn with_progress(mut self, sender: mpsc::Sender<PushProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Push the function's last build and return the digest of its
    /// `index.json`.
    pub async fn push(&self, cancel: &CancellationToken, function: &Function) -> Result<String> {
        let reference = ImageReference::parse(&function.image)?;
        let build_dir = BuildDirs::new(function.builds_dir()).last_build_dir()?;
        let layout = OciLayout::open(build_dir.join("oci"))?;

        tracing::info!(
            reference = %reference,
            source = %build_dir.display(),
            "Pushing image to registry"
        );

        let (progress, reporter) = match &self.progress {
            Some(sender) => (sender.clone(), None),
            None => {
                let (tx, rx) = mpsc::channel(16);
                (tx, Some(tokio::spawn(log_progress(rx))))
            }
        };

        let result = tokio::select! {
            result = self.push_layout(&reference, &layout, progress) => result,
            _ = cancel.cancelled() => Err(FnError::Cancelled),
        };

        if let Some(handle) = reporter {
            // the sender was dropped with the push future
            let _ = handle.await;
        }
        result
    }

    async fn push_layout(
        &self,
        reference: &ImageReference,
        layout: &OciLayout,
        progress: mpsc::Sender<PushProgress>,
    ) -> Result<String> {
        let plan = PushPlan::from_layout(layout)?;
        let registry_error = |message: String| FnError::RegistryError {
            registry: reference.registry.clone(),
            message,
        };
        let tagged = Reference::with_tag(
            reference.registry.clone(),
            reference.repository.clone(),
            reference.tag.clone(),
        );

        self.client
            .auth(&tagged, &self.auth.to_oci_auth(), RegistryOperation::Push)
            .await
            .map_err(|e| registry_error(format!("Authentication failed: {}", e)))?;

        let total = plan.total;
        let mut complete = 0u64;
        let report = |complete: u64| {
            let progress = progress.clone();
            async move {
                let _ = progress.send(PushProgress { complete, total }).await;
            }
        };
        report(complete).await;

        for (digest, _) in &plan.blobs {
            let data = layout.read_blob(digest)?;
            self.client
                .push_blob(&tagged, &data, digest)
                .await
                .map_err(|e| registry_error(format!("Failed to push blob {}: {}", digest, e)))?;
            complete += data.len() as u64;
            tracing::debug!(digest = %digest, bytes = data.len(), "Pushed blob");
            report(complete).await;
        }

        for image in plan.images {
            let target = Reference::with_digest(
                reference.registry.clone(),
                reference.repository.clone(),
                image.digest.clone(),
            );
            let size = image.manifest.len() as u64;
            self.client
                .push_manifest_raw(
                    &target,
                    image.manifest,
                    HeaderValue::from_static(MEDIA_TYPE_MANIFEST),
                )
                .await
                .map_err(|e| {
                    registry_error(format!("Failed to push image {}: {}", image.digest, e))
                })?;
            complete += size;
            tracing::debug!(
                platform = image.platform.as_deref().unwrap_or("unknown"),
                digest = %image.digest,
                "Pushed platform image"
            );
            report(complete).await;
        }

        self.client
            .push_manifest_raw(
                &tagged,
                plan.index,
                HeaderValue::from_static(MEDIA_TYPE_INDEX),
            )
            .await
            .map_err(|e| registry_error(format!("Failed to push index: {}", e)))?;
        report(total).await;

        tracing::info!(
            reference = %reference,
            digest = %plan.index_digest,
            "Image pushed successfully"
        );
        Ok(plan.index_digest)
    }
}

impl Default for Pusher {
    fn default() -> Self {
        Self::new()
    }
}

async fn log_progress(mut rx: mpsc::Receiver<PushProgress>) {
    while let Some(p) = rx.recv().await {
        tracing::info!(complete = p.complete, total = p.total, "Push progress");
    }
}

/// Digest a push of `oci_dir` returns, without contacting a registry.
pub fn push_digest(oci_dir: &Path) -> Result<String> {
    let layout = OciLayout::open(oci_dir)?;
    Ok(PushPlan::from_layout(&layout)?.index_digest)
}
