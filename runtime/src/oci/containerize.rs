//! OCI layout assembly.
//!
//! Writes one multi-platform image into `<build_dir>/oci`: the layout
//! marker, a data layer shared by every platform, then per platform an exec
//! layer, config and manifest, and finally `index.json`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use fnbuild_core::{Phase, PhaseContext, Platform, Result};

use super::blob::BlobStore;
use super::language::LayerBuilder;
use super::layer::{create_data_layer, Layer};
use super::manifest::{
    ContainerConfig, Descriptor, Empty, ImageConfig, ImageIndex, ImageManifest, RootFs,
    MEDIA_TYPE_CONFIG, MEDIA_TYPE_MANIFEST, OCI_LAYOUT,
};
use crate::build::BuildContext;

/// Environment variable recording the build timestamp inside the image.
pub const CREATED_ENV: &str = "FUNC_CREATED";

/// Image entrypoint.
pub const FUNC_CMD: &str = "/func/f";

pub const FUNC_WORKDIR: &str = "/func/";

pub const STOP_SIGNAL: &str = "SIGKILL";

/// Write the complete OCI layout for `ctx` and return its index.
///
/// Any failure aborts before `index.json` is touched, so a layout on disk
/// either carries the previous complete index or the new one.
pub async fn containerize(ctx: &BuildContext, builder: &dyn LayerBuilder) -> Result<ImageIndex> {
    let build_dir = ctx.build_dir()?;
    let oci_dir = ctx.oci_dir()?;
    let timestamp = ctx.timestamp();

    std::fs::create_dir_all(&oci_dir).during(Phase::Setup)?;
    std::fs::write(oci_dir.join("oci-layout"), OCI_LAYOUT).during(Phase::Setup)?;
    let store = BlobStore::open(&oci_dir).during(Phase::Setup)?;

    ctx.check_cancelled()?;
    let data = create_data_layer(
        &ctx.function().root,
        &ctx.config().ignored,
        timestamp,
        &build_dir.join("datalayer.tar.gz"),
        &store,
    )
    .during(Phase::DataLayer)?;

    let mut manifests = Vec::with_capacity(ctx.config().platforms.len());
    for platform in &ctx.config().platforms {
        ctx.check_cancelled()?;
        let descriptor = write_image(ctx, builder, &store, &data, platform, timestamp).await?;
        manifests.push(descriptor);
    }

    ctx.check_cancelled()?;
    let index = ImageIndex::new(manifests);
    write_index(&oci_dir, &index).during(Phase::Index)?;

    tracing::info!(
        path = %oci_dir.display(),
        platforms = index.manifests.len(),
        "Wrote OCI layout"
    );
    Ok(index)
}

/// Exec layer, config and manifest for one platform.
async fn write_image(
    ctx: &BuildContext,
    builder: &dyn LayerBuilder,
    store: &BlobStore,
    data: &Layer,
    platform: &Platform,
    timestamp: DateTime<Utc>,
) -> Result<Descriptor> {
    let exec = builder
        .build(ctx, platform, store)
        .await
        .during(Phase::ExecLayer)?;

    let config = image_config(ctx, platform, timestamp, &[data, &exec]);
    let config_desc = store
        .put_json(MEDIA_TYPE_CONFIG, &config)
        .during(Phase::Config)?;

    let manifest = ImageManifest::new(
        config_desc,
        vec![data.descriptor.clone(), exec.descriptor.clone()],
    );
    let mut manifest_desc = store
        .put_json(MEDIA_TYPE_MANIFEST, &manifest)
        .during(Phase::Manifest)?;
    manifest_desc.platform = Some(platform.clone());

    tracing::debug!(
        platform = %platform,
        manifest = %manifest_desc.digest,
        "Wrote image manifest"
    );
    Ok(manifest_desc)
}

/// Image config for one platform. `layers` are in manifest order.
pub fn image_config(
    ctx: &BuildContext,
    platform: &Platform,
    timestamp: DateTime<Utc>,
    layers: &[&Layer],
) -> ImageConfig {
    let function = ctx.function();
    let created = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut env: Vec<String> = function
        .build
        .build_envs
        .iter()
        .chain(function.run.envs.iter())
        .filter_map(|e| e.key_value_pair())
        .collect();
    env.push(format!("{}={}", CREATED_ENV, created));

    let mut exposed_ports = BTreeMap::new();
    exposed_ports.insert(format!("{}/tcp", ctx.config().exposed_port), Empty {});

    let volumes = function
        .volume_paths()
        .into_iter()
        .map(|p| (p, Empty {}))
        .collect();

    ImageConfig {
        created,
        architecture: platform.architecture.clone(),
        os: platform.os.clone(),
        variant: platform.variant.clone(),
        config: ContainerConfig {
            exposed_ports,
            env,
            cmd: vec![FUNC_CMD.to_string()],
            working_dir: FUNC_WORKDIR.to_string(),
            stop_signal: STOP_SIGNAL.to_string(),
            volumes,
        },
        rootfs: RootFs {
            typ: "layers".to_string(),
            diff_ids: layers.iter().map(|l| l.diff_id.clone()).collect(),
        },
    }
}

/// Replace `index.json` in one step.
fn write_index(oci_dir: &Path, index: &ImageIndex) -> Result<()> {
    let data = serde_json::to_vec_pretty(index)?;
    let staged = oci_dir.join(format!(".index.json.{}", std::process::id()));
    std::fs::write(&staged, &data)?;
    std::fs::rename(&staged, oci_dir.join("index.json"))?;
    Ok(())
}
