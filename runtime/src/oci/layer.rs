//! Deterministic tar.gz layer creation.
//!
//! Layers are streamed once: the tar stream is hashed before compression to
//! produce the diffID and the gzip output is hashed again on its way to disk
//! to produce the blob digest. Every entry carries the build timestamp and
//! normalized ownership so identical input always yields identical bytes.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use fnbuild_core::error::{FnError, Phase, Result};
use tar::{EntryType, Header, HeaderMode};
use walkdir::WalkDir;

use super::blob::{BlobStore, DigestWriter};
use super::manifest::{Descriptor, MEDIA_TYPE_LAYER};

/// Directory every function file lives under inside the image.
pub const FUNC_DIR: &str = "func";

/// In-image path of the compiled function binary, relative to `/`.
pub const EXEC_PATH: &str = "func/f";

/// A layer written into the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Descriptor of the compressed blob
    pub descriptor: Descriptor,
    /// `sha256:` digest of the uncompressed tar stream
    pub diff_id: String,
}

type Sink = DigestWriter<GzEncoder<DigestWriter<File>>>;

/// Streams tar entries into a staged gzip file.
pub struct LayerWriter {
    builder: tar::Builder<Sink>,
    staged: PathBuf,
    mtime: u64,
}

impl LayerWriter {
    /// Start a layer at `staged`; every entry gets `timestamp` as its mtime.
    pub fn create(staged: &Path, timestamp: DateTime<Utc>) -> Result<Self> {
        let file = File::create(staged).map_err(|e| {
            FnError::IoError(io::Error::new(
                e.kind(),
                format!("Failed to create layer file {}: {}", staged.display(), e),
            ))
        })?;
        let encoder = GzEncoder::new(DigestWriter::new(file), Compression::default());
        let builder = tar::Builder::new(DigestWriter::new(encoder));

        Ok(Self {
            builder,
            staged: staged.to_path_buf(),
            mtime: timestamp.timestamp().max(0) as u64,
        })
    }

    fn header(&self, entry_type: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(size);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.mtime);
        header
    }

    pub fn append_dir(&mut self, name: &str) -> Result<()> {
        let mut header = self.header(EntryType::Directory, 0o755, 0);
        self.builder.append_data(&mut header, name, io::empty())?;
        Ok(())
    }

    /// Append a regular file from disk under `name`.
    pub fn append_file(&mut self, name: &str, source: &Path) -> Result<()> {
        let metadata = std::fs::metadata(source)?;
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
        header.set_mtime(self.mtime);
        let mut file = File::open(source)?;
        self.builder.append_data(&mut header, name, &mut file)?;
        Ok(())
    }

    /// Append a file with an explicit mode, e.g. the executable bit.
    pub fn append_file_with_mode(&mut self, name: &str, source: &Path, mode: u32) -> Result<()> {
        let size = std::fs::metadata(source)?.len();
        let mut header = self.header(EntryType::Regular, mode, size);
        let mut file = File::open(source)?;
        self.builder.append_data(&mut header, name, &mut file)?;
        Ok(())
    }

    pub fn append_symlink(&mut self, name: &str, target: &Path) -> Result<()> {
        let mut header = self.header(EntryType::Symlink, 0o777, 0);
        self.builder.append_link(&mut header, name, target)?;
        Ok(())
    }

    /// Close the streams and move the staged file into the blob store.
    pub fn finish(self, store: &BlobStore) -> Result<Layer> {
        let sink = self.builder.into_inner()?;
        let (encoder, diff_id, _) = sink.finalize();
        let file_sink = encoder.finish()?;
        let (mut file, digest, size) = file_sink.finalize();
        file.flush()?;
        file.sync_all()?;
        drop(file);

        let descriptor = store.ingest(&self.staged, MEDIA_TYPE_LAYER, &digest, size)?;
        Ok(Layer {
            descriptor,
            diff_id: format!("sha256:{}", diff_id),
        })
    }
}

/// Build the shared data layer from a function's source tree.
///
/// Files land under `/func` with their relative paths. Entries whose file
/// name is in `ignored` are skipped, along with everything beneath them.
pub fn create_data_layer(
    source: &Path,
    ignored: &[String],
    timestamp: DateTime<Utc>,
    staged: &Path,
    store: &BlobStore,
) -> Result<Layer> {
    let mut writer = LayerWriter::create(staged, timestamp)?;
    writer.append_dir(FUNC_DIR)?;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !ignored.iter().any(|i| *i == name)
        });

    let mut entries = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| {
            FnError::IoError(io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to walk {}: {}", source.display(), e),
            ))
        })?;
        let relative = entry.path().strip_prefix(source).map_err(|e| {
            FnError::IoError(io::Error::new(io::ErrorKind::Other, e.to_string()))
        })?;
        let name = format!(
            "{}/{}",
            FUNC_DIR,
            relative.to_string_lossy().replace('\\', "/")
        );

        let file_type = entry.file_type();
        if file_type.is_dir() {
            writer.append_dir(&name)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            writer.append_symlink(&name, &target)?;
        } else if file_type.is_file() {
            writer.append_file(&name, entry.path())?;
        } else {
            return Err(FnError::layout(
                Phase::DataLayer,
                format!(
                    "Unsupported file type in function source: {}",
                    entry.path().display()
                ),
            ));
        }
        tracing::debug!(entry = %name, "Added to data layer");
        entries += 1;
    }

    let layer = writer.finish(store)?;
    tracing::info!(
        digest = %layer.descriptor.digest,
        size = layer.descriptor.size,
        entries,
        "Created data layer"
    );
    Ok(layer)
}

/// Build a single-file execution layer holding `binary` at `/func/f`.
pub fn create_exec_layer(
    binary: &Path,
    timestamp: DateTime<Utc>,
    staged: &Path,
    store: &BlobStore,
) -> Result<Layer> {
    let mut writer = LayerWriter::create(staged, timestamp)?;
    writer.append_file_with_mode(EXEC_PATH, binary, 0o755)?;
    writer.finish(store)
}
