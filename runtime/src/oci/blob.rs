//! Content-addressable blob storage for an OCI layout.
//!
//! Every blob lives at `blobs/sha256/<hex>` where `<hex>` is the SHA-256 of
//! the exact bytes in the file. Writes land in a staging file first and are
//! renamed into place, so a blob path never holds partial content.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fnbuild_core::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::manifest::Descriptor;

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 digest of a file, streaming.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Strip an optional `sha256:` prefix.
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// Writer adapter that hashes and counts everything passing through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Consume the adapter, returning the wrapped writer, hex digest and byte count.
    pub fn finalize(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The `blobs/sha256` directory of an OCI layout.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open the blob store under an OCI layout root, creating it if needed.
    pub fn open(oci_dir: &Path) -> Result<Self> {
        let dir = oci_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a blob with the given digest is (or would be) stored at.
    pub fn path(&self, digest: &str) -> PathBuf {
        self.dir.join(digest_hex(digest))
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path(digest).is_file()
    }

    /// Store raw bytes and return their descriptor.
    pub fn put_bytes(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let hex = sha256_bytes(data);
        let target = self.dir.join(&hex);
        if !target.is_file() {
            let staged = self.dir.join(format!(".{}.partial", hex));
            std::fs::write(&staged, data)?;
            std::fs::rename(&staged, &target)?;
        }
        tracing::debug!(digest = %hex, size = data.len(), media_type, "Stored blob");
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest: format!("sha256:{}", hex),
            size: data.len() as u64,
            platform: None,
        })
    }

    /// Serialize a document as indented JSON and store it.
    pub fn put_json<T: Serialize>(&self, media_type: &str, value: &T) -> Result<Descriptor> {
        let data = serde_json::to_vec_pretty(value)?;
        self.put_bytes(media_type, &data)
    }

    /// Move an already-hashed staging file into the store.
    ///
    /// The caller vouches for `hex` and `size`; they must describe the file's
    /// exact bytes.
    pub fn ingest(&self, staged: &Path, media_type: &str, hex: &str, size: u64) -> Result<Descriptor> {
        let target = self.dir.join(hex);
        if target.is_file() {
            std::fs::remove_file(staged)?;
        } else {
            std::fs::rename(staged, &target)?;
        }
        tracing::debug!(digest = %hex, size, media_type, "Ingested blob");
        Ok(Descriptor {
            media_type: media_type.to_string(),
            digest: format!("sha256:{}", hex),
            size,
            platform: None,
        })
    }

    pub fn read(&self, digest: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path(digest))?)
    }

    /// Whether the stored bytes still hash to their file name.
    pub fn verify(&self, digest: &str) -> Result<bool> {
        Ok(sha256_file(&self.path(digest))? == digest_hex(digest))
    }
}
