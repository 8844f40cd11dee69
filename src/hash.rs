//! Content hashing.
//!
//! The snapshotter only needs a deterministic, collision resistant digest of
//! file contents. [`FileHasher`] is the seam; [`Sha256Hasher`] is the default.
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::errors::Error;
use crate::stat::FileMetadataSnapshot;

/// A 256 bit digest.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashCode([u8; 32]);

impl HashCode {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Finalizes `context` into a hash code.
    pub fn from_digest(context: Sha256) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&context.finalize());
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashCode({self})")
    }
}

/// Computes content hashes for files.
pub trait FileHasher: Send + Sync {
    /// Hashes everything readable from `content`.
    fn hash_content(&self, what: &str, content: &mut dyn Read) -> Result<HashCode, Error>;

    /// Hashes the file at `path`. `stat` is the observation the caller made
    /// just before, for implementations that key on size or mtime.
    fn hash_file(&self, path: &Path, _stat: &FileMetadataSnapshot) -> Result<HashCode, Error> {
        let what = path.to_string_lossy();
        let mut file = fs::File::open(path).map_err(|e| Error::from_io(what.as_ref(), e))?;
        self.hash_content(&what, &mut file)
    }
}

/// Feeds `reader` into a fresh SHA-256 context in fixed size chunks.
pub(crate) fn sha256_build(what: &str, reader: &mut dyn Read) -> Result<Sha256, Error> {
    let mut context = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| Error::from_io(what, e))?;
        if bytes_read == 0 {
            break;
        }
        context.update(&buffer[..bytes_read]);
    }
    Ok(context)
}

/// SHA-256 over the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl FileHasher for Sha256Hasher {
    fn hash_content(&self, what: &str, content: &mut dyn Read) -> Result<HashCode, Error> {
        Ok(HashCode::from_digest(sha256_build(what, content)?))
    }
}
