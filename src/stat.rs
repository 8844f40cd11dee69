//! The stat provider seam.
use std::fs;
use std::path::Path;

#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Error;
use crate::utils::modified_time;

/// What a stat call found at a path.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub enum FileType {
    /// Nothing exists at the path.
    Missing,
    /// A directory.
    Directory,
    /// A regular file.
    RegularFile,
    /// Anything else: sockets, fifos, devices.
    Other,
}

/// A single stat observation.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct FileMetadataSnapshot {
    /// The kind of entry.
    pub file_type: FileType,
    /// Last modification time in RFC 3339 - Z format. Empty when missing.
    pub mtime: String,
    /// Size in bytes, zero for anything but regular files.
    pub size: u64,
}

impl FileMetadataSnapshot {
    /// Creates a snapshot from its parts.
    pub fn new(file_type: FileType, mtime: String, size: u64) -> Self {
        Self {
            file_type,
            mtime,
            size,
        }
    }

    /// The observation for a path that does not exist.
    pub fn missing() -> Self {
        Self::new(FileType::Missing, String::new(), 0)
    }

    /// Classifies `metadata` obtained from the standard library.
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let file_type = if metadata.is_dir() {
            FileType::Directory
        } else if metadata.is_file() {
            FileType::RegularFile
        } else {
            FileType::Other
        };
        let size = if file_type == FileType::RegularFile {
            metadata.len()
        } else {
            0
        };
        Self::new(file_type, modified_time(metadata), size)
    }
}

/// Answers stat queries.
pub trait FileSystem: Send + Sync {
    /// Observes `path` once. A nonexistent path yields
    /// [`FileType::Missing`], not an error.
    fn stat(&self, path: &Path) -> Result<FileMetadataSnapshot, Error>;
}

/// Stats the local file system, following symlinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn stat(&self, path: &Path) -> Result<FileMetadataSnapshot, Error> {
        match fs::metadata(path) {
            Ok(metadata) => Ok(FileMetadataSnapshot::from_metadata(&metadata)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(FileMetadataSnapshot::missing())
            }
            Err(e) => Err(Error::Read {
                what: format!("metadata of {}", path.display()),
                how: e.to_string(),
            }),
        }
    }
}
