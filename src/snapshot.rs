use std::sync::Arc;

#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::hash::HashCode;
use crate::path::RelativePath;
use crate::stat::FileType;

const MISSING_SIGNATURE: &[u8] = b"MISSING";
const DIR_SIGNATURE: &[u8] = b"DIR";

/// Content hash and modification time of a regular file, taken from the
/// same stat observation.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct FileHashSnapshot {
    /// Digest of the file contents.
    pub hash: HashCode,
    /// Last modification time in RFC 3339 - Z format.
    pub mtime: String,
}

/// The observed state of one path.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub enum SnapshotEntry {
    /// Nothing existed at `path` when it was observed.
    Missing {
        /// Canonical absolute path.
        path: Arc<str>,
        /// The file name.
        name: String,
    },
    /// A regular file.
    File {
        /// Canonical absolute path.
        path: Arc<str>,
        /// Path relative to the root the entry was found under.
        relative_path: RelativePath,
        /// `true` when the file itself was requested, `false` when it was
        /// discovered while walking a tree.
        root: bool,
        /// What the file contained.
        content: FileHashSnapshot,
    },
    /// A directory. Its content identity comes from its children.
    Directory {
        /// Canonical absolute path.
        path: Arc<str>,
        /// Path relative to the root the entry was found under.
        relative_path: RelativePath,
        /// Same meaning as for files.
        root: bool,
    },
}

impl SnapshotEntry {
    /// Canonical absolute path of the entry.
    pub fn path(&self) -> &Arc<str> {
        match self {
            SnapshotEntry::Missing { path, .. }
            | SnapshotEntry::File { path, .. }
            | SnapshotEntry::Directory { path, .. } => path,
        }
    }

    /// File name of the entry.
    pub fn name(&self) -> &str {
        match self {
            SnapshotEntry::Missing { name, .. } => name,
            SnapshotEntry::File { relative_path, .. }
            | SnapshotEntry::Directory { relative_path, .. } => {
                relative_path.last_name().unwrap_or_default()
            }
        }
    }

    /// Relative path, absent for missing entries.
    pub fn relative_path(&self) -> Option<&RelativePath> {
        match self {
            SnapshotEntry::Missing { .. } => None,
            SnapshotEntry::File { relative_path, .. }
            | SnapshotEntry::Directory { relative_path, .. } => Some(relative_path),
        }
    }

    /// The stat classification this entry was built from.
    pub fn file_type(&self) -> FileType {
        match self {
            SnapshotEntry::Missing { .. } => FileType::Missing,
            SnapshotEntry::File { .. } => FileType::RegularFile,
            SnapshotEntry::Directory { .. } => FileType::Directory,
        }
    }

    /// Content identity of the entry.
    pub fn content(&self) -> ContentSnapshot {
        match self {
            SnapshotEntry::Missing { .. } => ContentSnapshot::Missing,
            SnapshotEntry::File { content, .. } => ContentSnapshot::File(content.hash),
            SnapshotEntry::Directory { .. } => ContentSnapshot::Directory,
        }
    }
}

/// The part of an entry that matters for content equality.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Hash, Eq, PartialOrd, Ord)]
pub enum ContentSnapshot {
    /// The path did not exist.
    Missing,
    /// The path was a directory.
    Directory,
    /// The path was a file with this hash.
    File(HashCode),
}

impl ContentSnapshot {
    /// Appends this content's signature to `hasher`.
    pub fn append_to_hasher(&self, hasher: &mut Sha256) {
        match self {
            ContentSnapshot::Missing => hasher.update(MISSING_SIGNATURE),
            ContentSnapshot::Directory => hasher.update(DIR_SIGNATURE),
            ContentSnapshot::File(hash) => hasher.update(hash.as_bytes()),
        }
    }
}

/// Every entry below a tree root in depth-first pre-order.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct TreeSnapshot {
    /// Canonical path of the directory, `None` for trees that are not backed
    /// by a directory.
    pub base_path: Option<Arc<str>>,
    /// The entries, excluding the root itself.
    pub entries: Vec<SnapshotEntry>,
}

/// A single digest summarizing a path and everything below it.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct AggregateSnapshot {
    /// The combined hash.
    pub hash: HashCode,
}

impl AggregateSnapshot {
    /// Appends the combined hash to `hasher`.
    pub fn append_to_hasher(&self, hasher: &mut Sha256) {
        hasher.update(self.hash.as_bytes());
    }
}
