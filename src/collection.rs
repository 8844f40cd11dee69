//! Heterogeneous file collections and how they collapse into a single hash.
use std::collections::HashSet;
use std::path::Path as StdPath;
use std::path::PathBuf;
use std::sync::Arc;

use derivative::Derivative;
#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::hash::HashCode;
use crate::snapshot::AggregateSnapshot;
use crate::snapshot::ContentSnapshot;
use crate::snapshot::SnapshotEntry;
use crate::tree::DirectoryTree;
use crate::tree::FileTreeSource;

/// One root element of a [`FileCollection`].
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum FileCollectionElement {
    /// A path of unknown kind. Directories expand into their whole tree.
    Path(PathBuf),
    /// A directory tree, possibly filtered.
    DirectoryTree(DirectoryTree),
    /// Any other tree source.
    Tree(#[derivative(Debug = "ignore")] Arc<dyn FileTreeSource>),
}

/// An ordered list of root elements to snapshot together.
#[derive(Debug, Clone, Default)]
pub struct FileCollection {
    elements: Vec<FileCollectionElement>,
}

impl FileCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection holding the single path `path`.
    pub fn of_path<P: AsRef<StdPath>>(path: P) -> Self {
        let mut ret = Self::new();
        ret.push_path(path);
        ret
    }

    /// Appends a path.
    pub fn push_path<P: AsRef<StdPath>>(&mut self, path: P) -> &mut Self {
        self.elements
            .push(FileCollectionElement::Path(path.as_ref().to_path_buf()));
        self
    }

    /// Appends a directory tree.
    pub fn push_directory_tree(&mut self, tree: DirectoryTree) -> &mut Self {
        self.elements.push(FileCollectionElement::DirectoryTree(tree));
        self
    }

    /// Appends a generic tree source.
    pub fn push_tree(&mut self, tree: Arc<dyn FileTreeSource>) -> &mut Self {
        self.elements.push(FileCollectionElement::Tree(tree));
        self
    }

    /// The root elements in insertion order.
    pub fn elements(&self) -> &[FileCollectionElement] {
        &self.elements
    }
}

impl<P: AsRef<StdPath>> FromIterator<P> for FileCollection {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut ret = Self::new();
        for path in iter {
            ret.push_path(path);
        }
        ret
    }
}

/// Whether the order of entries affects the combined hash.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum CompareStrategy {
    /// Entries are combined in expansion order.
    Ordered,
    /// Entries are sorted before being combined.
    #[default]
    Unordered,
}

/// Which part of an entry's path takes part in the combined hash.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum NormalizationStrategy {
    /// The full canonical path.
    #[default]
    Absolute,
    /// The path relative to the root element; roots use their name.
    Relative,
    /// The file name only.
    NameOnly,
    /// Paths are ignored and directories left out, so only file contents
    /// count.
    Ignored,
}

impl NormalizationStrategy {
    /// The path string `entry` contributes, or `None` when the entry is left
    /// out entirely.
    pub fn normalize(self, entry: &SnapshotEntry) -> Option<String> {
        match self {
            NormalizationStrategy::Absolute => Some(entry.path().to_string()),
            NormalizationStrategy::Relative => Some(match entry {
                SnapshotEntry::Missing { name, .. } => name.clone(),
                SnapshotEntry::File {
                    relative_path,
                    root,
                    ..
                }
                | SnapshotEntry::Directory {
                    relative_path,
                    root,
                    ..
                } => {
                    if *root {
                        entry.name().to_owned()
                    } else {
                        relative_path.to_string()
                    }
                }
            }),
            NormalizationStrategy::NameOnly => Some(entry.name().to_owned()),
            NormalizationStrategy::Ignored => match entry {
                SnapshotEntry::Directory { .. } => None,
                _ => Some(String::new()),
            },
        }
    }
}

/// How a collection of entries is combined into an [`AggregateSnapshot`].
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct SnapshotStrategy {
    /// Ordering sensitivity.
    pub compare: CompareStrategy,
    /// Path sensitivity.
    pub normalization: NormalizationStrategy,
}

impl SnapshotStrategy {
    /// Creates a strategy.
    pub fn new(compare: CompareStrategy, normalization: NormalizationStrategy) -> Self {
        Self {
            compare,
            normalization,
        }
    }

    /// Combines `entries` into one hash. An entry whose absolute path was
    /// already seen is skipped.
    pub fn combine<'a, I>(&self, entries: I) -> AggregateSnapshot
    where
        I: IntoIterator<Item = &'a SnapshotEntry>,
    {
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut normalized: Vec<(String, ContentSnapshot)> = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.path().clone()))
            .filter_map(|entry| {
                self.normalization
                    .normalize(entry)
                    .map(|path| (path, entry.content()))
            })
            .collect();

        if self.compare == CompareStrategy::Unordered {
            normalized.sort();
        }

        let mut hasher = Sha256::new();
        for (path, content) in &normalized {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            content.append_to_hasher(&mut hasher);
        }
        AggregateSnapshot {
            hash: HashCode::from_digest(hasher),
        }
    }
}
