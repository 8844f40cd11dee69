//! Tree sources and the visitor contract used to snapshot them.
//!
//! A [`FileTreeSource`] reports its directories and files to a
//! [`FileVisitor`] in depth-first pre-order: a directory is reported before
//! anything below it and siblings come in file name order. Two visits of an
//! unchanged source report the same sequence.
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::Path as StdPath;
use std::path::PathBuf;

use log::trace;
use log::warn;
#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use walkdir::WalkDir;

use crate::errors::Error;
use crate::filter::FilterLevel;
use crate::filter::FilterSet;
use crate::hash::FileHasher;
use crate::hash::HashCode;
use crate::path::RelativePath;
use crate::stat::FileMetadataSnapshot;
use crate::utils::format_system_time;

/// What a visitor learns about one entry of a tree.
pub trait FileVisitDetails {
    /// Platform path of the entry.
    fn file(&self) -> &StdPath;

    /// Path relative to the tree's root.
    fn relative_path(&self) -> &RelativePath;

    /// Last modification time in RFC 3339 - Z format.
    fn last_modified(&self) -> &str;

    /// Opens the entry's contents for reading.
    fn open(&self) -> Result<Box<dyn Read + '_>, Error>;

    /// Hashes the entry's contents with `hasher`.
    fn hash(&self, hasher: &dyn FileHasher) -> Result<HashCode, Error> {
        let what = self.file().to_string_lossy();
        let mut content = self.open()?;
        hasher.hash_content(&what, &mut content)
    }
}

/// Receives entries from a [`FileTreeSource`].
pub trait FileVisitor {
    /// Called for every directory below the root.
    fn visit_dir(&mut self, details: &dyn FileVisitDetails) -> Result<(), Error>;

    /// Called for every file.
    fn visit_file(&mut self, details: &dyn FileVisitDetails) -> Result<(), Error>;
}

/// Anything that can enumerate a tree of files.
pub trait FileTreeSource: Send + Sync {
    /// Reports every entry to `visitor`, stopping at the first error.
    fn visit(&self, visitor: &mut dyn FileVisitor) -> Result<(), Error>;
}

/// A directory on disk, optionally narrowed by a [`FilterSet`].
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryTree {
    dir: PathBuf,
    filter: FilterSet,
}

impl DirectoryTree {
    /// Everything below `dir`. A regular file in place of `dir` is a tree
    /// holding just that file, and a path that does not exist is empty.
    /// Entries whose names are not valid UTF-8 are skipped with a warning.
    pub fn new<P: AsRef<StdPath>>(dir: P) -> Self {
        Self::with_filter(dir, FilterSet::new())
    }

    /// The entries below `dir` that `filter` lets through.
    pub fn with_filter<P: AsRef<StdPath>>(dir: P, filter: FilterSet) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            filter,
        }
    }

    /// Root directory of the tree.
    pub fn dir(&self) -> &StdPath {
        &self.dir
    }

    /// The filter applied during the walk.
    pub fn filter(&self) -> &FilterSet {
        &self.filter
    }

    /// Whether the walk covers only part of the directory.
    pub fn is_filtered(&self) -> bool {
        !self.filter.is_empty()
    }
}

struct DirectoryFileDetails<'a> {
    path: &'a StdPath,
    relative_path: RelativePath,
    metadata: FileMetadataSnapshot,
}

impl FileVisitDetails for DirectoryFileDetails<'_> {
    fn file(&self) -> &StdPath {
        self.path
    }

    fn relative_path(&self) -> &RelativePath {
        &self.relative_path
    }

    fn last_modified(&self) -> &str {
        &self.metadata.mtime
    }

    fn open(&self) -> Result<Box<dyn Read + '_>, Error> {
        let file = fs::File::open(self.path)
            .map_err(|e| Error::from_io(self.path.to_string_lossy(), e))?;
        Ok(Box::new(file))
    }

    fn hash(&self, hasher: &dyn FileHasher) -> Result<HashCode, Error> {
        hasher.hash_file(self.path, &self.metadata)
    }
}

impl DirectoryTree {
    /// A regular file given as the root is a tree of one entry named after
    /// the file.
    fn visit_single_file(
        &self,
        metadata: &fs::Metadata,
        visitor: &mut dyn FileVisitor,
    ) -> Result<(), Error> {
        let Some(name) = self.dir.file_name() else {
            return Ok(());
        };
        if self.filter.matches(name, false) != FilterLevel::Allow {
            return Ok(());
        }
        let Some(name) = name.to_str() else {
            warn!("skipping non UTF-8 path {}", self.dir.display());
            return Ok(());
        };
        let details = DirectoryFileDetails {
            path: &self.dir,
            relative_path: RelativePath::new(true, &[name])?,
            metadata: FileMetadataSnapshot::from_metadata(metadata),
        };
        visitor.visit_file(&details)
    }
}

fn is_not_found(e: &walkdir::Error) -> bool {
    e.io_error()
        .map(|io| io.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}

impl FileTreeSource for DirectoryTree {
    fn visit(&self, visitor: &mut dyn FileVisitor) -> Result<(), Error> {
        if let Ok(metadata) = fs::metadata(&self.dir) {
            if metadata.is_file() {
                return self.visit_single_file(&metadata, visitor);
            }
        }

        let mut walker = WalkDir::new(&self.dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                // A missing root is an empty tree; a child that vanished
                // mid-walk is simply no longer part of it.
                Err(e) if is_not_found(&e) => {
                    trace!("skipping vanished entry: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(Error::Walk {
                        what: self.dir.to_string_lossy().to_string(),
                        how: e.to_string(),
                    });
                }
            };

            let is_dir = entry.file_type().is_dir();
            if entry.path().to_str().is_none() {
                warn!("skipping non UTF-8 path {}", entry.path().display());
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.dir)
                .map_err(|e| Error::Walk {
                    what: "strip_prefix".into(),
                    how: e.to_string(),
                })?;

            match self.filter.matches(relative, is_dir) {
                FilterLevel::Deny => {
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                FilterLevel::Traverse => continue,
                FilterLevel::Allow => {}
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => FileMetadataSnapshot::from_metadata(&metadata),
                Err(e) if is_not_found(&e) => {
                    trace!("skipping vanished entry: {e}");
                    continue;
                }
                Err(e) => {
                    return Err(Error::Read {
                        what: entry.path().to_string_lossy().to_string(),
                        how: e.to_string(),
                    });
                }
            };
            let details = DirectoryFileDetails {
                path: entry.path(),
                relative_path: RelativePath::from_std(!is_dir, relative)?,
                metadata,
            };
            trace!("visiting {}", details.relative_path);

            if is_dir {
                visitor.visit_dir(&details)?;
            } else if entry.file_type().is_file() {
                visitor.visit_file(&details)?;
            } else {
                return Err(Error::UnrecognizedFileType {
                    path: entry.path().to_string_lossy().to_string(),
                    kind: format!("{:?}", entry.file_type()),
                });
            }
        }
        Ok(())
    }
}

/// A tree held in memory, for sources that have no directory of their own
/// such as archive contents or generated files.
///
/// Entries are reported under `root`, which only serves to give them a
/// stable path. Parent directories are implied by file paths.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    root: PathBuf,
    mtime: String,
    files: BTreeMap<Vec<String>, Vec<u8>>,
}

impl MemoryTree {
    /// Creates an empty tree reported under `root`.
    pub fn new<P: AsRef<StdPath>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mtime: format_system_time(std::time::SystemTime::UNIX_EPOCH),
            files: BTreeMap::new(),
        }
    }

    /// Adds or replaces the file at `relative_path`, a `/` separated path.
    pub fn insert(&mut self, relative_path: &str, contents: impl Into<Vec<u8>>) -> Result<(), Error> {
        let segments: Vec<&str> = relative_path.split('/').collect();
        let path = RelativePath::new(true, &segments)?;
        self.files
            .insert(path.segments().to_vec(), contents.into());
        Ok(())
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree has no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

struct MemoryFileDetails<'a> {
    path: PathBuf,
    relative_path: RelativePath,
    mtime: &'a str,
    contents: &'a [u8],
}

impl FileVisitDetails for MemoryFileDetails<'_> {
    fn file(&self) -> &StdPath {
        &self.path
    }

    fn relative_path(&self) -> &RelativePath {
        &self.relative_path
    }

    fn last_modified(&self) -> &str {
        self.mtime
    }

    fn open(&self) -> Result<Box<dyn Read + '_>, Error> {
        Ok(Box::new(self.contents))
    }
}

impl FileTreeSource for MemoryTree {
    fn visit(&self, visitor: &mut dyn FileVisitor) -> Result<(), Error> {
        let mut visited_dirs: BTreeSet<&[String]> = BTreeSet::new();
        for (segments, contents) in &self.files {
            for depth in 1..segments.len() {
                let dir = &segments[..depth];
                if visited_dirs.insert(dir) {
                    let details = MemoryFileDetails {
                        path: dir.iter().fold(self.root.clone(), |p, s| p.join(s)),
                        relative_path: RelativePath::new(false, dir)?,
                        mtime: &self.mtime,
                        contents: &[],
                    };
                    visitor.visit_dir(&details)?;
                }
            }
            let details = MemoryFileDetails {
                path: segments.iter().fold(self.root.clone(), |p, s| p.join(s)),
                relative_path: RelativePath::new(true, segments)?,
                mtime: &self.mtime,
                contents,
            };
            visitor.visit_file(&details)?;
        }
        Ok(())
    }
}
