//! Fixtures shared by the crate's tests.
use std::fs;
use std::fs::create_dir_all;
use std::io::Read;
use std::path::Path as StdPath;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use similar::ChangeTag;
use similar::TextDiff;
use tempdir::TempDir;

use crate::Error;
use crate::FileHasher;
use crate::FileMetadataSnapshot;
use crate::HashCode;
use crate::Sha256Hasher;
use crate::SnapshotEntry;
use crate::TreeSnapshot;

// (relative path, contents, is directory)
pub(crate) static TEMP_FILES: &[(&str, &str, bool)] = &[
    ("file1.txt", "one", false),
    ("file2.txt", "two", false),
    ("dir1", "", true),
    ("dir1/file3.txt", "three", false),
    ("dir1/dir2", "", true),
    ("dir1/dir2/file4.txt", "four", false),
    ("dir1/dir2/dir_empty1", "", true),
    ("dir3", "", true),
    ("dir3/file6.txt", "six", false),
];

fn create_error(what: String, e: std::io::Error) -> Error {
    Error::Create {
        what,
        how: e.to_string(),
    }
}

/// A temporary directory populated with a small fixture tree.
#[derive(Debug)]
pub struct TestRoot {
    /// Owns the directory; dropping the fixture deletes it.
    pub root: TempDir,
}

impl TestRoot {
    /// Creates a temporary directory holding the fixture tree.
    pub fn new() -> Result<Self, Error> {
        let ret = Self::empty()?;
        for (relative_path, contents, is_dir) in TEMP_FILES {
            if *is_dir {
                ret.create_dir(relative_path)?;
            } else {
                ret.create_file(relative_path, contents)?;
            }
        }
        Ok(ret)
    }

    /// Creates an empty temporary directory.
    pub fn empty() -> Result<Self, Error> {
        let root = TempDir::new("fs-mirror")
            .map_err(|e| create_error("temporary directory".into(), e))?;
        Ok(Self { root })
    }

    /// Root of the fixture.
    pub fn path(&self) -> &StdPath {
        self.root.path()
    }

    /// Absolute path of `relative_path` inside the fixture.
    pub fn join(&self, relative_path: &str) -> PathBuf {
        self.root.path().join(relative_path)
    }

    /// Writes `content` to `relative_path`, creating parents as needed.
    pub fn create_file(&self, relative_path: &str, content: &str) -> Result<(), Error> {
        let full_path = self.join(relative_path);
        if let Some(parent) = full_path.parent() {
            create_dir_all(parent).map_err(|e| create_error(parent.display().to_string(), e))?;
        }
        fs::write(&full_path, content)
            .map_err(|e| create_error(full_path.display().to_string(), e))
    }

    /// Creates the directory `relative_path`.
    pub fn create_dir(&self, relative_path: &str) -> Result<(), Error> {
        let full_path = self.join(relative_path);
        create_dir_all(&full_path).map_err(|e| create_error(full_path.display().to_string(), e))
    }

    /// Removes the file or directory tree at `relative_path`.
    pub fn remove(&self, relative_path: &str) -> Result<(), Error> {
        let full_path = self.join(relative_path);
        let ret = if full_path.is_dir() {
            fs::remove_dir_all(&full_path)
        } else {
            fs::remove_file(&full_path)
        };
        ret.map_err(|e| Error::from_io(full_path.display().to_string(), e))
    }

    /// Returns `None` if `tree` lists exactly what is on disk below
    /// `relative_dir`, in the same order, or a diff otherwise.
    pub fn compare(&self, relative_dir: &str, tree: &TreeSnapshot) -> Result<Option<String>, Error> {
        let on_disk = cross_check::get_recursive_files(&self.join(relative_dir))?.join("\n");
        let snapshot = describe_tree(tree).join("\n");

        let diff = TextDiff::from_lines(&on_disk, &snapshot);
        let mut diffs = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => continue,
            };
            diffs.push_str(&format!("{sign}{change}"));
        }
        if diffs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(diffs))
        }
    }
}

/// One line per entry: relative path, kind, and hash for files.
pub fn describe_tree(tree: &TreeSnapshot) -> Vec<String> {
    tree.entries
        .iter()
        .map(|entry| match entry {
            SnapshotEntry::Missing { name, .. } => format!("{name}\tMISSING"),
            SnapshotEntry::Directory { relative_path, .. } => format!("{relative_path}\tDIR"),
            SnapshotEntry::File {
                relative_path,
                content,
                ..
            } => format!("{relative_path}\tFILE\t{}", content.hash),
        })
        .collect()
}

/// A SHA-256 hasher that counts how often it is asked for a hash.
#[derive(Debug, Default)]
pub struct CountingHasher {
    calls: AtomicUsize,
}

impl CountingHasher {
    /// Creates a hasher with a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hashes computed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileHasher for CountingHasher {
    fn hash_content(&self, what: &str, content: &mut dyn Read) -> Result<HashCode, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Sha256Hasher.hash_content(what, content)
    }

    fn hash_file(&self, path: &StdPath, stat: &FileMetadataSnapshot) -> Result<HashCode, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Sha256Hasher.hash_file(path, stat)
    }
}

// Independent of the crate's own walk: an explicit stack of directories and
// whole-file reads.
mod cross_check {
    use std::fs;
    use std::path::Path as StdPath;
    use std::path::PathBuf;

    use sha2::Digest;
    use sha2::Sha256;

    use crate::Error;

    fn io_error(path: &StdPath, e: std::io::Error) -> Error {
        Error::Read {
            what: path.display().to_string(),
            how: e.to_string(),
        }
    }

    fn sorted_children(dir: &StdPath) -> Result<Vec<PathBuf>, Error> {
        let mut children: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| io_error(dir, e))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<_, _>>()
            .map_err(|e| io_error(dir, e))?;
        children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(children)
    }

    /// Lists everything below `base` in pre-order, children sorted by name.
    pub(super) fn get_recursive_files(base: &StdPath) -> Result<Vec<String>, Error> {
        let mut listing = vec![];
        if !base.is_dir() {
            return Ok(listing);
        }
        let mut pending = sorted_children(base)?;
        pending.reverse();
        while let Some(path) = pending.pop() {
            let name = relative(base, &path);
            if path.is_dir() {
                listing.push(format!("{name}\tDIR"));
                pending.extend(sorted_children(&path)?.into_iter().rev());
            } else {
                let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
                listing.push(format!("{name}\tFILE\t{:x}", Sha256::digest(&bytes)));
            }
        }
        Ok(listing)
    }

    fn relative(base: &StdPath, path: &StdPath) -> String {
        path.strip_prefix(base)
            .unwrap_or(path)
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
