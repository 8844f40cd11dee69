use std::path::Path as StdPath;
use std::sync::Arc;

use log::debug;
use log::warn;

use crate::cache::DefaultFileSystemMirror;
use crate::cache::FileSystemMirror;
use crate::cache::NullMirror;
use crate::collection::FileCollection;
use crate::collection::FileCollectionElement;
use crate::collection::SnapshotStrategy;
use crate::errors::Error;
use crate::guard::ProducerGuard;
use crate::hash::FileHasher;
use crate::hash::Sha256Hasher;
use crate::path::PathInterner;
use crate::path::RelativePath;
use crate::snapshot::AggregateSnapshot;
use crate::snapshot::FileHashSnapshot;
use crate::snapshot::SnapshotEntry;
use crate::snapshot::TreeSnapshot;
use crate::stat::FileSystem;
use crate::stat::FileType;
use crate::stat::NativeFileSystem;
use crate::tree::DirectoryTree;
use crate::tree::FileTreeSource;
use crate::tree::FileVisitDetails;
use crate::tree::FileVisitor;

/// Snapshots paths, directory trees and collections, reusing what the mirror
/// already knows and never computing the same key twice concurrently.
///
/// Every cached operation follows the same steps: look the key up in the
/// mirror, and on a miss take the producer guard for the key, look again,
/// compute, and store the result. Errors are returned to the caller and never
/// cached.
///
/// Several snapshotters may share one mirror. Each has its own guards, so
/// deduplication only spans callers of the same snapshotter.
pub struct FileSystemSnapshotter {
    fs: Arc<dyn FileSystem>,
    hasher: Arc<dyn FileHasher>,
    mirror: Arc<dyn FileSystemMirror>,
    interner: Arc<PathInterner>,
    strategy: SnapshotStrategy,
    producing_self_snapshots: ProducerGuard<Arc<str>>,
    producing_trees: ProducerGuard<Arc<str>>,
    producing_all_snapshots: ProducerGuard<Arc<str>>,
}

impl FileSystemSnapshotter {
    /// Creates a snapshotter from its collaborators.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        hasher: Arc<dyn FileHasher>,
        mirror: Arc<dyn FileSystemMirror>,
    ) -> Self {
        Self {
            fs,
            hasher,
            mirror,
            interner: Arc::new(PathInterner::new()),
            strategy: SnapshotStrategy::default(),
            producing_self_snapshots: ProducerGuard::new(),
            producing_trees: ProducerGuard::new(),
            producing_all_snapshots: ProducerGuard::new(),
        }
    }

    /// Local file system, SHA-256 and an unbounded mirror.
    pub fn with_cache() -> Self {
        Self::with_mirror(Arc::new(DefaultFileSystemMirror::new()))
    }

    /// Local file system and SHA-256, recomputing every request.
    pub fn without_cache() -> Self {
        Self::with_mirror(Arc::new(NullMirror::new()))
    }

    /// Local file system and SHA-256 over the given mirror.
    pub fn with_mirror(mirror: Arc<dyn FileSystemMirror>) -> Self {
        Self::new(Arc::new(NativeFileSystem), Arc::new(Sha256Hasher), mirror)
    }

    /// Replaces the strategy used by [`Self::snapshot_all`]. Aggregates are
    /// cached by path alone, so snapshotters sharing a mirror must agree on
    /// it.
    pub fn with_strategy(mut self, strategy: SnapshotStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shares an interner with other components.
    pub fn with_interner(mut self, interner: Arc<PathInterner>) -> Self {
        self.interner = interner;
        self
    }

    /// The mirror, for invalidation.
    pub fn mirror(&self) -> &Arc<dyn FileSystemMirror> {
        &self.mirror
    }

    /// The interner producing cache keys.
    pub fn interner(&self) -> &Arc<PathInterner> {
        &self.interner
    }

    /// Strategy used by [`Self::snapshot_all`].
    pub fn strategy(&self) -> SnapshotStrategy {
        self.strategy
    }

    /// Snapshot of `path` itself: missing, a hashed file, or a directory.
    pub fn snapshot_self<P: AsRef<StdPath>>(&self, path: P) -> Result<Arc<SnapshotEntry>, Error> {
        let key = self.interner.intern_path(path.as_ref())?;
        if let Some(snapshot) = self.mirror.get_file(&key) {
            debug!("self snapshot hit for {key}");
            return Ok(snapshot);
        }
        self.producing_self_snapshots.guard_by_key(&key, || {
            if let Some(snapshot) = self.mirror.get_file(&key) {
                return Ok(snapshot);
            }
            debug!("computing self snapshot of {key}");
            let snapshot = Arc::new(self.calculate_details(&key)?);
            self.mirror.put_file(snapshot.clone());
            Ok(snapshot)
        })
    }

    /// One hash summarizing `path` and everything below it, combined with
    /// the configured strategy.
    pub fn snapshot_all<P: AsRef<StdPath>>(&self, path: P) -> Result<Arc<AggregateSnapshot>, Error> {
        let key = self.interner.intern_path(path.as_ref())?;
        if let Some(snapshot) = self.mirror.get_content(&key) {
            debug!("content snapshot hit for {key}");
            return Ok(snapshot);
        }
        self.producing_all_snapshots.guard_by_key(&key, || {
            if let Some(snapshot) = self.mirror.get_content(&key) {
                return Ok(snapshot);
            }
            debug!("computing content snapshot of {key}");
            let collection = FileCollection::of_path(&*key);
            let snapshot = Arc::new(self.snapshot_collection(&collection, self.strategy)?);
            self.mirror.put_content(key.clone(), snapshot.clone());
            Ok(snapshot)
        })
    }

    /// Every entry below the directory at `path`.
    pub fn snapshot_directory_tree<P: AsRef<StdPath>>(
        &self,
        path: P,
    ) -> Result<Arc<TreeSnapshot>, Error> {
        self.snapshot_directory_tree_with(&DirectoryTree::new(path))
    }

    /// Every entry below `tree`'s directory that its filter lets through.
    ///
    /// Only unfiltered trees are cached: the mirror is keyed by directory
    /// alone and could not tell two filters apart.
    pub fn snapshot_directory_tree_with(
        &self,
        tree: &DirectoryTree,
    ) -> Result<Arc<TreeSnapshot>, Error> {
        let key = self.interner.intern_path(tree.dir())?;
        if tree.is_filtered() {
            debug!("walking filtered tree {key}");
            return Ok(Arc::new(self.walk(Some(key), tree)?));
        }

        if let Some(snapshot) = self.mirror.get_directory_tree(&key) {
            debug!("tree snapshot hit for {key}");
            return Ok(snapshot);
        }
        self.producing_trees.guard_by_key(&key, || {
            if let Some(snapshot) = self.mirror.get_directory_tree(&key) {
                return Ok(snapshot);
            }
            debug!("walking tree {key}");
            let snapshot = Arc::new(self.walk(Some(key.clone()), tree)?);
            self.mirror.put_directory(snapshot.clone());
            Ok(snapshot)
        })
    }

    /// Every entry of a tree that is not a plain directory. Such trees have
    /// no path to key them by and are never cached.
    pub fn snapshot_tree(&self, tree: &dyn FileTreeSource) -> Result<TreeSnapshot, Error> {
        self.walk(None, tree)
    }

    /// Flattens `collection` into one ordered list of entries.
    ///
    /// A path contributes its own snapshot, followed by its tree when it is a
    /// directory. Directory trees and other trees contribute their entries.
    pub fn expand_to_entries(&self, collection: &FileCollection) -> Result<Vec<SnapshotEntry>, Error> {
        let mut entries = Vec::new();
        for element in collection.elements() {
            match element {
                FileCollectionElement::Path(path) => {
                    let snapshot = self.snapshot_self(path)?;
                    entries.push(SnapshotEntry::clone(&snapshot));
                    match *snapshot {
                        SnapshotEntry::Missing { .. } | SnapshotEntry::File { .. } => {}
                        SnapshotEntry::Directory { .. } => {
                            let tree = self.snapshot_directory_tree(path)?;
                            entries.extend(tree.entries.iter().cloned());
                        }
                    }
                }
                FileCollectionElement::DirectoryTree(tree) => {
                    let tree = self.snapshot_directory_tree_with(tree)?;
                    entries.extend(tree.entries.iter().cloned());
                }
                FileCollectionElement::Tree(tree) => {
                    entries.extend(self.snapshot_tree(tree.as_ref())?.entries);
                }
            }
        }
        Ok(entries)
    }

    /// Combines everything in `collection` into one hash. Not cached.
    pub fn snapshot_collection(
        &self,
        collection: &FileCollection,
        strategy: SnapshotStrategy,
    ) -> Result<AggregateSnapshot, Error> {
        let entries = self.expand_to_entries(collection)?;
        Ok(strategy.combine(&entries))
    }

    fn walk(&self, base_path: Option<Arc<str>>, tree: &dyn FileTreeSource) -> Result<TreeSnapshot, Error> {
        let mut collector = EntryCollector {
            snapshotter: self,
            entries: Vec::new(),
        };
        tree.visit(&mut collector)?;
        Ok(TreeSnapshot {
            base_path,
            entries: collector.entries,
        })
    }

    fn calculate_details(&self, key: &Arc<str>) -> Result<SnapshotEntry, Error> {
        let path = StdPath::new(&**key);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let stat = self.fs.stat(path)?;
        match stat.file_type {
            FileType::Missing => Ok(SnapshotEntry::Missing {
                path: key.clone(),
                name,
            }),
            FileType::Directory => Ok(SnapshotEntry::Directory {
                path: key.clone(),
                relative_path: RelativePath::from_std(false, StdPath::new(&name))?,
                root: true,
            }),
            FileType::RegularFile => match self.hasher.hash_file(path, &stat) {
                Ok(hash) => Ok(SnapshotEntry::File {
                    path: key.clone(),
                    relative_path: RelativePath::from_std(true, StdPath::new(&name))?,
                    root: true,
                    content: FileHashSnapshot {
                        hash,
                        mtime: stat.mtime,
                    },
                }),
                Err(Error::NotFound(_)) => {
                    warn!("{key} disappeared before it could be hashed");
                    Ok(SnapshotEntry::Missing {
                        path: key.clone(),
                        name,
                    })
                }
                Err(e) => Err(e),
            },
            FileType::Other => Err(Error::UnrecognizedFileType {
                path: key.to_string(),
                kind: format!("{:?}", stat.file_type),
            }),
        }
    }
}

/// Turns visited tree entries into snapshot entries.
struct EntryCollector<'a> {
    snapshotter: &'a FileSystemSnapshotter,
    entries: Vec<SnapshotEntry>,
}

impl EntryCollector<'_> {
    fn intern(&self, details: &dyn FileVisitDetails) -> Result<Arc<str>, Error> {
        self.snapshotter.interner.intern_path(details.file())
    }
}

impl FileVisitor for EntryCollector<'_> {
    fn visit_dir(&mut self, details: &dyn FileVisitDetails) -> Result<(), Error> {
        self.entries.push(SnapshotEntry::Directory {
            path: self.intern(details)?,
            relative_path: details.relative_path().clone(),
            root: false,
        });
        Ok(())
    }

    fn visit_file(&mut self, details: &dyn FileVisitDetails) -> Result<(), Error> {
        let path = self.intern(details)?;
        let entry = match details.hash(self.snapshotter.hasher.as_ref()) {
            Ok(hash) => SnapshotEntry::File {
                path,
                relative_path: details.relative_path().clone(),
                root: false,
                content: FileHashSnapshot {
                    hash,
                    mtime: details.last_modified().to_owned(),
                },
            },
            Err(Error::NotFound(_)) => {
                warn!("{path} disappeared before it could be hashed");
                SnapshotEntry::Missing {
                    name: details
                        .relative_path()
                        .last_name()
                        .unwrap_or_default()
                        .to_owned(),
                    path,
                }
            }
            Err(e) => return Err(e),
        };
        self.entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::collection::CompareStrategy;
    use crate::collection::NormalizationStrategy;
    use crate::filter::FilterSet;
    use crate::hash::HashCode;
    use crate::stat::FileMetadataSnapshot;
    use crate::test_utils::CountingHasher;
    use crate::test_utils::TestRoot;
    use crate::test_utils::describe_tree;
    use crate::tree::MemoryTree;

    fn counting() -> (FileSystemSnapshotter, Arc<CountingHasher>) {
        let hasher = Arc::new(CountingHasher::new());
        let snapshotter = FileSystemSnapshotter::new(
            Arc::new(NativeFileSystem),
            hasher.clone(),
            Arc::new(DefaultFileSystemMirror::new()),
        );
        (snapshotter, hasher)
    }

    fn file_hash(entry: &SnapshotEntry) -> HashCode {
        match entry {
            SnapshotEntry::File { content, .. } => content.hash,
            other => panic!("expected a file, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_self_classifies() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();

        let file = snapshotter.snapshot_self(root.join("file1.txt")).unwrap();
        match &*file {
            SnapshotEntry::File {
                relative_path,
                root,
                content,
                ..
            } => {
                assert_eq!(relative_path.to_string(), "file1.txt");
                assert!(relative_path.is_file());
                assert!(*root);
                assert!(!content.mtime.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let dir = snapshotter.snapshot_self(root.join("dir1")).unwrap();
        assert_eq!(dir.file_type(), FileType::Directory);
        assert_eq!(dir.name(), "dir1");

        let missing = snapshotter.snapshot_self(root.join("nope.txt")).unwrap();
        assert_eq!(
            *missing,
            SnapshotEntry::Missing {
                path: snapshotter.interner().intern_path(&root.join("nope.txt")).unwrap(),
                name: "nope.txt".into(),
            }
        );
    }

    #[test]
    fn snapshot_self_is_cached() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();

        let first = snapshotter.snapshot_self(root.join("file2.txt")).unwrap();
        let second = snapshotter.snapshot_self(root.join("file2.txt")).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hasher.calls(), 1);
    }

    #[test]
    fn equivalent_paths_share_a_key() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();
        snapshotter.snapshot_self(root.join("dir1/file3.txt")).unwrap();
        snapshotter
            .snapshot_self(root.join("dir1/./file3.txt"))
            .unwrap();
        assert_eq!(hasher.calls(), 1);
    }

    #[test]
    fn trailing_slash_and_parent_segments_share_a_key() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();
        let plain = snapshotter.snapshot_directory_tree(root.join("dir3")).unwrap();
        let slashed = snapshotter.snapshot_directory_tree(root.join("dir3/")).unwrap();
        let dotted = snapshotter
            .snapshot_directory_tree(root.join("dir1/../dir3"))
            .unwrap();
        assert!(Arc::ptr_eq(&plain, &slashed));
        assert!(Arc::ptr_eq(&plain, &dotted));
        assert_eq!(hasher.calls(), 1);

        // Invalidating one spelling is seen through every other.
        let key = snapshotter.interner().intern_path(&root.join("dir3")).unwrap();
        assert_eq!(plain.base_path.as_ref(), Some(&key));
        snapshotter.mirror().invalidate(&key);
        root.create_file("dir3/file6.txt", "SIX").unwrap();
        let fresh = snapshotter.snapshot_directory_tree(root.join("dir3/")).unwrap();
        assert_ne!(file_hash(&fresh.entries[0]), file_hash(&plain.entries[0]));
    }

    #[test]
    fn uncached_snapshots_do_not_accumulate_keys() {
        let root = TestRoot::empty().unwrap();
        let snapshotter = FileSystemSnapshotter::without_cache();
        for i in 0..500 {
            snapshotter.snapshot_self(root.join(&format!("missing{i}"))).unwrap();
        }
        assert!(snapshotter.interner().len() <= 64);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_children_do_not_fail_the_walk() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = TestRoot::empty().unwrap();
        root.create_file("ok.txt", "o").unwrap();
        std::fs::write(root.path().join(OsStr::from_bytes(b"bad\xff.txt")), "b").unwrap();

        let snapshotter = FileSystemSnapshotter::with_cache();
        let tree = snapshotter.snapshot_directory_tree(root.path()).unwrap();
        let names: Vec<&str> = tree.entries.iter().map(SnapshotEntry::name).collect();
        assert_eq!(names, ["ok.txt"]);
    }

    #[test]
    fn file_root_tree_holds_the_file() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let tree = snapshotter
            .snapshot_directory_tree(root.join("file1.txt"))
            .unwrap();
        assert_eq!(tree.entries.len(), 1);
        let entry = &tree.entries[0];
        assert_eq!(entry.name(), "file1.txt");
        assert_eq!(
            file_hash(entry),
            file_hash(&snapshotter.snapshot_self(root.join("file1.txt")).unwrap())
        );
    }

    #[test]
    fn stale_until_invalidated() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let path = root.join("file1.txt");

        let before = snapshotter.snapshot_self(&path).unwrap();
        root.create_file("file1.txt", "changed").unwrap();
        let stale = snapshotter.snapshot_self(&path).unwrap();
        assert_eq!(before, stale);

        let key = snapshotter.interner().intern_path(&path).unwrap();
        snapshotter.mirror().invalidate(&key);
        let fresh = snapshotter.snapshot_self(&path).unwrap();
        assert_ne!(file_hash(&before), file_hash(&fresh));
    }

    #[test]
    fn without_cache_recomputes() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::without_cache();
        let path = root.join("file1.txt");
        let before = snapshotter.snapshot_self(&path).unwrap();
        root.create_file("file1.txt", "changed").unwrap();
        let after = snapshotter.snapshot_self(&path).unwrap();
        assert_ne!(file_hash(&before), file_hash(&after));
    }

    #[test]
    fn tree_matches_disk() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let tree = snapshotter.snapshot_directory_tree(root.path()).unwrap();
        assert_eq!(root.compare("", &tree).unwrap(), None);
        assert_eq!(
            tree.base_path,
            Some(snapshotter.interner().intern_path(root.path()).unwrap())
        );
        assert!(tree.entries.iter().all(|e| match e {
            SnapshotEntry::File { root, .. } | SnapshotEntry::Directory { root, .. } => !root,
            SnapshotEntry::Missing { .. } => false,
        }));
    }

    #[test]
    fn cold_scans_are_identical() {
        let root = TestRoot::new().unwrap();
        let first = FileSystemSnapshotter::with_cache()
            .snapshot_directory_tree(root.path())
            .unwrap();
        let second = FileSystemSnapshotter::with_cache()
            .snapshot_directory_tree(root.path())
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn concurrent_tree_requests_walk_once() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();
        let snapshotter = Arc::new(snapshotter);
        let barrier = Arc::new(Barrier::new(8));
        let dir = root.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let snapshotter = snapshotter.clone();
                let barrier = barrier.clone();
                let dir = dir.clone();
                thread::spawn(move || {
                    barrier.wait();
                    snapshotter.snapshot_directory_tree(&dir).unwrap()
                })
            })
            .collect();
        let trees: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Five files in the fixture, each hashed exactly once.
        assert_eq!(hasher.calls(), 5);
        for tree in &trees[1..] {
            assert_eq!(**tree, *trees[0]);
        }
    }

    #[test]
    fn concurrent_self_requests_hash_once() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();
        let snapshotter = Arc::new(snapshotter);
        let barrier = Arc::new(Barrier::new(4));
        let path = root.join("dir3/file6.txt");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let snapshotter = snapshotter.clone();
                let barrier = barrier.clone();
                let path = path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    snapshotter.snapshot_self(&path).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(hasher.calls(), 1);
    }

    #[test]
    fn filtered_trees_are_not_cached() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();

        let mut filter = FilterSet::new();
        filter.allow_extension("txt");
        filter.deny_path("dir3");
        let tree = DirectoryTree::with_filter(root.path(), filter);

        let first = snapshotter.snapshot_directory_tree_with(&tree).unwrap();
        let second = snapshotter.snapshot_directory_tree_with(&tree).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            describe_tree(&first)
                .iter()
                .map(|l| l.split('\t').next().unwrap().to_string())
                .collect::<Vec<_>>(),
            vec!["dir1/dir2/file4.txt", "dir1/file3.txt", "file1.txt", "file2.txt"]
        );
        // Four files hashed on each walk.
        assert_eq!(hasher.calls(), 8);

        snapshotter
            .snapshot_directory_tree_with(&DirectoryTree::new(root.path()))
            .unwrap();
        snapshotter
            .snapshot_directory_tree_with(&DirectoryTree::new(root.path()))
            .unwrap();
        assert_eq!(hasher.calls(), 8 + 5);
    }

    #[test]
    fn tree_scenario_with_eviction() {
        let root = TestRoot::empty().unwrap();
        root.create_file("d/a.txt", "x").unwrap();
        root.create_file("d/b.txt", "y").unwrap();
        let (snapshotter, hasher) = counting();
        let dir = root.join("d");

        let first = snapshotter.snapshot_directory_tree(&dir).unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].name(), "a.txt");
        assert_eq!(first.entries[1].name(), "b.txt");
        assert_ne!(file_hash(&first.entries[0]), file_hash(&first.entries[1]));
        assert_eq!(hasher.calls(), 2);

        let again = snapshotter.snapshot_directory_tree(&dir).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(hasher.calls(), 2);

        let key = snapshotter.interner().intern_path(&dir).unwrap();
        snapshotter.mirror().invalidate(&key);
        root.create_file("d/a.txt", "z").unwrap();

        let after = snapshotter.snapshot_directory_tree(&dir).unwrap();
        assert_eq!(hasher.calls(), 4);
        let expected_z = crate::hash::Sha256Hasher
            .hash_content("z", &mut &b"z"[..])
            .unwrap();
        assert_eq!(file_hash(&after.entries[0]), expected_z);
        assert_eq!(after.entries[1], first.entries[1]);
    }

    #[test]
    fn snapshot_tree_is_not_cached() {
        let (snapshotter, hasher) = counting();
        let mut tree = MemoryTree::new("/archive.zip");
        tree.insert("META-INF/MANIFEST.MF", "Manifest-Version: 1.0").unwrap();
        tree.insert("Main.class", "cafebabe").unwrap();

        let first = snapshotter.snapshot_tree(&tree).unwrap();
        let second = snapshotter.snapshot_tree(&tree).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.base_path, None);
        assert_eq!(
            describe_tree(&first)
                .iter()
                .map(|l| l.split('\t').take(2).collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>(),
            vec!["META-INF DIR", "META-INF/MANIFEST.MF FILE", "Main.class FILE"]
        );
        assert_eq!(hasher.calls(), 4);
    }

    #[test]
    fn expand_to_entries_preserves_roots() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let mut memory = MemoryTree::new("/generated");
        memory.insert("gen.rs", "fn main() {}").unwrap();

        let mut collection = FileCollection::new();
        collection
            .push_path(root.join("file2.txt"))
            .push_path(root.join("dir1"))
            .push_path(root.join("absent"))
            .push_directory_tree(DirectoryTree::new(root.join("dir3")))
            .push_tree(Arc::new(memory));

        let entries = snapshotter.expand_to_entries(&collection).unwrap();
        let names: Vec<(&str, FileType)> =
            entries.iter().map(|e| (e.name(), e.file_type())).collect();
        assert_eq!(
            names,
            vec![
                ("file2.txt", FileType::RegularFile),
                ("dir1", FileType::Directory),
                ("dir2", FileType::Directory),
                ("dir_empty1", FileType::Directory),
                ("file4.txt", FileType::RegularFile),
                ("file3.txt", FileType::RegularFile),
                ("absent", FileType::Missing),
                ("file6.txt", FileType::RegularFile),
                ("gen.rs", FileType::RegularFile),
            ]
        );
    }

    #[test]
    fn snapshot_all_is_cached_and_content_sensitive() {
        let root = TestRoot::new().unwrap();
        let (snapshotter, hasher) = counting();

        let first = snapshotter.snapshot_all(root.join("dir1")).unwrap();
        let calls = hasher.calls();
        assert_eq!(calls, 2);
        let second = snapshotter.snapshot_all(root.join("dir1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(hasher.calls(), calls);

        root.create_file("dir1/dir2/file4.txt", "FOUR").unwrap();
        snapshotter.mirror().invalidate_all();
        let third = snapshotter.snapshot_all(root.join("dir1")).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn snapshot_all_follows_strategy() {
        let one = TestRoot::empty().unwrap();
        let two = TestRoot::empty().unwrap();
        for root in [&one, &two] {
            root.create_file("src/a.txt", "a").unwrap();
            root.create_file("src/b.txt", "b").unwrap();
        }

        let absolute = FileSystemSnapshotter::with_cache();
        assert_ne!(
            absolute.snapshot_all(one.join("src")).unwrap(),
            absolute.snapshot_all(two.join("src")).unwrap()
        );

        let relative = FileSystemSnapshotter::with_cache().with_strategy(SnapshotStrategy::new(
            CompareStrategy::Unordered,
            NormalizationStrategy::Relative,
        ));
        assert_eq!(
            relative.snapshot_all(one.join("src")).unwrap(),
            relative.snapshot_all(two.join("src")).unwrap()
        );
    }

    #[test]
    fn snapshot_all_of_missing_path() {
        let root = TestRoot::empty().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let missing = snapshotter.snapshot_all(root.join("gone")).unwrap();
        root.create_file("gone", "").unwrap();
        snapshotter.mirror().invalidate_all();
        let present = snapshotter.snapshot_all(root.join("gone")).unwrap();
        assert_ne!(missing, present);
    }

    struct FailingFileSystem;

    impl FileSystem for FailingFileSystem {
        fn stat(&self, path: &StdPath) -> Result<FileMetadataSnapshot, Error> {
            if path.ends_with("special") {
                Ok(FileMetadataSnapshot::new(FileType::Other, String::new(), 0))
            } else {
                Err(Error::Read {
                    what: path.display().to_string(),
                    how: "permission denied".into(),
                })
            }
        }
    }

    #[test]
    fn failures_are_not_cached() {
        let mirror = Arc::new(DefaultFileSystemMirror::new());
        let snapshotter = FileSystemSnapshotter::new(
            Arc::new(FailingFileSystem),
            Arc::new(Sha256Hasher),
            mirror.clone(),
        );

        let err = snapshotter.snapshot_self("/some/special").unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFileType { .. }));
        let err = snapshotter.snapshot_self("/some/file").unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(mirror.is_empty());
    }

    /// Fails the first stat, after holding it long enough for another
    /// caller to queue up behind it.
    struct FailsOnce {
        entered: AtomicBool,
        failed: AtomicBool,
    }

    impl FileSystem for FailsOnce {
        fn stat(&self, path: &StdPath) -> Result<FileMetadataSnapshot, Error> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                self.entered.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                return Err(Error::Read {
                    what: path.display().to_string(),
                    how: "transient failure".into(),
                });
            }
            NativeFileSystem.stat(path)
        }
    }

    #[test]
    fn waiting_caller_retries_after_failure() {
        let root = TestRoot::new().unwrap();
        let fs = Arc::new(FailsOnce {
            entered: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });
        let snapshotter = Arc::new(FileSystemSnapshotter::new(
            fs.clone(),
            Arc::new(Sha256Hasher),
            Arc::new(DefaultFileSystemMirror::new()),
        ));
        let path = root.join("file1.txt");

        let first = {
            let snapshotter = snapshotter.clone();
            let path = path.clone();
            thread::spawn(move || snapshotter.snapshot_self(&path))
        };
        while !fs.entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        let second = {
            let snapshotter = snapshotter.clone();
            let path = path.clone();
            thread::spawn(move || snapshotter.snapshot_self(&path))
        };

        assert!(matches!(first.join().unwrap(), Err(Error::Read { .. })));
        let entry = second.join().unwrap().unwrap();
        assert_eq!(entry.file_type(), FileType::RegularFile);
        assert_eq!(
            snapshotter.snapshot_self(&path).unwrap().file_type(),
            FileType::RegularFile
        );
    }

    #[test]
    fn vanished_file_becomes_missing() {
        struct LyingFileSystem;

        impl FileSystem for LyingFileSystem {
            fn stat(&self, _path: &StdPath) -> Result<FileMetadataSnapshot, Error> {
                Ok(FileMetadataSnapshot::new(FileType::RegularFile, String::new(), 1))
            }
        }

        let root = TestRoot::empty().unwrap();
        let snapshotter = FileSystemSnapshotter::new(
            Arc::new(LyingFileSystem),
            Arc::new(Sha256Hasher),
            Arc::new(DefaultFileSystemMirror::new()),
        );
        let entry = snapshotter.snapshot_self(root.join("ghost.txt")).unwrap();
        assert_eq!(entry.file_type(), FileType::Missing);
        assert_eq!(entry.name(), "ghost.txt");
    }

    #[test]
    fn tree_of_deleted_directory_is_empty_after_invalidation() {
        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let dir = root.join("dir3");
        assert_eq!(snapshotter.snapshot_directory_tree(&dir).unwrap().entries.len(), 1);

        root.remove("dir3").unwrap();
        snapshotter.mirror().invalidate_all();
        assert!(snapshotter
            .snapshot_directory_tree(&dir)
            .unwrap()
            .entries
            .is_empty());
        assert_eq!(
            snapshotter.snapshot_self(&dir).unwrap().file_type(),
            FileType::Missing
        );
    }

    #[test]
    fn reentrant_snapshot_inside_visitor_does_not_deadlock() {
        struct SelfReferencing<'a> {
            snapshotter: &'a FileSystemSnapshotter,
            dir: std::path::PathBuf,
        }

        impl FileTreeSource for SelfReferencing<'_> {
            fn visit(&self, _visitor: &mut dyn FileVisitor) -> Result<(), Error> {
                self.snapshotter.snapshot_directory_tree(&self.dir)?;
                Ok(())
            }
        }

        let root = TestRoot::new().unwrap();
        let snapshotter = FileSystemSnapshotter::with_cache();
        let dir = root.join("dir1");
        let key = snapshotter.interner().intern_path(&dir).unwrap();
        let tree = snapshotter
            .producing_trees
            .guard_by_key(&key, || {
                snapshotter.snapshot_tree(&SelfReferencing {
                    snapshotter: &snapshotter,
                    dir: dir.clone(),
                })
            })
            .unwrap();
        assert!(tree.entries.is_empty());
        assert!(snapshotter.mirror().get_directory_tree(&key).is_some());
        assert_eq!(snapshotter.producing_trees.in_flight(), 0);
    }
}
