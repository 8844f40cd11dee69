use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use log::warn;
use lru::LruCache;
use parking_lot::Mutex;
use parking_lot::RwLock;
#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::snapshot::AggregateSnapshot;
use crate::snapshot::SnapshotEntry;
use crate::snapshot::TreeSnapshot;

/// Lookup counters of a mirror.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct CacheStats {
    /// Lookups that found a snapshot.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
}

#[derive(Default, Debug)]
struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsCounter {
    fn record<T>(&self, found: Option<T>) -> Option<T> {
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn get(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// The process-wide store of computed snapshots.
///
/// Three independent slots are keyed by canonical absolute path: the
/// snapshot of the path itself, the snapshot of the directory tree below it,
/// and the aggregate content hash of everything at and below it. Writes are
/// last-write-wins. Nothing is evicted by the mirror on its own initiative;
/// `invalidate` and `invalidate_all` exist for whoever learns that paths
/// changed.
pub trait FileSystemMirror: Send + Sync {
    /// Cached snapshot of `path` itself.
    fn get_file(&self, path: &str) -> Option<Arc<SnapshotEntry>>;

    /// Caches a path snapshot under its own path.
    fn put_file(&self, snapshot: Arc<SnapshotEntry>);

    /// Cached tree snapshot of the directory at `path`.
    fn get_directory_tree(&self, path: &str) -> Option<Arc<TreeSnapshot>>;

    /// Caches a tree snapshot under its base path.
    fn put_directory(&self, tree: Arc<TreeSnapshot>);

    /// Cached aggregate hash of `path`.
    fn get_content(&self, path: &str) -> Option<Arc<AggregateSnapshot>>;

    /// Caches an aggregate hash for `path`.
    fn put_content(&self, path: Arc<str>, snapshot: Arc<AggregateSnapshot>);

    /// Drops all three slots of `path`.
    fn invalidate(&self, path: &str);

    /// Drops everything.
    fn invalidate_all(&self);

    /// Hit and miss counts over all slots.
    fn stats(&self) -> CacheStats;
}

fn tree_key(tree: &TreeSnapshot) -> Option<Arc<str>> {
    if tree.base_path.is_none() {
        warn!("ignoring tree snapshot without a base path");
    }
    tree.base_path.clone()
}

/// A mirror that never stores anything, so every request recomputes.
#[derive(Default, Debug)]
pub struct NullMirror {
    stats: StatsCounter,
}

impl NullMirror {
    /// Creates the mirror.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystemMirror for NullMirror {
    fn get_file(&self, _path: &str) -> Option<Arc<SnapshotEntry>> {
        self.stats.record(None)
    }

    fn put_file(&self, _snapshot: Arc<SnapshotEntry>) {}

    fn get_directory_tree(&self, _path: &str) -> Option<Arc<TreeSnapshot>> {
        self.stats.record(None)
    }

    fn put_directory(&self, _tree: Arc<TreeSnapshot>) {}

    fn get_content(&self, _path: &str) -> Option<Arc<AggregateSnapshot>> {
        self.stats.record(None)
    }

    fn put_content(&self, _path: Arc<str>, _snapshot: Arc<AggregateSnapshot>) {}

    fn invalidate(&self, _path: &str) {}

    fn invalidate_all(&self) {}

    fn stats(&self) -> CacheStats {
        self.stats.get()
    }
}

/// An unbounded mirror backed by three hash maps.
#[derive(Default, Debug)]
pub struct DefaultFileSystemMirror {
    files: RwLock<HashMap<Arc<str>, Arc<SnapshotEntry>>>,
    trees: RwLock<HashMap<Arc<str>, Arc<TreeSnapshot>>>,
    contents: RwLock<HashMap<Arc<str>, Arc<AggregateSnapshot>>>,
    stats: StatsCounter,
}

impl DefaultFileSystemMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots held across all slots.
    pub fn len(&self) -> usize {
        self.files.read().len() + self.trees.read().len() + self.contents.read().len()
    }

    /// Whether all slots are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileSystemMirror for DefaultFileSystemMirror {
    fn get_file(&self, path: &str) -> Option<Arc<SnapshotEntry>> {
        self.stats.record(self.files.read().get(path).cloned())
    }

    fn put_file(&self, snapshot: Arc<SnapshotEntry>) {
        self.files.write().insert(snapshot.path().clone(), snapshot);
    }

    fn get_directory_tree(&self, path: &str) -> Option<Arc<TreeSnapshot>> {
        self.stats.record(self.trees.read().get(path).cloned())
    }

    fn put_directory(&self, tree: Arc<TreeSnapshot>) {
        if let Some(key) = tree_key(&tree) {
            self.trees.write().insert(key, tree);
        }
    }

    fn get_content(&self, path: &str) -> Option<Arc<AggregateSnapshot>> {
        self.stats.record(self.contents.read().get(path).cloned())
    }

    fn put_content(&self, path: Arc<str>, snapshot: Arc<AggregateSnapshot>) {
        self.contents.write().insert(path, snapshot);
    }

    fn invalidate(&self, path: &str) {
        self.files.write().remove(path);
        self.trees.write().remove(path);
        self.contents.write().remove(path);
    }

    fn invalidate_all(&self) {
        self.files.write().clear();
        self.trees.write().clear();
        self.contents.write().clear();
    }

    fn stats(&self) -> CacheStats {
        self.stats.get()
    }
}

/// A mirror holding at most `capacity` snapshots per slot, dropping the
/// least recently used ones first.
pub struct LruFileSystemMirror {
    files: Mutex<LruCache<Arc<str>, Arc<SnapshotEntry>>>,
    trees: Mutex<LruCache<Arc<str>, Arc<TreeSnapshot>>>,
    contents: Mutex<LruCache<Arc<str>, Arc<AggregateSnapshot>>>,
    stats: StatsCounter,
}

impl LruFileSystemMirror {
    /// Creates a mirror bounded to `capacity` entries per slot.
    pub fn new(capacity: NonZeroUsize) -> Self {
        LruFileSystemMirror {
            files: Mutex::new(LruCache::new(capacity)),
            trees: Mutex::new(LruCache::new(capacity)),
            contents: Mutex::new(LruCache::new(capacity)),
            stats: StatsCounter::default(),
        }
    }

    fn lookup<V: Clone>(&self, lru: &Mutex<LruCache<Arc<str>, V>>, path: &str) -> Option<V> {
        self.stats.record(lru.lock().get(path).cloned())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.files.lock().len() + self.trees.lock().len() + self.contents.lock().len()
    }
}

impl FileSystemMirror for LruFileSystemMirror {
    fn get_file(&self, path: &str) -> Option<Arc<SnapshotEntry>> {
        self.lookup(&self.files, path)
    }

    fn put_file(&self, snapshot: Arc<SnapshotEntry>) {
        self.files.lock().put(snapshot.path().clone(), snapshot);
    }

    fn get_directory_tree(&self, path: &str) -> Option<Arc<TreeSnapshot>> {
        self.lookup(&self.trees, path)
    }

    fn put_directory(&self, tree: Arc<TreeSnapshot>) {
        if let Some(key) = tree_key(&tree) {
            self.trees.lock().put(key, tree);
        }
    }

    fn get_content(&self, path: &str) -> Option<Arc<AggregateSnapshot>> {
        self.lookup(&self.contents, path)
    }

    fn put_content(&self, path: Arc<str>, snapshot: Arc<AggregateSnapshot>) {
        self.contents.lock().put(path, snapshot);
    }

    fn invalidate(&self, path: &str) {
        self.files.lock().pop(path);
        self.trees.lock().pop(path);
        self.contents.lock().pop(path);
    }

    fn invalidate_all(&self) {
        self.files.lock().clear();
        self.trees.lock().clear();
        self.contents.lock().clear();
    }

    fn stats(&self) -> CacheStats {
        self.stats.get()
    }
}
