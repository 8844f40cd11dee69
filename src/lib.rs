//! A concurrency-safe, content-addressed cache of file system snapshots.
//!
//! A [`FileSystemSnapshotter`] answers three questions about a path: what is
//! at the path itself, what is below it, and what single hash summarizes
//! both. Answers are kept in a [`FileSystemMirror`] so a path is hashed once
//! until someone invalidates it, and concurrent requests for the same path
//! wait for the first one instead of repeating its work.
//!
//! ```rust
//! # use std::fs;
//! # use tempdir::TempDir;
//! use fs_mirror::FileSystemSnapshotter;
//! use fs_mirror::SnapshotEntry;
//!
//! let dir = TempDir::new("doc").unwrap();
//! fs::write(dir.path().join("a.txt"), "x").unwrap();
//! fs::write(dir.path().join("b.txt"), "y").unwrap();
//!
//! let snapshotter = FileSystemSnapshotter::with_cache();
//! let tree = snapshotter.snapshot_directory_tree(dir.path()).unwrap();
//! let names: Vec<&str> = tree.entries.iter().map(SnapshotEntry::name).collect();
//! assert_eq!(names, ["a.txt", "b.txt"]);
//!
//! // Served from the mirror until the directory is invalidated.
//! let again = snapshotter.snapshot_directory_tree(dir.path()).unwrap();
//! assert_eq!(tree, again);
//! assert_eq!(snapshotter.mirror().stats().hits, 1);
//!
//! let summary = snapshotter.snapshot_all(dir.path()).unwrap();
//! println!("{}", serde_json::to_string_pretty(&*summary).unwrap());
//! ```

mod cache;
mod collection;
mod errors;
mod filter;
mod guard;
pub mod hash;
mod path;
mod snapshot;
mod snapshotter;
mod stat;
mod tree;
pub mod utils;

pub use cache::CacheStats;
pub use cache::DefaultFileSystemMirror;
pub use cache::FileSystemMirror;
pub use cache::LruFileSystemMirror;
pub use cache::NullMirror;
pub use collection::CompareStrategy;
pub use collection::FileCollection;
pub use collection::FileCollectionElement;
pub use collection::NormalizationStrategy;
pub use collection::SnapshotStrategy;
pub use errors::Error;
pub use errors::Result;
pub use filter::FilterLevel;
pub use filter::FilterSet;
pub use guard::ProducerGuard;
pub use hash::FileHasher;
pub use hash::HashCode;
pub use hash::Sha256Hasher;
pub use path::PathInterner;
pub use path::RelativePath;
pub use path::canonical_path_string;
pub use snapshot::AggregateSnapshot;
pub use snapshot::ContentSnapshot;
pub use snapshot::FileHashSnapshot;
pub use snapshot::SnapshotEntry;
pub use snapshot::TreeSnapshot;
pub use snapshotter::FileSystemSnapshotter;
pub use stat::FileMetadataSnapshot;
pub use stat::FileSystem;
pub use stat::FileType;
pub use stat::NativeFileSystem;
pub use tree::DirectoryTree;
pub use tree::FileTreeSource;
pub use tree::FileVisitDetails;
pub use tree::FileVisitor;
pub use tree::MemoryTree;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
#[cfg(any(test, feature = "test_utils"))]
pub use test_utils::TestRoot;
