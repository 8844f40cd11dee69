use std::collections::HashSet;
use std::fmt::Display;
use std::path::Component;
use std::path::Path as StdPath;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de;

use crate::errors::Error;

/// A custom deserializer function for a Vec<String> that checks for ".."
/// components.
fn deserialize_segments<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let segments = Vec::<String>::deserialize(deserializer)?;

    if segments.iter().any(|c| c == ".." || c == ".") {
        Err(de::Error::custom("Path segment cannot contain '..'"))
    } else {
        Ok(segments)
    }
}

/// The path of an entry relative to the root it was discovered under.
///
/// For a root entry (the target of a single path snapshot) this is just the
/// entry's own name. For entries found while walking a tree it holds every
/// segment below the tree's base directory.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq, PartialOrd, Ord)]
pub struct RelativePath {
    /// Whether the path names a file rather than a directory.
    is_file: bool,
    /// The portable segments of the path.
    #[serde(deserialize_with = "deserialize_segments")]
    segments: Vec<String>,
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl RelativePath {
    /// Builds a path from already validated segments.
    ///
    /// Segments must not contain separators and must not be `.`, `..` or
    /// empty; `Error::InvalidArgument` is returned otherwise.
    pub fn new<T: AsRef<str>>(is_file: bool, segments: &[T]) -> Result<Self, Error> {
        let mut c = Vec::with_capacity(segments.len());
        for seg in segments {
            let s = seg.as_ref();
            if s.contains('/') || s.contains('\\') || s == "." || s == ".." || s.is_empty() {
                return Err(Error::InvalidArgument(format!("Invalid path segment: {s}")));
            }
            c.push(s.to_string());
        }
        Ok(Self { is_file, segments: c })
    }

    /// Builds a path from a platform path that is already relative to some
    /// base directory. Root and `.` components are skipped.
    pub fn from_std(is_file: bool, path: &StdPath) -> Result<Self, Error> {
        let mut segments = Vec::new();
        for comp in path.components() {
            match comp {
                std::path::Component::Normal(s) => {
                    let s = s.to_str().ok_or_else(|| Error::InvalidPath {
                        what: format!("non UTF-8 path {}", path.display()),
                    })?;
                    segments.push(s.to_string());
                }
                std::path::Component::CurDir | std::path::Component::RootDir => {}
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "relative path {} escapes its base",
                        path.display()
                    )));
                }
            }
        }
        Ok(Self { is_file, segments })
    }

    /// Whether the path names a file.
    pub fn is_file(&self) -> bool {
        self.is_file
    }

    /// The individual segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the last segment, typically the file or directory name.
    pub fn last_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }
}

/// Returns the absolute form of `path` as a UTF-8 string, without touching
/// the file system.
///
/// `.` and `..` segments are resolved lexically and trailing separators
/// dropped, so every spelling of a path yields the same key. Symlinks are not
/// resolved.
pub fn canonical_path_string(path: &StdPath) -> Result<String, Error> {
    let absolute = std::path::absolute(path).map_err(|e| Error::InvalidPath {
        what: format!("{}: {e}", path.display()),
    })?;
    let mut normalized = PathBuf::new();
    for comp in absolute.components() {
        match comp {
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::InvalidPath {
            what: format!("non UTF-8 path {}", normalized.display()),
        })
}

// Interned keys are pruned once the set grows past this many entries, or
// twice the number that survived the previous pruning.
const MIN_PRUNE_THRESHOLD: usize = 64;

#[derive(Debug)]
struct InternedStrings {
    strings: HashSet<Arc<str>>,
    prune_at: usize,
}

impl Default for InternedStrings {
    fn default() -> Self {
        Self {
            strings: HashSet::new(),
            prune_at: MIN_PRUNE_THRESHOLD,
        }
    }
}

impl InternedStrings {
    /// Forgets strings nobody but the interner refers to any more.
    fn prune(&mut self) {
        self.strings.retain(|s| Arc::strong_count(s) > 1);
        self.prune_at = MIN_PRUNE_THRESHOLD.max(self.strings.len() * 2);
    }
}

/// Hands out one shared `Arc<str>` per distinct canonical path so cache and
/// guard keys compare and hash by value but are cheap to clone.
///
/// Strings are held only while something else refers to them: once the last
/// outside clone is dropped the entry is forgotten on a later insert.
#[derive(Debug, Default)]
pub struct PathInterner {
    strings: Mutex<InternedStrings>,
}

impl PathInterner {
    /// Creates an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns an arbitrary string.
    pub fn intern(&self, value: &str) -> Arc<str> {
        let mut interned = self.strings.lock();
        if let Some(existing) = interned.strings.get(value) {
            return existing.clone();
        }
        if interned.strings.len() >= interned.prune_at {
            interned.prune();
        }
        let ret: Arc<str> = Arc::from(value);
        interned.strings.insert(ret.clone());
        ret
    }

    /// Canonicalizes `path` and interns the result.
    pub fn intern_path(&self, path: &StdPath) -> Result<Arc<str>, Error> {
        Ok(self.intern(&canonical_path_string(path)?))
    }

    /// Number of distinct strings held, including ones no longer referenced
    /// that have not been pruned yet.
    pub fn len(&self) -> usize {
        self.strings.lock().strings.len()
    }

    /// Whether nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
