use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

#[cfg(feature = "json_schema")]
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// What a walk does with one path.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterLevel {
    /// Leave the path out and do not descend into it.
    Deny,

    /// Descend into the directory without snapshotting it.
    Traverse,

    /// Snapshot the path, descending if it is a directory.
    Allow,
}

/// Inclusion and exclusion rules attached to a directory tree.
///
/// All paths are relative to the tree's base directory. An empty set
/// matches everything, which is the only case in which a tree snapshot may
/// be cached.
#[cfg_attr(feature = "json_schema", derive(JsonSchema))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FilterSet {
    /// When non-empty, only paths under one of these are snapshotted.
    include_roots: Vec<PathBuf>,

    /// Nothing under these is snapshotted, even inside an included root.
    exclude_roots: Vec<PathBuf>,

    /// When non-empty, only files with one of these lowercase extensions
    /// are snapshotted.
    extensions: BTreeSet<String>,

    /// When non-empty, only files with one of these names are snapshotted.
    file_names: BTreeSet<String>,
}

impl FilterSet {
    /// A filter that lets everything through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter from all four rule lists at once.
    pub fn create_with<P: AsRef<Path>, S: AsRef<str>>(
        allowed_paths: &[P],
        denied_paths: &[P],
        allowed_filenames: &[S],
        allowed_extensions: &[S],
    ) -> Self {
        let mut ret = Self::new();
        allowed_paths.iter().for_each(|p| ret.allow_path(p));
        denied_paths.iter().for_each(|p| ret.deny_path(p));
        allowed_filenames
            .iter()
            .for_each(|n| ret.allow_filename(n.as_ref()));
        allowed_extensions
            .iter()
            .for_each(|e| ret.allow_extension(e.as_ref()));
        ret
    }

    /// Whether no rule has been configured.
    pub fn is_empty(&self) -> bool {
        self.include_roots.is_empty()
            && self.exclude_roots.is_empty()
            && self.extensions.is_empty()
            && self.file_names.is_empty()
    }

    /// Only paths under `path` are snapshotted.
    pub fn allow_path<P: AsRef<Path>>(&mut self, path: P) {
        self.include_roots.push(path.as_ref().to_path_buf());
    }

    /// Nothing under `path` is snapshotted. Overrides allowed paths.
    pub fn deny_path<P: AsRef<Path>>(&mut self, path: P) {
        self.exclude_roots.push(path.as_ref().to_path_buf());
    }

    /// Lets files ending in `.ext` through, ignoring case.
    pub fn allow_extension(&mut self, ext: &str) {
        self.extensions.insert(ext.to_lowercase());
    }

    /// Lets files named exactly `name` through.
    pub fn allow_filename(&mut self, name: &str) {
        self.file_names.insert(name.to_string());
    }

    /// Determines what a walk does with `path`.
    pub fn matches<P: AsRef<Path>>(&self, path: P, is_dir: bool) -> FilterLevel {
        let path = path.as_ref();

        if self.exclude_roots.iter().any(|root| path.starts_with(root)) {
            return FilterLevel::Deny;
        }

        // Directories above an included root have to be walked to reach it.
        if !self.include_roots.is_empty()
            && !self.include_roots.iter().any(|root| path.starts_with(root))
        {
            let leads_to_root = is_dir && self.include_roots.iter().any(|root| root.starts_with(path));
            return if leads_to_root {
                FilterLevel::Traverse
            } else {
                FilterLevel::Deny
            };
        }

        if is_dir {
            // File rules may still match something further down.
            return if self.extensions.is_empty() && self.file_names.is_empty() {
                FilterLevel::Allow
            } else {
                FilterLevel::Traverse
            };
        }

        if self.extension_matches(path) && self.file_name_matches(path) {
            FilterLevel::Allow
        } else {
            FilterLevel::Deny
        }
    }

    fn extension_matches(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_lowercase()))
    }

    fn file_name_matches(&self, path: &Path) -> bool {
        if self.file_names.is_empty() {
            return true;
        }
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.file_names.contains(name))
    }
}
