use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong while snapshotting.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub enum Error {
    /// Stat-ing, opening or reading a path failed.
    #[error("Failed to read {what}: {how}")]
    Read {
        /// The path or resource involved.
        what: String,
        /// The reason for the failure.
        how: String,
    },

    /// The path disappeared between being observed and being read.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A caller supplied something unusable, such as a path segment
    /// containing a separator.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The stat provider reported a file type that has no snapshot variant,
    /// such as a socket or a device node.
    #[error("Unrecognized file type {kind} for {path}")]
    UnrecognizedFileType {
        /// The offending path.
        path: String,
        /// What the stat provider reported.
        kind: String,
    },

    /// Walking a directory tree failed part way.
    #[error("Failed to walk {what}: {how}")]
    Walk {
        /// The directory being walked.
        what: String,
        /// The reason for the failure.
        how: String,
    },

    /// A test fixture could not be created.
    #[error("Failed to create {what}: {how}")]
    Create {
        /// The path being created.
        what: String,
        /// The reason for the failure.
        how: String,
    },

    /// A path could not be made absolute or is not valid UTF-8.
    #[error("Invalid path: {what}")]
    InvalidPath {
        /// Description of the offending path.
        what: String,
    },
}

impl Error {
    /// Maps an I/O failure on `what` into an [`Error`], keeping "not found"
    /// distinguishable so a vanished file can be reported as missing.
    pub(crate) fn from_io(what: impl Into<String>, e: std::io::Error) -> Self {
        let what = what.into();
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(what)
        } else {
            Error::Read {
                what,
                how: e.to_string(),
            }
        }
    }
}

/// Shorthand for results carrying an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
