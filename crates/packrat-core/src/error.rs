//! Error types for the archiving pipeline.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Archiving errors.
///
/// Anything returned from a job aborts that job before commit; the staging
/// folder is left as it was.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed part-way.
    #[error("walk failed under {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// The tree contains something that is not a regular file or directory.
    #[error("unsupported {kind} entry: {}", path.display())]
    UnsupportedEntry { path: PathBuf, kind: &'static str },

    /// A source file changed length while it was being streamed.
    #[error(
        "size changed while archiving {}: header says {expected} bytes, read {actual}",
        path.display()
    )]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Another archive already occupies the canonical path. Archives are
    /// write-once, so the job stops and keeps its staging folder.
    #[error("archive already exists at {}; refusing to replace it", path.display())]
    DestinationExists { path: PathBuf },

    /// Final descriptor could not be serialized.
    #[error("descriptor serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A path could not be expressed as an archive member name.
    #[error("invalid name: {message}")]
    InvalidName { message: String },

    /// Exclusive run lock could not be taken or released.
    #[error("lock error on {}: {message}", path.display())]
    Lock { path: PathBuf, message: String },
}

impl ArchiveError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
