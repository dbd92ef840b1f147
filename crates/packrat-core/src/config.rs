//! Archiver configuration.
//!
//! Resolution of flags and environment variables happens in the CLI; this
//! type only carries the resolved values.

use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, ArchiveResult};

pub const DEFAULT_STAGING_ROOT: &str = "/mnt/archive/STAGING";
pub const DEFAULT_VAULT_ROOT: &str = "/mnt/archive/VAULT";
pub const DEFAULT_META_NAME: &str = "archive.meta.json";
pub const DEFAULT_LOCK_PATH: &str = "/var/lock/archive-daemon.lock";
pub const DEFAULT_BUF_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    /// Directory scanned for job folders.
    pub staging_root: PathBuf,
    /// Root of the sharded archive tree.
    pub vault_root: PathBuf,
    /// Seed descriptor file name, looked up at the top of each job folder.
    pub meta_name: String,
    /// Read buffer size used while streaming source files.
    pub buf_size: usize,
    pub dry_run: bool,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STAGING_ROOT, DEFAULT_VAULT_ROOT)
    }
}

impl ArchiverConfig {
    pub fn new(staging_root: impl Into<PathBuf>, vault_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            vault_root: vault_root.into(),
            meta_name: DEFAULT_META_NAME.to_string(),
            buf_size: DEFAULT_BUF_SIZE,
            dry_run: false,
        }
    }

    pub fn with_meta_name(mut self, meta_name: impl Into<String>) -> Self {
        self.meta_name = meta_name.into();
        self
    }

    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Final component of the vault path, excluded from discovery when the
    /// vault sits inside the staging root.
    pub fn vault_dir_name(&self) -> Option<&str> {
        self.vault_root.file_name().and_then(|n| n.to_str())
    }

    /// Create the vault root if missing.
    pub fn ensure_vault(&self) -> ArchiveResult<()> {
        std::fs::create_dir_all(&self.vault_root)
            .map_err(|e| ArchiveError::io("create vault", &self.vault_root, e))
    }

    pub fn meta_path_in(&self, folder: &Path) -> PathBuf {
        folder.join(&self.meta_name)
    }
}
