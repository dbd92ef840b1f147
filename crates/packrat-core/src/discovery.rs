//! Job discovery in the staging root.

use std::path::PathBuf;

use crate::config::ArchiverConfig;
use crate::error::{ArchiveError, ArchiveResult};

/// A staging folder that carries a seed descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Folder name, also the top-level directory inside the archive.
    pub name: String,
    /// Absolute (or staging-root relative) folder path.
    pub path: PathBuf,
}

/// List immediate subdirectories of the staging root that contain a seed
/// descriptor, sorted by name.
///
/// The vault directory is skipped by name. Folders without a descriptor are
/// still being filled and are left alone. Read-only.
pub fn find_ready_folders(config: &ArchiverConfig) -> ArchiveResult<Vec<Job>> {
    let root = &config.staging_root;
    let vault_name = config.vault_dir_name();
    let read_dir =
        std::fs::read_dir(root).map_err(|e| ArchiveError::io("read staging root", root, e))?;

    let mut jobs = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| ArchiveError::io("read staging root", root, e))?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                tracing::warn!(name = ?raw, "skipping staging entry with non UTF-8 name");
                continue;
            }
        };
        if Some(name.as_str()) == vault_name {
            continue;
        }

        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !config.meta_path_in(&path).is_file() {
            tracing::trace!(folder = %name, "no seed descriptor yet");
            continue;
        }
        jobs.push(Job { name, path });
    }

    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}
