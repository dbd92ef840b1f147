//! Streaming tar packer.
//!
//! Walks a job folder, appends every regular file under `<entry_name>/` and
//! hashes each file in the same read pass. Nothing is buffered beyond the
//! configured read buffer.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

use super::hashing::HashingReader;
use crate::error::{ArchiveError, ArchiveResult};
use crate::manifest::{Manifest, ManifestEntry};

const DESCRIPTOR_MODE: u32 = 0o644;

/// Where a job folder goes inside the archive and what to leave out.
#[derive(Debug, Clone, Copy)]
pub struct PackSpec<'a> {
    /// Job folder on disk.
    pub folder: &'a Path,
    /// Top-level directory name inside the archive.
    pub entry_name: &'a str,
    /// Seed descriptor name; only the top-level file is excluded.
    pub meta_name: &'a str,
    pub buf_size: usize,
}

/// Append every regular file under `spec.folder` to `tar` and return the
/// sorted manifest.
///
/// Entries are visited in file-name order so the member layout does not
/// depend on directory iteration order. Symlinks and special files abort
/// the pack.
pub fn pack_folder<W: Write>(tar: &mut Builder<W>, spec: PackSpec<'_>) -> ArchiveResult<Manifest> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(spec.folder)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);

    for entry in walker {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            root: spec.folder.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        // The seed descriptor is rewritten at the end whatever it is on disk.
        if entry.depth() == 1 && entry.file_name() == spec.meta_name {
            continue;
        }
        if !file_type.is_file() {
            return Err(ArchiveError::UnsupportedEntry {
                path: entry.path().to_path_buf(),
                kind: describe_file_type(&file_type),
            });
        }

        let rel = relative_posix(spec.folder, entry.path())?;
        let arc_path = format!("{}/{}", spec.entry_name, rel);
        let (size_bytes, sha256) = append_file(tar, entry.path(), &arc_path, spec.buf_size)?;
        tracing::debug!(path = %rel, size_bytes, "packed");

        entries.push(ManifestEntry {
            path: rel,
            size_bytes,
            sha256,
        });
    }

    Ok(Manifest::from_entries(entries))
}

/// Stream one file into the archive, hashing as it goes.
///
/// Returns `(size, hex sha256)`. The header takes size, mtime and
/// permission bits from the open handle; if the file does not deliver
/// exactly that many bytes the job fails rather than producing a member
/// whose digest disagrees with its header.
pub fn append_file<W: Write>(
    tar: &mut Builder<W>,
    src: &Path,
    arc_path: &str,
    buf_size: usize,
) -> ArchiveResult<(u64, String)> {
    let file = File::open(src).map_err(|e| ArchiveError::io("open", src, e))?;
    let meta = file
        .metadata()
        .map_err(|e| ArchiveError::io("stat", src, e))?;
    let size = meta.len();

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(permission_bits(&meta));
    header.set_mtime(mtime_secs(&meta));
    header.set_uid(0);
    header.set_gid(0);

    let mut reader = HashingReader::new(BufReader::with_capacity(buf_size, file).take(size));
    tar.append_data(&mut header, arc_path, &mut reader)
        .map_err(|e| ArchiveError::io("stream", src, e))?;

    let (limited, digest, streamed) = reader.finish();
    if streamed != size {
        return Err(ArchiveError::SizeMismatch {
            path: src.to_path_buf(),
            expected: size,
            actual: streamed,
        });
    }

    let mut rest = limited.into_inner();
    let mut one_more = [0u8; 1];
    let extra = rest
        .read(&mut one_more)
        .map_err(|e| ArchiveError::io("read", src, e))?;
    if extra > 0 {
        let tail = io::copy(&mut rest, &mut io::sink())
            .map_err(|e| ArchiveError::io("read", src, e))?;
        return Err(ArchiveError::SizeMismatch {
            path: src.to_path_buf(),
            expected: size,
            actual: size + extra as u64 + tail,
        });
    }

    Ok((size, digest))
}

/// Append the final descriptor as `<entry_name>/<meta_name>`.
pub fn append_descriptor<W: Write>(
    tar: &mut Builder<W>,
    entry_name: &str,
    meta_name: &str,
    descriptor: &[u8],
    completed_at: DateTime<Utc>,
) -> ArchiveResult<()> {
    let arc_path = format!("{entry_name}/{meta_name}");
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(descriptor.len() as u64);
    header.set_mode(DESCRIPTOR_MODE);
    header.set_mtime(completed_at.timestamp().max(0) as u64);
    header.set_uid(0);
    header.set_gid(0);

    tar.append_data(&mut header, &arc_path, descriptor)
        .map_err(|e| ArchiveError::io("append descriptor", arc_path.as_str(), e))
}

/// `root/a/b.txt` -> `a/b.txt`, independent of the host separator.
fn relative_posix(root: &Path, path: &Path) -> ArchiveResult<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ArchiveError::InvalidName {
            message: format!("{} is not under {}", path.display(), root.display()),
        })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| ArchiveError::InvalidName {
                    message: format!("non UTF-8 path: {}", path.display()),
                })?;
                parts.push(part);
            }
            other => {
                return Err(ArchiveError::InvalidName {
                    message: format!("unexpected component {other:?} in {}", path.display()),
                })
            }
        }
    }
    Ok(parts.join("/"))
}

fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn describe_file_type(ft: &std::fs::FileType) -> &'static str {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_symlink() {
        "symlink"
    } else if ft.is_fifo() {
        "fifo"
    } else if ft.is_socket() {
        "socket"
    } else if ft.is_block_device() || ft.is_char_device() {
        "device"
    } else {
        "special"
    }
}

#[cfg(not(unix))]
fn describe_file_type(ft: &std::fs::FileType) -> &'static str {
    if ft.is_symlink() {
        "symlink"
    } else {
        "special"
    }
}
