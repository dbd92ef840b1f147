//! Cross-process run exclusion.
//!
//! A run only proceeds while it holds the lock; a second instance finds it
//! taken and exits without doing anything. The lock is released on every
//! exit path through [`LockGuard`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, ArchiveResult};

/// Non-blocking exclusive lock capability.
pub trait ExclusiveLock {
    /// Take the lock if it is free. `Ok(false)` means another holder has it.
    fn try_acquire(&mut self) -> ArchiveResult<bool>;
    /// Give the lock up. Releasing a lock that is not held is a no-op.
    fn release(&mut self) -> ArchiveResult<()>;
}

/// Releases the wrapped lock when dropped.
pub struct LockGuard<'a, L: ExclusiveLock + ?Sized> {
    lock: &'a mut L,
}

impl<L: ExclusiveLock + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            tracing::warn!(error = %e, "failed to release run lock");
        }
    }
}

/// Try to take `lock`, returning a guard that releases it on drop, or
/// `None` if someone else holds it.
pub fn try_lock<L: ExclusiveLock + ?Sized>(
    lock: &mut L,
) -> ArchiveResult<Option<LockGuard<'_, L>>> {
    if lock.try_acquire()? {
        Ok(Some(LockGuard { lock }))
    } else {
        Ok(None)
    }
}

/// Advisory lock on a file path (`flock(LOCK_EX | LOCK_NB)` on unix).
///
/// The lock file itself is left in place after release; only the lock on it
/// is dropped. The holder's pid is written into it for operators unless
/// [`FileLock::without_owner_record`] is used.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    record_owner: bool,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            record_owner: true,
        }
    }

    /// Take the lock without rewriting the file's contents. An existing lock
    /// file is left byte-for-byte as it was.
    pub fn without_owner_record(mut self) -> Self {
        self.record_owner = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    fn lock_err(&self, message: impl Into<String>) -> ArchiveError {
        ArchiveError::Lock {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn open(&self) -> ArchiveResult<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::io("create lock dir", parent, e))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| ArchiveError::io("open lock", &self.path, e))
    }
}

fn write_owner(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

#[cfg(unix)]
impl ExclusiveLock for FileLock {
    fn try_acquire(&mut self) -> ArchiveResult<bool> {
        use nix::errno::Errno;
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        if self.file.is_some() {
            return Ok(true);
        }
        let mut file = self.open()?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                if self.record_owner {
                    if let Err(e) = write_owner(&mut file) {
                        tracing::debug!(error = %e, "could not record lock owner");
                    }
                }
                self.file = Some(file);
                Ok(true)
            }
            Err(Errno::EWOULDBLOCK) => Ok(false),
            Err(errno) => Err(self.lock_err(format!("flock failed: {errno}"))),
        }
    }

    fn release(&mut self) -> ArchiveResult<()> {
        use nix::fcntl::{flock, FlockArg};
        use std::os::unix::io::AsRawFd;

        let Some(file) = self.file.take() else {
            return Ok(());
        };
        flock(file.as_raw_fd(), FlockArg::Unlock)
            .map_err(|errno| self.lock_err(format!("unlock failed: {errno}")))
    }
}

/// Without `flock`, exclusivity comes from creating the file with
/// `create_new` and removing it on release.
#[cfg(not(unix))]
impl ExclusiveLock for FileLock {
    fn try_acquire(&mut self) -> ArchiveResult<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArchiveError::io("create lock dir", parent, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                if self.record_owner {
                    let _ = write_owner(&mut file);
                }
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ArchiveError::io("open lock", &self.path, e)),
        }
    }

    fn release(&mut self) -> ArchiveResult<()> {
        if self.file.take().is_some() {
            std::fs::remove_file(&self.path)
                .map_err(|e| ArchiveError::io("remove lock", &self.path, e))?;
        }
        Ok(())
    }
}
