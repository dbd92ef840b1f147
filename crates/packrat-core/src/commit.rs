//! Per-job orchestration: eligibility, destination sharding, temp write,
//! atomic commit and source removal.
//!
//! A job folder is only ever in one of three states: untouched in staging,
//! committed to the vault with the folder gone, or in flight with nothing
//! but a `.part` file next to its final path.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use flate2::{Compression, GzBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use tar::Builder;

use crate::config::ArchiverConfig;
use crate::discovery::Job;
use crate::error::{ArchiveError, ArchiveResult};
use crate::manifest::{finalize_descriptor, Manifest};
use crate::metadata::{load_seed_metadata, SeedMetadata, SkipReason};
use crate::pack::{append_descriptor, pack_folder, PackSpec};

pub const ARCHIVE_EXT: &str = "tar.gz";
pub const TEMP_SUFFIX: &str = ".part";
/// Used when a folder name sanitizes to nothing.
pub const FALLBACK_NAME: &str = "archive";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Top-level vault shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Study,
    NonStudy,
}

impl Bucket {
    /// `STUDY` when the seed `type` is "study" in any case, else `NONSTUDY`.
    pub fn from_seed(seed: &SeedMetadata) -> Self {
        match seed.kind() {
            Some(kind) if kind.eq_ignore_ascii_case("study") => Self::Study,
            _ => Self::NonStudy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Study => "STUDY",
            Self::NonStudy => "NONSTUDY",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse each run of characters outside `[A-Za-z0-9._-]` to `_`, trim
/// `.`, `_` and `-` from both ends, and fall back to [`FALLBACK_NAME`].
pub fn sanitize_name(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolved vault location for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: Bucket,
    pub year: i32,
    /// `<vault>/<BUCKET>/<year>`
    pub dir: PathBuf,
    /// `<dir>/<sanitized>.tar.gz`
    pub final_path: PathBuf,
    /// `<final_path>.part`, inside the vault so publishing stays on one filesystem.
    pub temp_path: PathBuf,
}

impl Destination {
    pub fn resolve(
        vault_root: &Path,
        seed: &SeedMetadata,
        job_name: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let bucket = Bucket::from_seed(seed);
        let year = now.year();
        let dir = vault_root.join(bucket.as_str()).join(format!("{year:04}"));
        let file_name = format!("{}.{ARCHIVE_EXT}", sanitize_name(job_name));
        let final_path = dir.join(&file_name);
        let temp_path = dir.join(format!("{file_name}{TEMP_SUFFIX}"));
        Self {
            bucket,
            year,
            dir,
            final_path,
            temp_path,
        }
    }
}

/// An eligible job with its destination worked out.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub seed: SeedMetadata,
    pub destination: Destination,
}

/// Load the seed descriptor and decide where the job would go.
/// Touches nothing on disk.
pub fn plan_job(
    config: &ArchiverConfig,
    job: &Job,
    now: DateTime<Utc>,
) -> Result<JobPlan, SkipReason> {
    let seed = load_seed_metadata(&config.meta_path_in(&job.path)).into_eligible()?;
    let destination = Destination::resolve(&config.vault_root, &seed, &job.name, now);
    Ok(JobPlan { seed, destination })
}

/// Result of one job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Archived {
        name: String,
        archive: PathBuf,
        files: usize,
        bytes: u64,
        /// Set when the archive committed but the staging folder could not
        /// be removed.
        cleanup_error: Option<String>,
    },
    Skipped {
        name: String,
        reason: SkipReason,
    },
    DryRun {
        name: String,
        bucket: Bucket,
        destination: PathBuf,
    },
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archived {
                name,
                archive,
                files,
                cleanup_error,
                ..
            } => {
                write!(f, "OK     {name}: -> {} ({files} files)", archive.display())?;
                if let Some(err) = cleanup_error {
                    write!(f, " [source not removed: {err}]")?;
                }
                Ok(())
            }
            Self::Skipped { name, reason } => write!(f, "SKIP   {name}: {reason}"),
            Self::DryRun {
                name, destination, ..
            } => write!(f, "DRY    {name}: would write {}", destination.display()),
        }
    }
}

/// Clock and filesystem steps around publishing whose failures are handled
/// differently from a failed pack.
pub(crate) struct CommitOps<'a> {
    pub clock: &'a dyn Fn() -> DateTime<Utc>,
    pub sync_dir: &'a dyn Fn(&Path) -> io::Result<()>,
    pub remove_source: &'a dyn Fn(&Path) -> io::Result<()>,
}

impl CommitOps<'static> {
    fn system() -> Self {
        Self {
            clock: &Utc::now,
            sync_dir: &sync_dir,
            remove_source: &remove_source,
        }
    }
}

/// Run one job end to end.
///
/// Ineligible jobs come back as [`JobOutcome::Skipped`] without touching
/// anything. Errors before the archive is published leave the staging folder
/// intact and remove the partial temp file. An existing archive at the
/// canonical path is never replaced ([`ArchiveError::DestinationExists`]).
///
/// Once published, the job counts as archived. A failed directory fsync is
/// logged and a failed folder removal sets `cleanup_error`.
pub fn archive_job(config: &ArchiverConfig, job: &Job) -> ArchiveResult<JobOutcome> {
    archive_job_with(config, job, &CommitOps::system())
}

pub(crate) fn archive_job_with(
    config: &ArchiverConfig,
    job: &Job,
    ops: &CommitOps<'_>,
) -> ArchiveResult<JobOutcome> {
    let plan = match plan_job(config, job, (ops.clock)()) {
        Ok(plan) => plan,
        Err(reason) => {
            return Ok(JobOutcome::Skipped {
                name: job.name.clone(),
                reason,
            })
        }
    };
    let planned = &plan.destination;

    if config.dry_run {
        return Ok(JobOutcome::DryRun {
            name: job.name.clone(),
            bucket: planned.bucket,
            destination: planned.final_path.clone(),
        });
    }

    if planned.final_path.exists() {
        return Err(ArchiveError::DestinationExists {
            path: planned.final_path.clone(),
        });
    }

    std::fs::create_dir_all(&planned.dir)
        .map_err(|e| ArchiveError::io("create destination", &planned.dir, e))?;

    let completed_at = (ops.clock)();
    let written = write_archive(config, job, &plan.seed, &planned.temp_path, completed_at);
    let manifest = match written {
        Ok(manifest) => manifest,
        Err(err) => {
            discard_temp(&planned.temp_path);
            return Err(err);
        }
    };

    // The year shard follows the commit time, not the time the job started.
    let dest = Destination::resolve(&config.vault_root, &plan.seed, &job.name, completed_at);
    if dest.dir != planned.dir {
        if let Err(e) = std::fs::create_dir_all(&dest.dir) {
            discard_temp(&planned.temp_path);
            return Err(ArchiveError::io("create destination", &dest.dir, e));
        }
    }

    publish(&planned.temp_path, &dest.final_path)?;
    if let Err(e) = (ops.sync_dir)(&dest.dir) {
        tracing::warn!(
            dir = %dest.dir.display(),
            error = %e,
            "archive published but directory fsync failed"
        );
    }
    tracing::debug!(archive = %dest.final_path.display(), "committed");

    let cleanup_error = match (ops.remove_source)(&job.path) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(
                folder = %job.path.display(),
                archive = %dest.final_path.display(),
                error = %e,
                "archive committed but staging folder could not be removed; reconcile manually"
            );
            Some(e.to_string())
        }
    };

    Ok(JobOutcome::Archived {
        name: job.name.clone(),
        archive: dest.final_path,
        files: manifest.len(),
        bytes: manifest.total_bytes(),
        cleanup_error,
    })
}

/// Pack `job` into a gzip'd tar at `temp_path`, descriptor last, and fsync.
fn write_archive(
    config: &ArchiverConfig,
    job: &Job,
    seed: &SeedMetadata,
    temp_path: &Path,
    completed_at: DateTime<Utc>,
) -> ArchiveResult<Manifest> {
    // A leftover temp may still be a hard link to a published archive;
    // unlink it rather than truncating through it.
    discard_temp(temp_path);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .map_err(|e| ArchiveError::io("create", temp_path, e))?;
    let gz = GzBuilder::new().write(file, Compression::default());
    let mut tar = Builder::new(gz);

    let manifest = pack_folder(
        &mut tar,
        PackSpec {
            folder: &job.path,
            entry_name: &job.name,
            meta_name: &config.meta_name,
            buf_size: config.buf_size,
        },
    )?;

    let descriptor = finalize_descriptor(seed, &manifest, completed_at)?;
    append_descriptor(&mut tar, &job.name, &config.meta_name, &descriptor, completed_at)?;

    let gz = tar
        .into_inner()
        .map_err(|e| ArchiveError::io("finalize tar", temp_path, e))?;
    let file = gz
        .finish()
        .map_err(|e| ArchiveError::io("finish gzip", temp_path, e))?;
    file.sync_all()
        .map_err(|e| ArchiveError::io("fsync", temp_path, e))?;

    Ok(manifest)
}

/// Publish `temp` as `dest` without ever replacing an existing `dest`.
///
/// `hard_link` fails atomically when the name is taken, which a plain rename
/// would not. The temp name is unlinked afterwards either way.
fn publish(temp: &Path, dest: &Path) -> ArchiveResult<()> {
    if let Err(e) = std::fs::hard_link(temp, dest) {
        discard_temp(temp);
        return Err(if e.kind() == io::ErrorKind::AlreadyExists {
            ArchiveError::DestinationExists {
                path: dest.to_path_buf(),
            }
        } else {
            ArchiveError::io("publish", dest, e)
        });
    }
    discard_temp(temp);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path).and_then(|dir| dir.sync_all())
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn remove_source(path: &Path) -> io::Result<()> {
    std::fs::remove_dir_all(path)
}

fn discard_temp(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(temp = %path.display(), error = %e, "could not remove partial archive")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunReport;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::cell::Cell;

    fn seed(v: Value) -> SeedMetadata {
        SeedMetadata::from_map(v.as_object().cloned().unwrap())
    }

    #[test]
    fn sanitize_replaces_runs_and_trims() {
        assert_eq!(sanitize_name("trial-42"), "trial-42");
        assert_eq!(sanitize_name("my study (v2)"), "my_study_v2");
        assert_eq!(sanitize_name("..hidden.."), "hidden");
        assert_eq!(sanitize_name("__a b__"), "a_b");
        assert_eq!(sanitize_name("Ünïcode"), "n_code");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        for name in ["", "///", "***", "._-", "  "] {
            assert_eq!(sanitize_name(name), FALLBACK_NAME, "input {name:?}");
        }
    }

    #[test]
    fn bucket_is_case_insensitive_study() {
        for kind in ["study", "Study", "STUDY", " study "] {
            assert_eq!(Bucket::from_seed(&seed(json!({"type": kind}))), Bucket::Study);
        }
        assert_eq!(Bucket::from_seed(&seed(json!({"type": "studies"}))), Bucket::NonStudy);
        assert_eq!(Bucket::from_seed(&seed(json!({"type": 1}))), Bucket::NonStudy);
        assert_eq!(Bucket::from_seed(&seed(json!({}))), Bucket::NonStudy);
    }

    #[test]
    fn destination_layout() {
        let now = Utc.with_ymd_and_hms(2031, 3, 4, 5, 6, 7).unwrap();
        let d = Destination::resolve(
            Path::new("/vault"),
            &seed(json!({"type": "Study"})),
            "trial 42",
            now,
        );
        assert_eq!(d.bucket, Bucket::Study);
        assert_eq!(d.dir, PathBuf::from("/vault/STUDY/2031"));
        assert_eq!(d.final_path, PathBuf::from("/vault/STUDY/2031/trial_42.tar.gz"));
        assert_eq!(d.temp_path, PathBuf::from("/vault/STUDY/2031/trial_42.tar.gz.part"));
    }

    #[test]
    fn outcome_messages() {
        let ok = JobOutcome::Archived {
            name: "a".into(),
            archive: PathBuf::from("/v/NONSTUDY/2030/a.tar.gz"),
            files: 3,
            bytes: 10,
            cleanup_error: None,
        };
        assert_eq!(ok.to_string(), "OK     a: -> /v/NONSTUDY/2030/a.tar.gz (3 files)");

        let skip = JobOutcome::Skipped {
            name: "b".into(),
            reason: SkipReason::NotReady("not ready_to_archive".into()),
        };
        assert_eq!(skip.to_string(), "SKIP   b: not ready_to_archive");
    }

    fn staged_job(root: &Path) -> (ArchiverConfig, Job) {
        let staging = root.join("staging");
        let path = staging.join("trial-42");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("data.csv"), b"a,b\n").unwrap();
        std::fs::write(
            path.join("archive.meta.json"),
            br#"{"ready_to_archive": true, "type": "study"}"#,
        )
        .unwrap();
        let job = Job {
            name: "trial-42".into(),
            path,
        };
        (ArchiverConfig::new(&staging, root.join("vault")), job)
    }

    fn system_ops() -> CommitOps<'static> {
        CommitOps::system()
    }

    #[test]
    fn dir_fsync_failure_after_publish_still_archives() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = staged_job(dir.path());
        let failing = |_: &Path| -> io::Result<()> { Err(io::Error::other("EIO")) };
        let ops = CommitOps {
            sync_dir: &failing,
            ..system_ops()
        };

        let outcome = archive_job_with(&cfg, &job, &ops).unwrap();
        let JobOutcome::Archived {
            archive,
            cleanup_error,
            ..
        } = &outcome
        else {
            panic!("expected Archived, got {outcome}");
        };
        assert!(archive.is_file());
        assert!(cleanup_error.is_none());
        assert!(!job.path.exists());
    }

    #[test]
    fn cleanup_failure_keeps_archive_and_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = staged_job(dir.path());
        let denied = |_: &Path| -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        };
        let ops = CommitOps {
            remove_source: &denied,
            ..system_ops()
        };

        let outcome = archive_job_with(&cfg, &job, &ops).unwrap();
        assert!(outcome.to_string().ends_with("[source not removed: denied]"), "{outcome}");
        let JobOutcome::Archived { archive, .. } = &outcome else {
            panic!("expected Archived, got {outcome}");
        };
        assert!(archive.is_file());
        assert!(job.path.join("data.csv").is_file());

        let report = RunReport {
            outcomes: vec![outcome],
            failures: Vec::new(),
        };
        assert!(report.is_clean());
        assert_eq!(report.cleanup_warnings(), 1);
    }

    #[test]
    fn year_shard_follows_commit_time() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = staged_job(dir.path());
        let calls = Cell::new(0);
        let new_year = || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Utc.with_ymd_and_hms(2029, 12, 31, 23, 59, 59).unwrap()
            } else {
                Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 1).unwrap()
            }
        };
        let ops = CommitOps {
            clock: &new_year,
            ..system_ops()
        };

        archive_job_with(&cfg, &job, &ops).unwrap();
        let study = cfg.vault_root.join("STUDY");
        assert!(study.join("2030/trial-42.tar.gz").is_file());
        assert!(!study.join("2029/trial-42.tar.gz").exists());
        assert!(!study.join("2029/trial-42.tar.gz.part").exists());
    }

    #[test]
    fn existing_archive_is_never_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = staged_job(dir.path());
        let now = Utc::now();
        let dest = plan_job(&cfg, &job, now).unwrap().destination;
        std::fs::create_dir_all(&dest.dir).unwrap();
        std::fs::write(&dest.final_path, b"committed earlier").unwrap();

        let err = archive_job(&cfg, &job).unwrap_err();
        assert!(matches!(err, ArchiveError::DestinationExists { .. }), "{err}");
        assert_eq!(std::fs::read(&dest.final_path).unwrap(), b"committed earlier");
        assert!(job.path.join("data.csv").is_file());
        assert!(!dest.temp_path.exists());
    }

    #[test]
    fn publish_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("x.tar.gz.part");
        let dest = dir.path().join("x.tar.gz");
        std::fs::write(&temp, b"new").unwrap();
        std::fs::write(&dest, b"old").unwrap();

        let err = publish(&temp, &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::DestinationExists { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert!(!temp.exists());

        std::fs::write(&temp, b"new").unwrap();
        let fresh = dir.path().join("y.tar.gz");
        publish(&temp, &fresh).unwrap();
        assert_eq!(std::fs::read(&fresh).unwrap(), b"new");
        assert!(!temp.exists());
    }
}
