//! Packrat core: moves ready staging folders into a sharded vault as
//! single tar.gz archives carrying a sha256 manifest.
//!
//! Pipeline per folder: [`discovery`] finds it, [`metadata`] decides whether
//! it is ready, [`pack`] streams it into a temp archive while hashing,
//! [`manifest`] builds the trailing descriptor, and [`commit`] publishes the
//! archive into place before removing the source.

pub mod commit;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod metadata;
pub mod pack;
pub mod runner;

pub use commit::{
    archive_job, plan_job, sanitize_name, Bucket, Destination, JobOutcome, JobPlan, FALLBACK_NAME,
};
pub use config::ArchiverConfig;
pub use discovery::{find_ready_folders, Job};
pub use error::{ArchiveError, ArchiveResult};
pub use lock::{try_lock, ExclusiveLock, FileLock, LockGuard};
pub use manifest::{finalize_descriptor, Manifest, ManifestEntry, DEFAULT_DESCRIPTION};
pub use metadata::{load_seed_metadata, SeedMetadata, SeedStatus, SkipReason};
pub use runner::{process_jobs, run, JobFailure, RunReport, RunStatus};
