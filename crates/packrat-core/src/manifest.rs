//! Per-file manifest and final descriptor assembly.
//!
//! The final descriptor is the seed descriptor plus `timestamp`, `manifest`
//! and `ready_to_archive = true`. It is written as the last member of the
//! archive so its presence marks the archive as complete.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ArchiveResult;
use crate::metadata::{SeedMetadata, KEY_DESCRIPTION, KEY_READY};

pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_MANIFEST: &str = "manifest";

/// Filled in when the seed carries no `description`.
pub const DEFAULT_DESCRIPTION: &str = "No description provided.";

/// One archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// POSIX path relative to the job folder.
    pub path: String,
    pub size_bytes: u64,
    /// Lowercase hex sha256 of the bytes stored in the archive.
    pub sha256: String,
}

/// Manifest entries, always ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<ManifestEntry>);

impl Manifest {
    pub fn from_entries(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self(entries)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.0.iter().map(|e| e.size_bytes).sum()
    }
}

/// Build the final descriptor bytes (pretty JSON, two-space indent).
///
/// Deterministic for fixed inputs; only `completed_at` varies between runs.
pub fn finalize_descriptor(
    seed: &SeedMetadata,
    manifest: &Manifest,
    completed_at: DateTime<Utc>,
) -> ArchiveResult<Vec<u8>> {
    let mut out = seed.as_map().clone();
    out.entry(KEY_DESCRIPTION)
        .or_insert_with(|| Value::String(DEFAULT_DESCRIPTION.to_string()));
    out.insert(
        KEY_TIMESTAMP.to_string(),
        Value::String(completed_at.to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    out.insert(KEY_READY.to_string(), Value::Bool(true));
    out.insert(KEY_MANIFEST.to_string(), serde_json::to_value(manifest)?);

    Ok(serde_json::to_vec_pretty(&Value::Object(out))?)
}
