//! Seed descriptor loading.
//!
//! The seed descriptor is a JSON object dropped into a staging folder by
//! whoever produced the data. Only `ready_to_archive`, `type` and
//! `description` mean anything to the archiver; every other key is carried
//! through to the final descriptor untouched, in its original order.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value};

pub const KEY_READY: &str = "ready_to_archive";
pub const KEY_TYPE: &str = "type";
pub const KEY_DESCRIPTION: &str = "description";

/// Parsed seed descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedMetadata(Map<String, Value>);

impl SeedMetadata {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Only a literal JSON `true` counts; `"true"`, `1` and friends do not.
    pub fn is_ready(&self) -> bool {
        matches!(self.0.get(KEY_READY), Some(Value::Bool(true)))
    }

    /// The free-form `type` field, trimmed. Non-string values are ignored.
    pub fn kind(&self) -> Option<&str> {
        self.0.get(KEY_TYPE).and_then(Value::as_str).map(str::trim)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Outcome of reading a seed descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedStatus {
    Loaded(SeedMetadata),
    /// No descriptor at the expected path.
    Absent,
    /// Descriptor exists but could not be read or is not a JSON object.
    Malformed(String),
}

impl SeedStatus {
    pub fn seed(&self) -> Option<&SeedMetadata> {
        match self {
            Self::Loaded(seed) => Some(seed),
            _ => None,
        }
    }

    /// Eligibility gate for a job. `Ok` carries the seed to archive with.
    pub fn into_eligible(self) -> Result<SeedMetadata, SkipReason> {
        match self {
            Self::Loaded(seed) if seed.is_ready() => Ok(seed),
            Self::Loaded(seed) => Err(match seed.get(KEY_READY) {
                None => SkipReason::NotReady("ready_to_archive missing".into()),
                Some(Value::Bool(false)) => SkipReason::NotReady("not ready_to_archive".into()),
                Some(other) => {
                    SkipReason::NotReady(format!("ready_to_archive is not boolean true: {other}"))
                }
            }),
            Self::Absent => Err(SkipReason::DescriptorAbsent),
            Self::Malformed(reason) => Err(SkipReason::DescriptorMalformed(reason)),
        }
    }
}

/// Why an otherwise discovered job was not archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DescriptorAbsent,
    DescriptorMalformed(String),
    NotReady(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DescriptorAbsent => write!(f, "seed descriptor absent"),
            Self::DescriptorMalformed(reason) => write!(f, "seed descriptor malformed: {reason}"),
            Self::NotReady(reason) => write!(f, "{reason}"),
        }
    }
}

/// Read and parse the seed descriptor at `path`. Never fails: problems are
/// reported through [`SeedStatus`].
pub fn load_seed_metadata(path: &Path) -> SeedStatus {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SeedStatus::Absent,
        Err(e) => return SeedStatus::Malformed(format!("unreadable: {e}")),
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => SeedStatus::Loaded(SeedMetadata(map)),
        Ok(_) => SeedStatus::Malformed("top-level value is not an object".into()),
        Err(e) => SeedStatus::Malformed(e.to_string()),
    }
}
