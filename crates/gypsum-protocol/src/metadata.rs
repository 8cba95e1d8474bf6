//! Per-version and per-project metadata objects.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Revision metadata written once per publish of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// When the uploader declared the upload.
    pub upload_time: DateTime<Utc>,
    /// When the version was indexed (published).
    pub index_time: DateTime<Utc>,
    /// When the version becomes eligible for deletion, if it is transient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
    /// Queue record that will delete the version at `expiry_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_job_id: Option<u64>,
}

impl RevisionMetadata {
    pub fn new(upload_time: DateTime<Utc>, index_time: DateTime<Utc>) -> Self {
        Self {
            upload_time,
            index_time,
            expiry_time: None,
            expiry_job_id: None,
        }
    }

    pub fn with_expiry(mut self, expiry_time: DateTime<Utc>, job_id: u64) -> Self {
        self.expiry_time = Some(expiry_time);
        self.expiry_job_id = Some(job_id);
        self
    }

    pub fn expires(&self) -> bool {
        self.expiry_time.is_some()
    }

    pub fn index_millis(&self) -> i64 {
        self.index_time.timestamp_millis()
    }
}

/// A project's pointer to its most recently indexed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: String,
    /// Index time of `version` in epoch milliseconds, or the sentinel.
    pub index_time: i64,
}

impl LatestPointer {
    /// Index time recorded when no version qualifies.
    pub const SENTINEL_INDEX_TIME: i64 = -1;

    pub fn new(version: impl Into<String>, index_time: i64) -> Self {
        Self {
            version: version.into(),
            index_time,
        }
    }

    /// Value stored when a project has no eligible version.
    pub fn placeholder() -> Self {
        Self::new("", Self::SENTINEL_INDEX_TIME)
    }

    pub fn is_placeholder(&self) -> bool {
        self.version.is_empty()
    }

    /// Whether writing `self` over `current` respects monotonic index times.
    ///
    /// An absent current pointer is always superseded.
    pub fn supersedes(&self, current: Option<&LatestPointer>) -> bool {
        match current {
            None => true,
            Some(current) => self.index_time > current.index_time,
        }
    }
}

/// Retention request deposited by the uploader alongside a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryDescriptor {
    /// Lifetime after indexing, in milliseconds.
    pub expires_in: u64,
}

/// Closed-world list of the relative paths an uploader declared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(Vec<String>);

impl Manifest {
    pub fn new(entries: Vec<String>) -> Self {
        Self(entries)
    }

    pub fn to_set(&self) -> BTreeSet<&str> {
        self.0.iter().map(String::as_str).collect()
    }
}
