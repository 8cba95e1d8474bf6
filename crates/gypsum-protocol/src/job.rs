//! Job records carried by the external queue.
//!
//! Two kinds of record are exchanged through the queue:
//! - finalize requests (`upload project`), consumed by the publisher;
//! - purge jobs (`purge project`), consumed by the purger.
//!
//! Bodies are JSON. They are decoded once, at ingestion, into typed values;
//! anything malformed is rejected there rather than deep inside a run.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::paths::VersionPaths;

/// Title of records asking the publisher to finalize a version.
pub const FINALIZE_TITLE: &str = "upload project";

/// Title of records asking the purger to delete a version.
pub const PURGE_TITLE: &str = "purge project";

/// Errors from decoding a job body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobDecodeError {
    #[error("job body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("job body is missing '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("unknown purge mode '{0}'; expected 'incomplete' or 'expiry'")]
    UnknownMode(String),

    #[error("invalid 'delete_after' value {0}; expected positive epoch milliseconds")]
    InvalidDeleteAfter(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Why a version is scheduled for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeMode {
    /// The upload never finished; the version still holds its lock.
    Incomplete,
    /// The version was published with a retention period that has lapsed.
    Expiry,
}

impl PurgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeMode::Incomplete => "incomplete",
            PurgeMode::Expiry => "expiry",
        }
    }
}

impl std::fmt::Display for PurgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded purge job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeJob {
    Incomplete {
        project: String,
        version: String,
        delete_after: i64,
    },
    Expiry {
        project: String,
        version: String,
        delete_after: i64,
    },
}

impl PurgeJob {
    pub fn new(mode: PurgeMode, project: &str, version: &str, delete_after: i64) -> Self {
        let (project, version) = (project.to_string(), version.to_string());
        match mode {
            PurgeMode::Incomplete => PurgeJob::Incomplete {
                project,
                version,
                delete_after,
            },
            PurgeMode::Expiry => PurgeJob::Expiry {
                project,
                version,
                delete_after,
            },
        }
    }

    pub fn mode(&self) -> PurgeMode {
        match self {
            PurgeJob::Incomplete { .. } => PurgeMode::Incomplete,
            PurgeJob::Expiry { .. } => PurgeMode::Expiry,
        }
    }

    pub fn project(&self) -> &str {
        match self {
            PurgeJob::Incomplete { project, .. } | PurgeJob::Expiry { project, .. } => project,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            PurgeJob::Incomplete { version, .. } | PurgeJob::Expiry { version, .. } => version,
        }
    }

    /// Epoch milliseconds after which the version may be deleted.
    pub fn delete_after(&self) -> i64 {
        match self {
            PurgeJob::Incomplete { delete_after, .. } | PurgeJob::Expiry { delete_after, .. } => {
                *delete_after
            }
        }
    }

    /// Whether the deletion deadline has passed at `now_millis`.
    pub fn is_due(&self, now_millis: i64) -> bool {
        now_millis >= self.delete_after()
    }

    /// Decode a purge job from a record body.
    pub fn decode(body: &str) -> Result<Self, JobDecodeError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| JobDecodeError::InvalidJson(e.to_string()))?;

        let project = required_str(&value, "project")?;
        let version = required_str(&value, "version")?;
        VersionPaths::new(project, version)
            .map_err(|e| JobDecodeError::InvalidIdentifier(e.to_string()))?;
        let mode = match required_str(&value, "mode")? {
            "incomplete" => PurgeMode::Incomplete,
            "expiry" => PurgeMode::Expiry,
            other => return Err(JobDecodeError::UnknownMode(other.to_string())),
        };

        let raw = value
            .get("delete_after")
            .ok_or(JobDecodeError::MissingField("delete_after"))?;
        let delete_after = epoch_millis(raw)
            .filter(|millis| *millis > 0)
            .ok_or_else(|| JobDecodeError::InvalidDeleteAfter(raw.to_string()))?;

        Ok(Self::new(mode, project, version, delete_after))
    }

    /// Encode as a record body.
    pub fn to_body(&self) -> Value {
        serde_json::json!({
            "project": self.project(),
            "version": self.version(),
            "mode": self.mode().as_str(),
            "delete_after": self.delete_after(),
        })
    }
}

fn required_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, JobDecodeError> {
    match value.get(field) {
        None | Some(Value::Null) => Err(JobDecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(JobDecodeError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

/// Accept integral milliseconds written either as integers or whole floats.
fn epoch_millis(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Request to finalize (validate, index and publish) one uploaded version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub project: String,
    pub version: String,
    /// Upload time, epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub overwrite_permissions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
}

impl FinalizeRequest {
    /// Decode a finalize request from a record body.
    pub fn decode(body: &str) -> Result<Self, JobDecodeError> {
        serde_json::from_str(body).map_err(|e| JobDecodeError::InvalidJson(e.to_string()))
    }

    pub fn to_body(&self) -> Value {
        // Plain data; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The declared upload time, if it is a representable instant.
    pub fn upload_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_incomplete_job() {
        let job = PurgeJob::decode(
            r#"{"project":"demo","version":"v1","mode":"incomplete","delete_after":1000}"#,
        )
        .unwrap();
        assert_eq!(job.mode(), PurgeMode::Incomplete);
        assert_eq!(job.project(), "demo");
        assert_eq!(job.version(), "v1");
        assert_eq!(job.delete_after(), 1000);
        assert!(!job.is_due(999));
        assert!(job.is_due(1000));
    }

    #[test]
    fn test_decode_accepts_whole_float_deadline() {
        let job = PurgeJob::decode(
            r#"{"project":"demo","version":"v1","mode":"expiry","delete_after":1700000000000.0}"#,
        )
        .unwrap();
        assert_eq!(job.delete_after(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_rejects_unknown_mode() {
        let err = PurgeJob::decode(
            r#"{"project":"demo","version":"v1","mode":"locked_only","delete_after":1}"#,
        )
        .unwrap_err();
        assert_eq!(err, JobDecodeError::UnknownMode("locked_only".to_string()));
    }

    #[test]
    fn test_decode_rejects_bad_deadline() {
        for body in [
            r#"{"project":"demo","version":"v1","mode":"expiry","delete_after":0}"#,
            r#"{"project":"demo","version":"v1","mode":"expiry","delete_after":-5}"#,
            r#"{"project":"demo","version":"v1","mode":"expiry","delete_after":"soon"}"#,
            r#"{"project":"demo","version":"v1","mode":"expiry","delete_after":1.5}"#,
        ] {
            assert!(
                matches!(PurgeJob::decode(body), Err(JobDecodeError::InvalidDeleteAfter(_))),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let err = PurgeJob::decode(r#"{"version":"v1","mode":"expiry","delete_after":1}"#)
            .unwrap_err();
        assert_eq!(err, JobDecodeError::MissingField("project"));

        let err = PurgeJob::decode("not json").unwrap_err();
        assert!(matches!(err, JobDecodeError::InvalidJson(_)));

        let err = PurgeJob::decode(r#"{"project":"","version":"v1","mode":"expiry","delete_after":1}"#)
            .unwrap_err();
        assert!(matches!(err, JobDecodeError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_body_round_trip() {
        let job = PurgeJob::new(PurgeMode::Expiry, "demo", "v2", 42);
        let decoded = PurgeJob::decode(&job.to_body().to_string()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_finalize_request_defaults() {
        let request =
            FinalizeRequest::decode(r#"{"project":"demo","version":"v1","timestamp":1000}"#)
                .unwrap();
        assert!(!request.overwrite_permissions);
        assert!(request.permissions.is_none());
        assert_eq!(request.upload_time().unwrap().timestamp_millis(), 1000);
    }
}
