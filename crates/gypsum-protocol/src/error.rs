//! Failure taxonomy shared by publish and purge runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorises why a run failed.
///
/// These codes are stable and appear in failure reports posted to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The version's lock object does not exist.
    LockMissing,
    /// A document declares a schema that cannot be found.
    UnknownSchema,
    /// A document does not validate against its schema.
    SchemaValidationFailed,
    /// A document's `path` disagrees with where it was uploaded.
    PathMismatch,
    /// A metadata document describes a file that was not uploaded.
    DanglingReference,
    /// The manifest declares a file that was not uploaded.
    MissingDeclaredFile,
    /// A file was uploaded without being declared in the manifest.
    UndeclaredFile,
    /// The purge job for a transient version could not be registered.
    ExpiryJobSubmissionFailed,
    /// A purge job body is malformed.
    InvalidPurgeJob,
    /// A finalize request, manifest, expiry descriptor or identifier is malformed.
    InvalidRequest,
    /// An uploaded document is not a JSON object with `$schema` and `path`.
    InvalidDocument,
    /// The object store failed.
    StoreIoError,
    /// The job queue failed.
    QueueIoError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockMissing => "LOCK_MISSING",
            ErrorKind::UnknownSchema => "UNKNOWN_SCHEMA",
            ErrorKind::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ErrorKind::PathMismatch => "PATH_MISMATCH",
            ErrorKind::DanglingReference => "DANGLING_REFERENCE",
            ErrorKind::MissingDeclaredFile => "MISSING_DECLARED_FILE",
            ErrorKind::UndeclaredFile => "UNDECLARED_FILE",
            ErrorKind::ExpiryJobSubmissionFailed => "EXPIRY_JOB_SUBMISSION_FAILED",
            ErrorKind::InvalidPurgeJob => "INVALID_PURGE_JOB",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::InvalidDocument => "INVALID_DOCUMENT",
            ErrorKind::StoreIoError => "STORE_IO_ERROR",
            ErrorKind::QueueIoError => "QUEUE_IO_ERROR",
        }
    }

    /// Whether the failure is caused by the uploaded content rather than
    /// by infrastructure.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownSchema
                | ErrorKind::SchemaValidationFailed
                | ErrorKind::PathMismatch
                | ErrorKind::DanglingReference
                | ErrorKind::MissingDeclaredFile
                | ErrorKind::UndeclaredFile
                | ErrorKind::InvalidDocument
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure report posted back to the originating queue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    /// Single-line, human-readable message.
    pub message: String,
}

impl FailureReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Text for a queue comment.
    pub fn to_comment(&self) -> String {
        format!("gypsum failure ({}): {}", self.kind, self.message)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
