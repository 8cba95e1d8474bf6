//! Run-level errors and stable exit codes.
//!
//! Every failure of a publish or purge run is a [`GypsumError`]. Its
//! [`kind`](GypsumError::kind) is the stable [`ErrorKind`] reported to the
//! queue, and each kind maps onto a fixed process [`ExitCode`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gypsum_protocol::{ErrorKind, FailureReport, JobDecodeError, PathError};
use gypsum_store::StoreError;

use crate::queue::QueueError;

/// Failure of a publish or purge run.
#[derive(Debug, Error)]
pub enum GypsumError {
    #[error("no lock for {project}/{version}; the upload is not in progress or was already published")]
    LockMissing { project: String, version: String },

    #[error("'{path}' references unknown schema '{schema}': {reason}")]
    UnknownSchema {
        path: String,
        schema: String,
        reason: String,
    },

    #[error("'{path}' does not satisfy '{schema}' at {location}: {message}")]
    SchemaValidationFailed {
        path: String,
        schema: String,
        location: String,
        message: String,
    },

    #[error("'{path}' declares path '{declared}', expected '{expected}'")]
    PathMismatch {
        path: String,
        declared: String,
        expected: String,
    },

    #[error("'{path}' describes '{target}', which was not uploaded")]
    DanglingReference { path: String, target: String },

    #[error("manifest declares '{0}' but it was not uploaded")]
    MissingDeclaredFile(String),

    #[error("'{0}' was uploaded but is not declared in the manifest")]
    UndeclaredFile(String),

    #[error("could not register expiry job for {project}/{version}: {source}")]
    ExpiryJobSubmissionFailed {
        project: String,
        version: String,
        #[source]
        source: QueueError,
    },

    #[error("purge job #{id} is invalid: {source}")]
    InvalidPurgeJob {
        id: u64,
        #[source]
        source: JobDecodeError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid document '{path}': {reason}")]
    InvalidDocument { path: String, reason: String },

    #[error("object store: {0}")]
    Store(#[from] StoreError),

    #[error("job queue: {0}")]
    Queue(#[from] QueueError),
}

impl GypsumError {
    /// Stable kind reported alongside the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GypsumError::LockMissing { .. } => ErrorKind::LockMissing,
            GypsumError::UnknownSchema { .. } => ErrorKind::UnknownSchema,
            GypsumError::SchemaValidationFailed { .. } => ErrorKind::SchemaValidationFailed,
            GypsumError::PathMismatch { .. } => ErrorKind::PathMismatch,
            GypsumError::DanglingReference { .. } => ErrorKind::DanglingReference,
            GypsumError::MissingDeclaredFile(_) => ErrorKind::MissingDeclaredFile,
            GypsumError::UndeclaredFile(_) => ErrorKind::UndeclaredFile,
            GypsumError::ExpiryJobSubmissionFailed { .. } => ErrorKind::ExpiryJobSubmissionFailed,
            GypsumError::InvalidPurgeJob { .. } => ErrorKind::InvalidPurgeJob,
            GypsumError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            GypsumError::InvalidDocument { .. } => ErrorKind::InvalidDocument,
            GypsumError::Store(_) => ErrorKind::StoreIoError,
            GypsumError::Queue(_) => ErrorKind::QueueIoError,
        }
    }

    /// The report posted on the originating queue record.
    pub fn report(&self) -> FailureReport {
        FailureReport::new(self.kind(), self.to_string())
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::for_kind(self.kind())
    }
}

impl From<PathError> for GypsumError {
    fn from(err: PathError) -> Self {
        GypsumError::InvalidRequest(err.to_string())
    }
}

/// Stable process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Command line or configuration could not be used
    Usage = 2,
    LockMissing = 10,
    UnknownSchema = 20,
    SchemaValidationFailed = 21,
    PathMismatch = 22,
    DanglingReference = 23,
    MissingDeclaredFile = 24,
    UndeclaredFile = 25,
    InvalidDocument = 26,
    ExpiryJobSubmissionFailed = 30,
    InvalidPurgeJob = 31,
    InvalidRequest = 40,
    StoreIo = 50,
    QueueIo = 60,
}

impl ExitCode {
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::LockMissing => ExitCode::LockMissing,
            ErrorKind::UnknownSchema => ExitCode::UnknownSchema,
            ErrorKind::SchemaValidationFailed => ExitCode::SchemaValidationFailed,
            ErrorKind::PathMismatch => ExitCode::PathMismatch,
            ErrorKind::DanglingReference => ExitCode::DanglingReference,
            ErrorKind::MissingDeclaredFile => ExitCode::MissingDeclaredFile,
            ErrorKind::UndeclaredFile => ExitCode::UndeclaredFile,
            ErrorKind::InvalidDocument => ExitCode::InvalidDocument,
            ErrorKind::ExpiryJobSubmissionFailed => ExitCode::ExpiryJobSubmissionFailed,
            ErrorKind::InvalidPurgeJob => ExitCode::InvalidPurgeJob,
            ErrorKind::InvalidRequest => ExitCode::InvalidRequest,
            ErrorKind::StoreIoError => ExitCode::StoreIo,
            ErrorKind::QueueIoError => ExitCode::QueueIo,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }
}

impl Default for ExitCode {
    fn default() -> Self {
        ExitCode::Success
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // Every code fits in a u8.
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
