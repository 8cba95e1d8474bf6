//! Object store errors.

use std::io;

use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from object store operations.
///
/// A missing object is not an error: reads report it as `None`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("object '{key}' is not valid JSON: {message}")]
    Decode { key: String, message: String },

    #[error("failed to encode object '{key}': {message}")]
    Encode { key: String, message: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn io(key: &str, source: io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}
