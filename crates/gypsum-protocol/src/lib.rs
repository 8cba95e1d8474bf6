//! Gypsum protocol types
//!
//! Object keys, queue job records, metadata formats and the failure taxonomy
//! shared by the publisher, the purger and the storage adapters.

pub mod error;
pub mod job;
pub mod metadata;
pub mod page;
pub mod paths;

pub use error::{ErrorKind, FailureReport};
pub use job::{FinalizeRequest, JobDecodeError, PurgeJob, PurgeMode, FINALIZE_TITLE, PURGE_TITLE};
pub use metadata::{ExpiryDescriptor, LatestPointer, Manifest, RevisionMetadata};
pub use page::{paginate, Page, Paginated};
pub use paths::{PathError, ProjectPaths, VersionPaths};

/// Content type used for every JSON object gypsum writes.
pub const JSON_CONTENT_TYPE: &str = "application/json";
