//! Classification of purge jobs.

use gypsum_protocol::PurgeJob;

use crate::latest::VersionState;

/// What to do with one purge job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to delete; close the job.
    Void,
    /// Deadline not reached; leave the job open.
    Defer,
    /// Delete the version and close the job.
    Delete,
}

/// Classify `job` at `now_millis`.
///
/// `lock` is the version's live lock state and is only consulted for
/// incomplete uploads: once the lock is gone the upload either finished or
/// was already removed, and the job has nothing left to do.
pub fn classify(job: &PurgeJob, lock: Option<VersionState>, now_millis: i64) -> Decision {
    match job {
        PurgeJob::Incomplete { .. } => match lock {
            Some(VersionState::Unlocked) => Decision::Void,
            _ if !job.is_due(now_millis) => Decision::Defer,
            _ => Decision::Delete,
        },
        PurgeJob::Expiry { .. } => {
            if job.is_due(now_millis) {
                Decision::Delete
            } else {
                Decision::Defer
            }
        }
    }
}
