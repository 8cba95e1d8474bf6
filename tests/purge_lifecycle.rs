//! Purge Lifecycle Tests
//!
//! Incomplete and expired versions named by purge jobs: deferral, voiding,
//! deletion, pointer recomputation ahead of deletion, and per-job failure
//! reporting.

mod common;

use common::*;
use gypsum::queue::{JobState, QueueFailures};
use gypsum::{Clock, ExitCode, JobQueue, Purger};
use gypsum_protocol::{
    ErrorKind, LatestPointer, ProjectPaths, PurgeMode, RevisionMetadata, VersionPaths, PURGE_TITLE,
};
use gypsum_store::{
    FailureInjection, ListPage, ListRequest, MemoryObjectStore, ObjectStore, ObjectStoreExt,
    StoreOp, StoreResult,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

const HOUR: i64 = 3_600_000;

// =============================================================================
// Incomplete uploads
// =============================================================================

#[test]
fn test_incomplete_job_before_deadline_is_deferred() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    let job = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW + HOUR);

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.deferred, vec![job]);
    assert!(summary.deleted.is_empty());
    assert!(summary.is_success());

    assert_eq!(world.queue.get(job).unwrap().state, JobState::Open);
    assert!(world.is_locked("demo", "v1"));
    assert_eq!(world.version_keys("demo", "v1").len(), 4);
}

#[test]
fn test_incomplete_job_past_deadline_deletes_version() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    let job = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW - 1);

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.deleted.len(), 1);
    let deleted = &summary.deleted[0];
    assert_eq!((deleted.project.as_str(), deleted.version.as_str()), ("demo", "v1"));
    assert_eq!(deleted.objects, 4);
    assert_eq!(deleted.jobs, vec![job]);

    assert!(world.version_keys("demo", "v1").is_empty());
    assert_eq!(world.queue.get(job).unwrap().state, JobState::Closed);
    // Incomplete uploads were never pointed at.
    assert!(summary.recomputed.is_empty());
}

#[test]
fn test_incomplete_job_for_published_version_is_voided() {
    let world = World::new();
    world.publish_artifact("demo", "v1");
    let job = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW - 1);
    world.store.clear_operations();

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.voided, vec![job]);
    assert!(summary.deleted.is_empty());
    assert_eq!(world.queue.get(job).unwrap().state, JobState::Closed);
    assert!(world.store.operations().is_empty());
    assert!(world.revision("demo", "v1").is_some());
}

#[test]
fn test_lock_is_the_last_object_deleted() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW);
    world.store.clear_operations();

    world.purger().run().unwrap();
    let ops = world.store.operations();
    assert_eq!(ops.len(), 4);
    assert!(matches!(ops.last(), Some(StoreOp::Delete(key)) if key.ends_with("..LOCK")));
}

// =============================================================================
// Expired versions
// =============================================================================

#[test]
fn test_expired_version_is_unlinked_before_deletion() {
    let world = World::new();
    world.publish_artifact("demo", "v1");

    world.clock.advance_millis(1_000);
    world.upload_artifact("demo", "v2", "a");
    world.request_expiry("demo", "v2", HOUR as u64);
    let outcome = world.publisher().publish(&request("demo", "v2")).unwrap();
    let job = outcome.expiry_job_id.unwrap();
    assert_eq!(world.latest_all("demo").unwrap().version, "v2");

    // Not yet due.
    let summary = world.purger().run().unwrap();
    assert_eq!(summary.deferred, vec![job]);
    assert!(world.revision("demo", "v2").is_some());

    world.clock.advance_millis(HOUR);
    world.store.clear_operations();
    let summary = world.purger().run().unwrap();
    assert_eq!(summary.recomputed, vec!["demo".to_string()]);
    assert_eq!(summary.deleted.len(), 1);
    assert_eq!(world.queue.get(job).unwrap().state, JobState::Closed);

    assert!(world.version_keys("demo", "v2").is_empty());
    assert_eq!(world.latest_all("demo"), Some(LatestPointer::new("v1", NOW)));
    assert_eq!(world.latest_persistent("demo"), Some(LatestPointer::new("v1", NOW)));

    // Both pointers were rewritten before the first object went away.
    let project = ProjectPaths::new("demo").unwrap();
    let ops = world.store.operations();
    let position = |op: &StoreOp| ops.iter().position(|o| o == op).unwrap();
    let first_delete = ops
        .iter()
        .position(|op| matches!(op, StoreOp::Delete(_)))
        .unwrap();
    assert!(position(&StoreOp::Put(project.latest_all())) < first_delete);
    assert!(position(&StoreOp::Put(project.latest_persistent())) < first_delete);
}

#[test]
fn test_expiring_only_version_leaves_placeholder() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    world.request_expiry("demo", "v1", 1_000);
    world.publisher().publish(&request("demo", "v1")).unwrap();

    world.clock.advance_millis(1_000);
    world.purger().run().unwrap();

    assert!(world.version_keys("demo", "v1").is_empty());
    assert_eq!(world.latest_all("demo"), Some(LatestPointer::placeholder()));
    assert_eq!(world.latest_persistent("demo"), Some(LatestPointer::placeholder()));
}

#[test]
fn test_recompute_ignores_versions_still_uploading() {
    let world = World::new();
    world.publish_artifact("demo", "v1");
    world.clock.advance_millis(1_000);
    world.upload_artifact("demo", "v2", "a");
    world.request_expiry("demo", "v2", 1);
    world.publisher().publish(&request("demo", "v2")).unwrap();

    // An in-flight upload is not a candidate.
    world.upload_artifact("demo", "v3", "a");
    world.clock.advance_millis(10);
    world.purger().run().unwrap();

    assert_eq!(world.latest_all("demo").unwrap().version, "v1");
    assert!(world.is_locked("demo", "v3"));
}

#[test]
fn test_failed_recompute_postpones_deletion() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    world.request_expiry("demo", "v1", 1);
    let job = world
        .publisher()
        .publish(&request("demo", "v1"))
        .unwrap()
        .expiry_job_id
        .unwrap();
    world.clock.advance_millis(10);

    world.store.set_failures(FailureInjection {
        fail_put: vec!["..latest".into()],
        ..Default::default()
    });
    let summary = world.purger().run().unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.exit_code(), ExitCode::StoreIo);
    assert!(summary.deleted.is_empty());
    assert!(world.revision("demo", "v1").is_some());
    assert_eq!(world.queue.get(job).unwrap().state, JobState::Open);
    let comments = world.queue.comments(job);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("STORE_IO_ERROR"));

    // The next run, with the store healthy again, completes the job.
    world.store.set_failures(FailureInjection::default());
    let summary = world.purger().run().unwrap();
    assert!(summary.is_success());
    assert!(world.version_keys("demo", "v1").is_empty());
    assert_eq!(world.queue.get(job).unwrap().state, JobState::Closed);
}

/// Store that finishes the upload of `demo/v1` the first time the pointers
/// of `other` are listed, the way a publisher racing the purge run would.
struct PublishDuringListing<'a> {
    inner: &'a MemoryObjectStore,
    index_time: chrono::DateTime<chrono::Utc>,
    fired: AtomicBool,
}

impl PublishDuringListing<'_> {
    fn publish_demo_v1(&self) -> StoreResult<()> {
        let version = VersionPaths::new("demo", "v1").unwrap();
        let project = ProjectPaths::new("demo").unwrap();
        let revision = RevisionMetadata::new(self.index_time, self.index_time);
        self.inner.put_json(&version.revision(), &revision)?;
        self.inner.put_json(&project.latest_all(), &LatestPointer::new("v1", NOW))?;
        self.inner.delete(&version.manifest())?;
        self.inner.delete(&version.lock())
    }
}

impl ObjectStore for PublishDuringListing<'_> {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key)
    }

    fn put(&self, key: &str, body: &[u8], content_type: &str) -> StoreResult<()> {
        self.inner.put(key, body, content_type)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key)
    }

    fn list(&self, request: &ListRequest, token: Option<&str>) -> StoreResult<ListPage> {
        if request.prefix == "other/" && !self.fired.swap(true, Ordering::SeqCst) {
            self.publish_demo_v1()?;
        }
        self.inner.list(request, token)
    }
}

#[test]
fn test_upload_published_during_run_is_not_deleted() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    let incomplete = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW - 1);

    // A due expiry elsewhere forces a pointer recompute between the lock
    // check and the deletions.
    world.publish_artifact("other", "o1");
    world.upload_artifact("other", "o2", "a");
    world.request_expiry("other", "o2", 1);
    world.publisher().publish(&request("other", "o2")).unwrap();
    world.clock.advance_millis(10);

    let store = PublishDuringListing {
        inner: &world.store,
        index_time: world.clock.now(),
        fired: AtomicBool::new(false),
    };
    let summary = Purger::new(&store, &world.queue, &world.clock).run().unwrap();
    assert!(store.fired.load(Ordering::SeqCst));

    assert!(summary.is_success());
    assert_eq!(summary.voided, vec![incomplete]);
    assert_eq!(world.queue.get(incomplete).unwrap().state, JobState::Closed);
    assert_eq!(summary.deleted.len(), 1);
    assert_eq!(summary.deleted[0].project, "other");

    // The published version and the pointer to it survive.
    assert!(world.revision("demo", "v1").is_some());
    assert!(!world.version_keys("demo", "v1").is_empty());
    assert_eq!(world.latest_all("demo"), Some(LatestPointer::new("v1", NOW)));
}

// =============================================================================
// Job handling
// =============================================================================

#[test]
fn test_invalid_job_is_reported_and_skipped() {
    let world = World::new();
    let bad = world
        .queue
        .create(PURGE_TITLE, &json!({"project": "demo", "version": "v1", "mode": "sometime"}))
        .unwrap();
    world.upload_artifact("demo", "v2", "a");
    let good = world.submit_purge(PurgeMode::Incomplete, "demo", "v2", NOW);

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].job, bad);
    assert_eq!(summary.failures[0].error.kind(), ErrorKind::InvalidPurgeJob);
    assert_eq!(summary.exit_code(), ExitCode::InvalidPurgeJob);

    let comments = world.queue.comments(bad);
    assert_eq!(comments.len(), 1);
    assert!(comments[0].starts_with("gypsum failure (INVALID_PURGE_JOB):"));
    assert_eq!(world.queue.get(bad).unwrap().state, JobState::Open);

    assert_eq!(world.queue.get(good).unwrap().state, JobState::Closed);
    assert!(world.version_keys("demo", "v2").is_empty());
}

#[test]
fn test_duplicate_jobs_share_one_deletion() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    let first = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW - 10);
    let second = world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW - 5);
    world.store.clear_operations();

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.deleted.len(), 1);
    assert_eq!(summary.deleted[0].jobs, vec![first, second]);
    assert_eq!(world.queue.get(first).unwrap().state, JobState::Closed);
    assert_eq!(world.queue.get(second).unwrap().state, JobState::Closed);
    assert_eq!(world.store.operations().len(), 4);
}

#[test]
fn test_foreign_and_unrelated_records_are_ignored() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    let body = json!({"project": "demo", "version": "v1", "mode": "incomplete", "delete_after": 0});
    let foreign = world
        .queue
        .insert_foreign("someone-else", PURGE_TITLE, &body.to_string());
    let other = world.queue.create("upload project", &json!({})).unwrap();

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.scanned, 0);
    assert!(world.is_locked("demo", "v1"));
    assert_eq!(world.queue.get(foreign).unwrap().state, JobState::Open);
    assert_eq!(world.queue.get(other).unwrap().state, JobState::Open);
}

#[test]
fn test_rerun_after_completion_is_a_no_op() {
    let world = World::new();
    world.upload_artifact("demo", "v1", "a");
    world.submit_purge(PurgeMode::Incomplete, "demo", "v1", NOW);
    world.purger().run().unwrap();
    world.store.clear_operations();

    let summary = world.purger().run().unwrap();
    assert_eq!(summary.scanned, 0);
    assert!(world.store.operations().is_empty());
}

#[test]
fn test_queue_listing_failure_aborts_run() {
    let world = World::new();
    world.queue.set_failures(QueueFailures {
        fail_list: true,
        ..Default::default()
    });

    let err = world.purger().run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueIoError);
}
