//! Deleting incomplete and expired versions.
//!
//! A purge run scans every open purge job, decides what each one asks for,
//! and then works in two phases. First, the latest pointers of every
//! project losing an expired version are recomputed without the versions
//! about to go. Only then are the versions' objects deleted and their jobs
//! closed. A pointer therefore never refers to a version that is being
//! removed.

mod plan;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, info_span, warn};

use gypsum_protocol::{ProjectPaths, PurgeJob, PurgeMode, VersionPaths, PURGE_TITLE};
use gypsum_store::{ObjectStore, ObjectStoreExt, StoreError, StoreResult, DEFAULT_PAGE_SIZE};

use crate::clock::Clock;
use crate::config::DEFAULT_CONCURRENCY;
use crate::error::{ExitCode, GypsumError};
use crate::fanout::map_concurrent;
use crate::latest::{self, ScanOptions, VersionState};
use crate::queue::{JobQuery, JobQueue, JobRecord};

pub use plan::{classify, Decision};

/// Tuning for a purge run.
#[derive(Debug, Clone, Copy)]
pub struct PurgeOptions {
    pub concurrency: usize,
    pub page_size: usize,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A version removed by the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedVersion {
    pub project: String,
    pub version: String,
    pub objects: usize,
    /// Jobs closed by the deletion.
    pub jobs: Vec<u64>,
}

/// A job the run could not complete.
#[derive(Debug)]
pub struct JobFailure {
    pub job: u64,
    pub error: GypsumError,
}

/// Result of a purge run.
#[derive(Debug, Default)]
pub struct PurgeSummary {
    /// Purge jobs considered.
    pub scanned: usize,
    /// Jobs closed without deleting anything.
    pub voided: Vec<u64>,
    /// Jobs whose deadline has not passed.
    pub deferred: Vec<u64>,
    pub deleted: Vec<DeletedVersion>,
    /// Projects whose pointers were recomputed.
    pub recomputed: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl PurgeSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Exit code of the first failure, or success.
    pub fn exit_code(&self) -> ExitCode {
        self.failures
            .first()
            .map(|failure| failure.error.exit_code())
            .unwrap_or(ExitCode::Success)
    }
}

/// A version marked for deletion this run.
#[derive(Debug, Default)]
struct Marked {
    jobs: Vec<u64>,
    /// Jobs that asked for an unfinished upload to be removed.
    incomplete: Vec<u64>,
}

/// Deletes versions named by purge jobs.
pub struct Purger<'a> {
    store: &'a dyn ObjectStore,
    queue: &'a dyn JobQueue,
    clock: &'a dyn Clock,
    options: PurgeOptions,
}

impl<'a> Purger<'a> {
    pub fn new(store: &'a dyn ObjectStore, queue: &'a dyn JobQueue, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            queue,
            clock,
            options: PurgeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PurgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one purge cycle.
    ///
    /// Only a failure to scan the queue aborts the run; problems with single
    /// jobs are reported on the job and collected in the summary.
    pub fn run(&self) -> Result<PurgeSummary, GypsumError> {
        let span = info_span!("purge");
        let _enter = span.enter();

        // Collect the whole listing before deciding anything.
        let records = self.queue.list_all(&JobQuery::open_oldest_first())?;
        let now = self.clock.now_millis();

        let mut summary = PurgeSummary::default();
        let mut marked: BTreeMap<(String, String), Marked> = BTreeMap::new();
        let mut redefine: BTreeSet<String> = BTreeSet::new();

        for record in records.iter().filter(|r| r.title == PURGE_TITLE) {
            summary.scanned += 1;
            let (job, decision) = match self.decide(record, now) {
                Ok(decided) => decided,
                Err(error) => {
                    self.fail(&mut summary, record.id, error);
                    continue;
                }
            };

            match decision {
                Decision::Void => {
                    info!(
                        job = record.id,
                        project = job.project(),
                        version = job.version(),
                        "version is no longer locked; closing job"
                    );
                    match self.queue.close(record.id) {
                        Ok(()) => summary.voided.push(record.id),
                        Err(e) => self.fail(&mut summary, record.id, e.into()),
                    }
                }
                Decision::Defer => {
                    debug!(job = record.id, delete_after = job.delete_after(), "deadline not reached");
                    summary.deferred.push(record.id);
                }
                Decision::Delete => {
                    if job.mode() == PurgeMode::Expiry {
                        redefine.insert(job.project().to_string());
                    }
                    let target = marked
                        .entry((job.project().to_string(), job.version().to_string()))
                        .or_default();
                    target.jobs.push(record.id);
                    if job.mode() == PurgeMode::Incomplete {
                        target.incomplete.push(record.id);
                    }
                }
            }
        }

        let blocked = self.recompute_pointers(&redefine, &marked, &mut summary);

        for ((project, version), target) in &marked {
            if blocked.contains(project) {
                continue;
            }
            match VersionPaths::new(project, version) {
                Ok(paths) => self.delete_target(&paths, target, &mut summary),
                Err(e) => {
                    for &job in &target.jobs {
                        self.fail(&mut summary, job, e.clone().into());
                    }
                }
            }
        }

        info!(
            scanned = summary.scanned,
            deleted = summary.deleted.len(),
            voided = summary.voided.len(),
            deferred = summary.deferred.len(),
            failed = summary.failures.len(),
            "purge finished"
        );
        Ok(summary)
    }

    /// Decode a record and classify it against the live lock state.
    fn decide(&self, record: &JobRecord, now: i64) -> Result<(PurgeJob, Decision), GypsumError> {
        let job = PurgeJob::decode(&record.body).map_err(|source| GypsumError::InvalidPurgeJob {
            id: record.id,
            source,
        })?;
        let lock = match job.mode() {
            PurgeMode::Incomplete => {
                let paths = VersionPaths::new(job.project(), job.version())?;
                Some(VersionState::probe(self.store, &paths)?)
            }
            PurgeMode::Expiry => None,
        };
        let decision = classify(&job, lock, now);
        Ok((job, decision))
    }

    /// Phase one. Returns the projects whose deletions must wait.
    fn recompute_pointers(
        &self,
        projects: &BTreeSet<String>,
        marked: &BTreeMap<(String, String), Marked>,
        summary: &mut PurgeSummary,
    ) -> BTreeSet<String> {
        let scan = ScanOptions {
            concurrency: self.options.concurrency,
            page_size: self.options.page_size,
        };
        let mut blocked = BTreeSet::new();

        for project in projects {
            let excluded: BTreeSet<String> = marked
                .keys()
                .filter(|(p, _)| p == project)
                .map(|(_, v)| v.clone())
                .collect();

            // Identifiers were validated when the jobs were decoded.
            let Ok(paths) = ProjectPaths::new(project) else {
                blocked.insert(project.clone());
                continue;
            };
            match latest::recompute(self.store, &paths, &excluded, scan) {
                Ok(_) => summary.recomputed.push(project.clone()),
                Err(error) => {
                    warn!(project = %project, %error, "could not recompute latest pointers; deletions postponed");
                    for (_, target) in marked.iter().filter(|((p, _), _)| p == project) {
                        for &job in &target.jobs {
                            let error = StoreError::Backend(format!(
                                "latest pointers of '{}' could not be recomputed: {}",
                                project, error
                            ));
                            self.fail(summary, job, error.into());
                        }
                    }
                    blocked.insert(project.clone());
                }
            }
        }
        blocked
    }

    /// Phase two for one version.
    ///
    /// The lock of an incomplete upload is checked again first: the upload
    /// may have been published while pointers were recomputed, in which case
    /// the incomplete jobs are void and any expiry jobs wait for a run that
    /// sees the published version.
    fn delete_target(&self, paths: &VersionPaths, target: &Marked, summary: &mut PurgeSummary) {
        if !target.incomplete.is_empty() {
            match VersionState::probe(self.store, paths) {
                Ok(VersionState::Locked) => {}
                Ok(VersionState::Unlocked) => {
                    info!(
                        project = paths.project(),
                        version = paths.version(),
                        "version was published during the run; not deleting"
                    );
                    for &job in &target.jobs {
                        if !target.incomplete.contains(&job) {
                            summary.deferred.push(job);
                            continue;
                        }
                        match self.queue.close(job) {
                            Ok(()) => summary.voided.push(job),
                            Err(e) => self.fail(summary, job, e.into()),
                        }
                    }
                    return;
                }
                Err(error) => {
                    for &job in &target.jobs {
                        let error = StoreError::Backend(format!(
                            "lock of {}/{} could not be checked: {}",
                            paths.project(),
                            paths.version(),
                            error
                        ));
                        self.fail(summary, job, error.into());
                    }
                    return;
                }
            }
        }
        self.delete_version(paths, &target.jobs, summary);
    }

    /// Delete everything under a version's prefix, then close its jobs.
    fn delete_version(&self, paths: &VersionPaths, jobs: &[u64], summary: &mut PurgeSummary) {
        let (project, version) = (paths.project(), paths.version());
        match self.delete_objects(paths) {
            Ok(objects) => {
                info!(project, version, objects, "deleted version");
                let mut closed = Vec::new();
                for &job in jobs {
                    match self.queue.close(job) {
                        Ok(()) => closed.push(job),
                        Err(e) => self.fail(summary, job, e.into()),
                    }
                }
                summary.deleted.push(DeletedVersion {
                    project: project.to_string(),
                    version: version.to_string(),
                    objects,
                    jobs: closed,
                });
            }
            Err(error) => {
                for &job in jobs {
                    let error = StoreError::Backend(format!(
                        "deleting {}/{} failed: {}",
                        project, version, error
                    ));
                    self.fail(summary, job, error.into());
                }
            }
        }
    }

    /// Delete every object of a version, returning how many there were.
    ///
    /// Revision metadata goes first so a partly deleted version is never
    /// again a latest candidate; the lock goes last so an unfinished upload
    /// stays recognisable until nothing else is left.
    fn delete_objects(&self, paths: &VersionPaths) -> StoreResult<usize> {
        let keys = self.store.list_keys(&paths.prefix(), self.options.page_size)?;
        let revision = paths.revision();
        let lock = paths.lock();

        if keys.contains(&revision) {
            self.store.delete(&revision)?;
        }
        let rest: Vec<&String> = keys
            .iter()
            .filter(|key| **key != revision && **key != lock)
            .collect();
        map_concurrent(&rest, self.options.concurrency, |key| self.store.delete(key))?;
        if keys.contains(&lock) {
            self.store.delete(&lock)?;
        }
        Ok(keys.len())
    }

    /// Record a failed job and report it on the queue.
    fn fail(&self, summary: &mut PurgeSummary, job: u64, error: GypsumError) {
        let report = error.report();
        warn!(job, kind = %report.kind, "purge job failed: {}", report.message);
        if let Err(e) = self.queue.comment(job, &report.to_comment()) {
            warn!(job, error = %e, "could not report failure");
        }
        summary.failures.push(JobFailure { job, error });
    }
}
