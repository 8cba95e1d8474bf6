//! Finalizing an uploaded version.
//!
//! Publishing runs in order, each step a precondition of the next:
//!
//! 1. the version's lock must exist;
//! 2. revision metadata is built, and a retention request (if any) is
//!    registered as an `expiry` purge job;
//! 3. every document is validated and the aggregated document assembled;
//! 4. permissions are written when absent (or when asked to overwrite);
//! 5. latest pointers are advanced;
//! 6. the writes of steps 3-5 run concurrently and are joined;
//! 7. the manifest and then the lock are deleted.
//!
//! A failure at any step leaves the lock in place, so a version is never
//! reported as published without all of its state.

pub mod validate;

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

use gypsum_protocol::paths::{is_json_document, is_system_path};
use gypsum_protocol::{
    ExpiryDescriptor, FinalizeRequest, LatestPointer, Manifest, PurgeJob, PurgeMode,
    RevisionMetadata, VersionPaths, FINALIZE_TITLE, JSON_CONTENT_TYPE, PURGE_TITLE,
};
use gypsum_store::{ObjectStore, ObjectStoreExt, StoreError, StoreResult, DEFAULT_PAGE_SIZE};

use crate::clock::Clock;
use crate::config::DEFAULT_CONCURRENCY;
use crate::error::GypsumError;
use crate::fanout::map_concurrent;
use crate::latest::{advance_pointer, write_if_absent, VersionState};
use crate::queue::JobQueue;
use crate::schema::SchemaRegistry;

/// Tuning for a publish run.
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    /// Maximum concurrent store requests.
    pub concurrency: usize,
    /// Entries requested per listing page.
    pub page_size: usize,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// What a successful publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub project: String,
    pub version: String,
    pub index_time: DateTime<Utc>,
    /// Number of validated documents.
    pub documents: usize,
    pub expiry_job_id: Option<u64>,
    pub permissions_written: bool,
    pub latest_all_updated: bool,
    pub latest_persistent_updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Revision,
    Aggregated,
    Permissions,
    LatestAll,
    LatestPersistent,
}

#[derive(Debug)]
enum WriteOp {
    Replace { key: String, body: Vec<u8> },
    CreateOnly { key: String, body: Vec<u8> },
    Advance { key: String, pointer: LatestPointer },
    PlaceholderIfAbsent { key: String },
}

#[derive(Debug)]
struct PendingWrite {
    target: Target,
    op: WriteOp,
}

impl PendingWrite {
    /// Apply the write, returning whether anything was stored.
    fn apply(&self, store: &dyn ObjectStore) -> StoreResult<bool> {
        match &self.op {
            WriteOp::Replace { key, body } => {
                store.put(key, body, JSON_CONTENT_TYPE)?;
                Ok(true)
            }
            WriteOp::CreateOnly { key, body } => {
                if store.exists(key)? {
                    return Ok(false);
                }
                store.put(key, body, JSON_CONTENT_TYPE)?;
                Ok(true)
            }
            WriteOp::Advance { key, pointer } => advance_pointer(store, key, pointer),
            WriteOp::PlaceholderIfAbsent { key } => {
                write_if_absent(store, key, &LatestPointer::placeholder())
            }
        }
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Publishes uploaded versions.
pub struct Publisher<'a> {
    store: &'a dyn ObjectStore,
    queue: &'a dyn JobQueue,
    schemas: &'a SchemaRegistry,
    clock: &'a dyn Clock,
    options: PublishOptions,
}

impl<'a> Publisher<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        queue: &'a dyn JobQueue,
        schemas: &'a SchemaRegistry,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            store,
            queue,
            schemas,
            clock,
            options: PublishOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    /// Finalize one version.
    pub fn publish(&self, request: &FinalizeRequest) -> Result<PublishOutcome, GypsumError> {
        let paths = VersionPaths::new(&request.project, &request.version)?;
        let span = info_span!("publish", project = %request.project, version = %request.version);
        let _enter = span.enter();

        if VersionState::probe(self.store, &paths)? != VersionState::Locked {
            return Err(GypsumError::LockMissing {
                project: request.project.clone(),
                version: request.version.clone(),
            });
        }

        let upload_time = request.upload_time().ok_or_else(|| {
            GypsumError::InvalidRequest(format!("timestamp {} is out of range", request.timestamp))
        })?;
        let now = self.clock.now();
        let metadata = self.register_expiry(&paths, RevisionMetadata::new(upload_time, now))?;

        let (aggregated, documents) = self.validate_and_aggregate(&paths)?;

        let pending = self.plan_writes(&paths, request, &metadata, aggregated)?;
        let written = map_concurrent(&pending, self.options.concurrency, |pending| {
            pending.apply(self.store).map(|stored| (pending.target, stored))
        })?;
        let stored = |target: Target| written.iter().any(|(t, stored)| *t == target && *stored);

        // The lock goes last: its absence is what marks the version published.
        self.store.delete(&paths.manifest())?;
        self.store.delete(&paths.lock())?;

        let outcome = PublishOutcome {
            project: request.project.clone(),
            version: request.version.clone(),
            index_time: now,
            documents,
            expiry_job_id: metadata.expiry_job_id,
            permissions_written: stored(Target::Permissions),
            latest_all_updated: stored(Target::LatestAll),
            latest_persistent_updated: stored(Target::LatestPersistent),
        };
        info!(
            documents = outcome.documents,
            expiry_job = ?outcome.expiry_job_id,
            latest_updated = outcome.latest_all_updated,
            "published version"
        );
        Ok(outcome)
    }

    /// Publish the request held by queue record `id` and acknowledge it.
    ///
    /// On success the record is closed; on failure the failure report is
    /// posted on it and the record stays open.
    pub fn run_finalize_job(&self, id: u64) -> Result<PublishOutcome, GypsumError> {
        let result = self.load_request(id).and_then(|request| self.publish(&request));
        match result {
            Ok(outcome) => {
                self.queue.close(id)?;
                Ok(outcome)
            }
            Err(err) => {
                let report = err.report();
                warn!(job = id, kind = %report.kind, "publish failed: {}", report.message);
                if let Err(comment_err) = self.queue.comment(id, &report.to_comment()) {
                    warn!(job = id, error = %comment_err, "could not report failure");
                }
                Err(err)
            }
        }
    }

    fn load_request(&self, id: u64) -> Result<FinalizeRequest, GypsumError> {
        let record = self.queue.get(id)?;
        if record.title != FINALIZE_TITLE {
            return Err(GypsumError::InvalidRequest(format!(
                "record #{} is titled '{}', not '{}'",
                id, record.title, FINALIZE_TITLE
            )));
        }
        FinalizeRequest::decode(&record.body)
            .map_err(|e| GypsumError::InvalidRequest(format!("record #{}: {}", id, e)))
    }

    /// Register the expiry job if the uploader asked for one.
    fn register_expiry(
        &self,
        paths: &VersionPaths,
        metadata: RevisionMetadata,
    ) -> Result<RevisionMetadata, GypsumError> {
        let descriptor = match self.store.get_json::<ExpiryDescriptor>(&paths.expiry()) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return Ok(metadata),
            Err(StoreError::Decode { message, .. }) => {
                return Err(GypsumError::InvalidRequest(format!(
                    "unreadable expiry descriptor: {}",
                    message
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let expiry_time = i64::try_from(descriptor.expires_in)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|lifetime| metadata.index_time.checked_add_signed(lifetime))
            .ok_or_else(|| {
                GypsumError::InvalidRequest(format!(
                    "expires_in {} is out of range",
                    descriptor.expires_in
                ))
            })?;

        let job = PurgeJob::new(
            PurgeMode::Expiry,
            paths.project(),
            paths.version(),
            expiry_time.timestamp_millis(),
        );
        let id = self
            .queue
            .create(PURGE_TITLE, &job.to_body())
            .map_err(|source| GypsumError::ExpiryJobSubmissionFailed {
                project: paths.project().to_string(),
                version: paths.version().to_string(),
                source,
            })?;
        info!(job = id, expires = %expiry_time, "registered expiry job");
        Ok(metadata.with_expiry(expiry_time, id))
    }

    /// Validate every document and build the aggregated document.
    fn validate_and_aggregate(&self, paths: &VersionPaths) -> Result<(Vec<u8>, usize), GypsumError> {
        let keys = self.store.list_keys(&paths.prefix(), self.options.page_size)?;
        let content: Vec<&str> = keys
            .iter()
            .filter_map(|key| paths.relative_path(key))
            .filter(|relative| !is_system_path(relative))
            .collect();
        let content_set: BTreeSet<&str> = content.iter().copied().collect();
        let documents: Vec<&str> = content
            .iter()
            .copied()
            .filter(|relative| is_json_document(relative))
            .collect();
        debug!(objects = content.len(), documents = documents.len(), "listed version");

        let prefix = paths.prefix();
        let fetched = map_concurrent(&documents, self.options.concurrency, |relative| {
            let key = format!("{}{}", prefix, relative);
            self.store.get(&key)?.ok_or_else(|| GypsumError::InvalidDocument {
                path: relative.to_string(),
                reason: "listed but no longer readable".to_string(),
            })
        })?;

        let mut aggregated = Vec::with_capacity(documents.len());
        for (relative, bytes) in documents.iter().zip(&fetched) {
            let document = validate::parse_document(relative, bytes)?;
            validate::check_document(relative, &document, self.schemas, &content_set)?;
            aggregated.push(document);
        }

        let manifest = match self.store.get_json::<Manifest>(&paths.manifest()) {
            Ok(Some(manifest)) => Some(manifest),
            // An earlier attempt got as far as cleanup before failing.
            Ok(None) if self.store.exists(&paths.revision())? => {
                warn!("manifest already consumed by an earlier attempt; skipping cross-check");
                None
            }
            Ok(None) => return Err(GypsumError::InvalidRequest("manifest is missing".into())),
            Err(StoreError::Decode { message, .. }) => {
                return Err(GypsumError::InvalidRequest(format!(
                    "unreadable manifest: {}",
                    message
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(manifest) = manifest {
            validate::check_manifest(&manifest, &content_set)?;
        }

        let count = aggregated.len();
        let body = encode(&paths.aggregated(), &aggregated)?;
        Ok((body, count))
    }

    fn plan_writes(
        &self,
        paths: &VersionPaths,
        request: &FinalizeRequest,
        metadata: &RevisionMetadata,
        aggregated: Vec<u8>,
    ) -> Result<Vec<PendingWrite>, GypsumError> {
        let project = paths.project_paths();

        let permissions = request
            .permissions
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let permissions_key = project.permissions();
        let permissions_body = encode(&permissions_key, &permissions)?;
        let revision_key = paths.revision();
        let revision_body = encode(&revision_key, metadata)?;

        let pointer = LatestPointer::new(paths.version(), metadata.index_millis());
        let persistent = if metadata.expires() {
            WriteOp::PlaceholderIfAbsent {
                key: project.latest_persistent(),
            }
        } else {
            WriteOp::Advance {
                key: project.latest_persistent(),
                pointer: pointer.clone(),
            }
        };

        Ok(vec![
            PendingWrite {
                target: Target::Revision,
                op: WriteOp::Replace {
                    key: revision_key,
                    body: revision_body,
                },
            },
            PendingWrite {
                target: Target::Aggregated,
                op: WriteOp::Replace {
                    key: paths.aggregated(),
                    body: aggregated,
                },
            },
            PendingWrite {
                target: Target::Permissions,
                op: if request.overwrite_permissions {
                    WriteOp::Replace {
                        key: permissions_key,
                        body: permissions_body,
                    }
                } else {
                    WriteOp::CreateOnly {
                        key: permissions_key,
                        body: permissions_body,
                    }
                },
            },
            PendingWrite {
                target: Target::LatestAll,
                op: WriteOp::Advance {
                    key: project.latest_all(),
                    pointer,
                },
            },
            PendingWrite {
                target: Target::LatestPersistent,
                op: persistent,
            },
        ])
    }
}
