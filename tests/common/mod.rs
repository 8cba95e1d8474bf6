//! Shared fixtures for the publish and purge lifecycle tests.
//!
//! A `World` bundles an in-memory store, an in-memory queue, a fixed clock
//! and a small schema registry, plus helpers that play the uploader.

#![allow(dead_code)]

use gypsum::queue::MemoryJobQueue;
use gypsum::{FixedClock, PublishOptions, Publisher, PurgeOptions, Purger, SchemaRegistry};
use gypsum_protocol::{
    FinalizeRequest, LatestPointer, ProjectPaths, PurgeJob, PurgeMode, RevisionMetadata,
    VersionPaths, JSON_CONTENT_TYPE, PURGE_TITLE,
};
use gypsum_store::{MemoryObjectStore, ObjectStore, ObjectStoreExt};
use gypsum::JobQueue;
use serde_json::{json, Value};

/// Clock reading at the start of every test.
pub const NOW: i64 = 1_700_000_000_000;

/// Upload time declared by finalize requests.
pub const UPLOADED: i64 = NOW - 60_000;

/// Schema whose documents describe the artifact beside them.
pub const ARTIFACT_SCHEMA: &str = "urn:gypsum-test:artifact";

/// Schema whose documents describe themselves.
pub const SUMMARY_SCHEMA: &str = "urn:gypsum-test:summary";

pub struct World {
    pub store: MemoryObjectStore,
    pub queue: MemoryJobQueue,
    pub clock: FixedClock,
    pub schemas: SchemaRegistry,
}

impl World {
    pub fn new() -> Self {
        Self {
            // Small pages so every listing follows continuation tokens.
            store: MemoryObjectStore::new().with_page_size(2),
            queue: MemoryJobQueue::new().with_page_size(2),
            clock: FixedClock::at_millis(NOW),
            schemas: schemas(),
        }
    }

    pub fn publisher(&self) -> Publisher<'_> {
        Publisher::new(&self.store, &self.queue, &self.schemas, &self.clock).with_options(
            PublishOptions {
                concurrency: 4,
                page_size: 2,
            },
        )
    }

    pub fn purger(&self) -> Purger<'_> {
        Purger::new(&self.store, &self.queue, &self.clock).with_options(PurgeOptions {
            concurrency: 4,
            page_size: 2,
        })
    }

    /// Deposit a locked version whose manifest declares exactly `files`.
    pub fn upload(&self, project: &str, version: &str, files: &[(&str, Vec<u8>)]) {
        let manifest: Vec<&str> = files.iter().map(|(path, _)| *path).collect();
        self.upload_with_manifest(project, version, files, &manifest);
    }

    pub fn upload_with_manifest(
        &self,
        project: &str,
        version: &str,
        files: &[(&str, Vec<u8>)],
        manifest: &[&str],
    ) {
        let paths = VersionPaths::new(project, version).unwrap();
        self.store
            .put_json(&paths.lock(), &json!({"user_name": "uploader"}))
            .unwrap();
        for (relative, body) in files {
            let key = format!("{}{}", paths.prefix(), relative);
            self.store.put(&key, body, JSON_CONTENT_TYPE).unwrap();
        }
        self.store.put_json(&paths.manifest(), &manifest).unwrap();
    }

    /// Upload `name` with a metadata document beside it.
    pub fn upload_artifact(&self, project: &str, version: &str, name: &str) {
        let meta = format!("{}.json", name);
        self.upload(
            project,
            version,
            &[
                (name, b"artifact bytes".to_vec()),
                (meta.as_str(), doc(&artifact_meta(name))),
            ],
        );
    }

    /// Ask for the version to expire `expires_in` ms after indexing.
    pub fn request_expiry(&self, project: &str, version: &str, expires_in: u64) {
        let paths = VersionPaths::new(project, version).unwrap();
        self.store
            .put_json(&paths.expiry(), &json!({"expires_in": expires_in}))
            .unwrap();
    }

    /// Upload and publish an artifact version at the current clock reading.
    pub fn publish_artifact(&self, project: &str, version: &str) {
        self.upload_artifact(project, version, "a");
        self.publisher().publish(&request(project, version)).unwrap();
    }

    pub fn submit_purge(&self, mode: PurgeMode, project: &str, version: &str, delete_after: i64) -> u64 {
        let job = PurgeJob::new(mode, project, version, delete_after);
        self.queue.create(PURGE_TITLE, &job.to_body()).unwrap()
    }

    pub fn json(&self, key: &str) -> Option<Value> {
        self.store.get_json(key).unwrap()
    }

    pub fn latest_all(&self, project: &str) -> Option<LatestPointer> {
        let paths = ProjectPaths::new(project).unwrap();
        self.store.get_json(&paths.latest_all()).unwrap()
    }

    pub fn latest_persistent(&self, project: &str) -> Option<LatestPointer> {
        let paths = ProjectPaths::new(project).unwrap();
        self.store.get_json(&paths.latest_persistent()).unwrap()
    }

    pub fn revision(&self, project: &str, version: &str) -> Option<RevisionMetadata> {
        let paths = VersionPaths::new(project, version).unwrap();
        self.store.get_json(&paths.revision()).unwrap()
    }

    pub fn is_locked(&self, project: &str, version: &str) -> bool {
        let paths = VersionPaths::new(project, version).unwrap();
        self.store.exists(&paths.lock()).unwrap()
    }

    /// Every key under a version's prefix.
    pub fn version_keys(&self, project: &str, version: &str) -> Vec<String> {
        let prefix = VersionPaths::new(project, version).unwrap().prefix();
        self.store
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect()
    }
}

pub fn schemas() -> SchemaRegistry {
    SchemaRegistry::from_schemas([
        (
            ARTIFACT_SCHEMA.to_string(),
            json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "required": ["path"],
                "properties": {"path": {"type": "string"}},
                "_attributes": {"metadata_only": true}
            }),
        ),
        (
            SUMMARY_SCHEMA.to_string(),
            json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "required": ["path", "count"],
                "properties": {
                    "path": {"type": "string"},
                    "count": {"type": "integer"}
                }
            }),
        ),
    ])
}

pub fn artifact_meta(artifact: &str) -> Value {
    json!({"$schema": ARTIFACT_SCHEMA, "path": artifact})
}

pub fn summary(path: &str, count: i64) -> Value {
    json!({"$schema": SUMMARY_SCHEMA, "path": path, "count": count})
}

pub fn doc(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}

pub fn request(project: &str, version: &str) -> FinalizeRequest {
    FinalizeRequest {
        project: project.to_string(),
        version: version.to_string(),
        timestamp: UPLOADED,
        overwrite_permissions: false,
        permissions: None,
    }
}
