//! In-memory job queue for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use gypsum_protocol::page::Page;

use super::{
    page_by_offset, select_records, JobQuery, JobQueue, JobRecord, JobState, QueueError,
    QueueResult, LOCAL_CREATOR,
};

/// Failure injection for queue operations.
#[derive(Debug, Clone, Default)]
pub struct QueueFailures {
    pub fail_create: bool,
    pub fail_close: bool,
    pub fail_comment: bool,
    pub fail_list: bool,
}

#[derive(Debug)]
struct Inner {
    records: BTreeMap<u64, JobRecord>,
    comments: BTreeMap<u64, Vec<String>>,
    next_id: u64,
    page_size: usize,
    failures: QueueFailures,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            comments: BTreeMap::new(),
            next_id: 1,
            page_size: 30,
            failures: QueueFailures::default(),
        }
    }
}

/// Thread-safe in-memory queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobQueue {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.write().page_size = page_size;
        self
    }

    pub fn set_failures(&self, failures: QueueFailures) {
        self.write().failures = failures;
    }

    /// Insert a record created by some other identity.
    pub fn insert_foreign(&self, creator: &str, title: &str, body: &str) -> u64 {
        let mut inner = self.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(
            id,
            JobRecord {
                id,
                title: title.to_string(),
                body: body.to_string(),
                state: JobState::Open,
                creator: creator.to_string(),
            },
        );
        id
    }

    /// Comments posted on a record, in order.
    pub fn comments(&self, id: u64) -> Vec<String> {
        self.read().comments.get(&id).cloned().unwrap_or_default()
    }

    /// Every record, by id.
    pub fn records(&self) -> Vec<JobRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn open_records(&self) -> Vec<JobRecord> {
        self.read()
            .records
            .values()
            .filter(|r| r.state == JobState::Open)
            .cloned()
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn injected(enabled: bool, op: &str) -> QueueResult<()> {
    if enabled {
        Err(QueueError::Backend(format!("injected {} failure", op)))
    } else {
        Ok(())
    }
}

impl JobQueue for MemoryJobQueue {
    fn create(&self, title: &str, body: &Value) -> QueueResult<u64> {
        let mut inner = self.write();
        injected(inner.failures.fail_create, "create")?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(
            id,
            JobRecord {
                id,
                title: title.to_string(),
                body: body.to_string(),
                state: JobState::Open,
                creator: LOCAL_CREATOR.to_string(),
            },
        );
        Ok(id)
    }

    fn get(&self, id: u64) -> QueueResult<JobRecord> {
        self.read()
            .records
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    fn close(&self, id: u64) -> QueueResult<()> {
        let mut inner = self.write();
        injected(inner.failures.fail_close, "close")?;
        let record = inner.records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        record.state = JobState::Closed;
        Ok(())
    }

    fn comment(&self, id: u64, text: &str) -> QueueResult<()> {
        let mut inner = self.write();
        injected(inner.failures.fail_comment, "comment")?;
        if !inner.records.contains_key(&id) {
            return Err(QueueError::NotFound(id));
        }
        inner.comments.entry(id).or_default().push(text.to_string());
        Ok(())
    }

    fn list(&self, query: &JobQuery, token: Option<&str>) -> QueueResult<Page<JobRecord>> {
        let inner = self.read();
        injected(inner.failures.fail_list, "list")?;
        let records = select_records(inner.records.values().cloned().collect(), query, LOCAL_CREATOR);
        page_by_offset(records, token, inner.page_size)
    }
}
