//! Directory-backed job queue.
//!
//! Each record is `<dir>/<id>.json` holding the record and its comments.
//! Ids are allocated by exclusive creation of the next free file name, so
//! several processes may share a directory.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use gypsum_protocol::page::Page;

use super::{
    page_by_offset, select_records, JobQuery, JobQueue, JobRecord, JobState, QueueError,
    QueueResult, LOCAL_CREATOR,
};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(flatten)]
    record: JobRecord,
    #[serde(default)]
    comments: Vec<String>,
}

/// Job queue stored under a local directory.
#[derive(Debug, Clone)]
pub struct FsJobQueue {
    dir: PathBuf,
}

impl FsJobQueue {
    pub fn new(dir: impl AsRef<Path>) -> QueueResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn ids(&self) -> QueueResult<Vec<u64>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn load(&self, id: u64) -> QueueResult<StoredRecord> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(QueueError::NotFound(id)),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| QueueError::Corrupt {
            id,
            message: e.to_string(),
        })
    }

    /// Rewrite an existing record via a temporary file and rename.
    fn store(&self, stored: &StoredRecord) -> QueueResult<()> {
        let path = self.record_path(stored.record.id);
        let temp = self.dir.join(format!(".{}.json.tmp", stored.record.id));
        let bytes = serde_json::to_vec_pretty(stored).map_err(|e| QueueError::Corrupt {
            id: stored.record.id,
            message: e.to_string(),
        })?;
        fs::write(&temp, bytes).map_err(|e| io_error(&temp, e))?;
        fs::rename(&temp, &path).map_err(|e| io_error(&path, e))
    }

    fn update(&self, id: u64, apply: impl FnOnce(&mut StoredRecord)) -> QueueResult<()> {
        let mut stored = self.load(id)?;
        apply(&mut stored);
        self.store(&stored)
    }
}

fn io_error(path: &Path, source: io::Error) -> QueueError {
    QueueError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl JobQueue for FsJobQueue {
    fn create(&self, title: &str, body: &Value) -> QueueResult<u64> {
        let mut id = self.ids()?.last().copied().unwrap_or(0) + 1;
        loop {
            let stored = StoredRecord {
                record: JobRecord {
                    id,
                    title: title.to_string(),
                    body: body.to_string(),
                    state: JobState::Open,
                    creator: LOCAL_CREATOR.to_string(),
                },
                comments: Vec::new(),
            };
            let path = self.record_path(id);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let bytes =
                        serde_json::to_vec_pretty(&stored).map_err(|e| QueueError::Corrupt {
                            id,
                            message: e.to_string(),
                        })?;
                    file.write_all(&bytes).map_err(|e| io_error(&path, e))?;
                    file.sync_all().map_err(|e| io_error(&path, e))?;
                    debug!(job = id, title, "created record");
                    return Ok(id);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => id += 1,
                Err(e) => return Err(io_error(&path, e)),
            }
        }
    }

    fn get(&self, id: u64) -> QueueResult<JobRecord> {
        Ok(self.load(id)?.record)
    }

    fn close(&self, id: u64) -> QueueResult<()> {
        self.update(id, |stored| stored.record.state = JobState::Closed)
    }

    fn comment(&self, id: u64, text: &str) -> QueueResult<()> {
        self.update(id, |stored| stored.comments.push(text.to_string()))
    }

    fn list(&self, query: &JobQuery, token: Option<&str>) -> QueueResult<Page<JobRecord>> {
        let records = self
            .ids()?
            .into_iter()
            .map(|id| self.get(id))
            .collect::<QueueResult<Vec<_>>>()?;
        page_by_offset(select_records(records, query, LOCAL_CREATOR), token, PAGE_SIZE)
    }
}

impl FsJobQueue {
    /// Comments posted on a record, in order.
    pub fn comments(&self, id: u64) -> QueueResult<Vec<String>> {
        Ok(self.load(id)?.comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_records_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let queue = FsJobQueue::new(dir.path()).unwrap();
        let first = queue.create("upload project", &json!({"project": "demo"})).unwrap();
        let second = queue.create("purge project", &json!({"project": "demo"})).unwrap();
        assert_eq!((first, second), (1, 2));

        queue.comment(first, "gypsum failure (LOCK_MISSING): gone").unwrap();
        queue.close(second).unwrap();

        let reopened = FsJobQueue::new(dir.path()).unwrap();
        assert_eq!(reopened.get(second).unwrap().state, JobState::Closed);
        assert_eq!(reopened.comments(first).unwrap().len(), 1);

        let open = reopened.list_all(&JobQuery::open_oldest_first()).unwrap();
        assert_eq!(open.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first]);
    }

    #[test]
    fn test_missing_record() {
        let dir = TempDir::new().unwrap();
        let queue = FsJobQueue::new(dir.path()).unwrap();
        assert!(matches!(queue.get(7), Err(QueueError::NotFound(7))));
        assert!(matches!(queue.close(7), Err(QueueError::NotFound(7))));
    }

    #[test]
    fn test_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let queue = FsJobQueue::new(dir.path()).unwrap();
        assert_eq!(queue.create("purge project", &json!({})).unwrap(), 1);
    }
}
