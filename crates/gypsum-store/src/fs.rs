//! Filesystem-backed object store.
//!
//! Each object is a file at `<root>/<key>`. Writes go to a staging file first
//! and are renamed into place, so readers never observe a partially written
//! object. The staging directory uses the reserved `..` prefix and therefore
//! never collides with a project name.
//!
//! Content types are not persisted.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use gypsum_protocol::paths::DELIMITER;

use crate::listing::{page_sorted_keys, validate_key};
use crate::{ListPage, ListRequest, ObjectStore, StoreError, StoreResult};

const STAGING_DIR: &str = "..staging";

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR))
            .map_err(|e| StoreError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split(DELIMITER).fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    fn staging_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!(".tmp.{}", uuid::Uuid::new_v4()))
    }

    fn write_staged(&self, staged: &Path, body: &[u8]) -> io::Result<()> {
        let mut file = File::create(staged)?;
        file.write_all(body)?;
        file.sync_all()
    }

    /// Move a staged file into place, creating its parent directories.
    ///
    /// A concurrent delete may prune the parent between creation and
    /// rename, so a missing directory is retried once.
    fn install(&self, staged: &Path, path: &Path) -> io::Result<()> {
        let attempt = || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(staged, path)
        };
        match attempt() {
            Err(e) if e.kind() == io::ErrorKind::NotFound && staged.exists() => attempt(),
            result => result,
        }
    }

    /// Remove now-empty directories between `path` and the root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Key for a file beneath the root, or `None` for non-UTF-8 names.
    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> =
            relative.components().map(|c| c.as_os_str().to_str()).collect();
        Some(segments?.join("/"))
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(_) if path.is_dir() => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.object_path(key)?.is_file())
    }

    fn put(&self, key: &str, body: &[u8], _content_type: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        let staged = self.staging_path();
        if let Err(e) = self.write_staged(&staged, body) {
            let _ = fs::remove_file(&staged);
            return Err(StoreError::io(key, e));
        }
        if let Err(e) = self.install(&staged, &path) {
            let _ = fs::remove_file(&staged);
            return Err(StoreError::io(key, e));
        }

        debug!(key, bytes = body.len(), "stored object");
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_parents(&path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn list(&self, request: &ListRequest, token: Option<&str>) -> StoreResult<ListPage> {
        // Walk the deepest directory fully named by the prefix.
        let base = match request.prefix.rfind(DELIMITER) {
            Some(i) => self.object_path(&request.prefix[..i])?,
            None => self.root.clone(),
        };
        if !base.is_dir() {
            return Ok(ListPage::last(Vec::new()));
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| {
                StoreError::io(&request.prefix, io::Error::new(io::ErrorKind::Other, e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = self.key_for(entry.path()) else {
                continue;
            };
            if key.starts_with(STAGING_DIR) || !key.starts_with(request.prefix.as_str()) {
                continue;
            }
            keys.push(key);
        }
        keys.sort();

        Ok(page_sorted_keys(
            keys.iter().map(String::as_str),
            request,
            token,
            request.max_keys,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ListEntry, ObjectStoreExt};
    use gypsum_protocol::JSON_CONTENT_TYPE;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();

        assert_eq!(store.get("demo/v1/a.json").unwrap(), None);
        store.put("demo/v1/a.json", b"{\"x\":1}", JSON_CONTENT_TYPE).unwrap();
        assert_eq!(store.get("demo/v1/a.json").unwrap(), Some(b"{\"x\":1}".to_vec()));
        assert!(store.exists("demo/v1/a.json").unwrap());
        assert!(dir.path().join("demo/v1/a.json").is_file());
    }

    #[test]
    fn test_directory_is_not_an_object() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        store.put("demo/v1/a.json", b"{}", JSON_CONTENT_TYPE).unwrap();
        assert_eq!(store.get("demo/v1").unwrap(), None);
        assert!(!store.exists("demo/v1").unwrap());
    }

    #[test]
    fn test_delete_prunes_empty_directories() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        store.put("demo/v1/sub/a.json", b"{}", JSON_CONTENT_TYPE).unwrap();
        store.delete("demo/v1/sub/a.json").unwrap();
        store.delete("demo/v1/sub/a.json").unwrap();
        assert!(!dir.path().join("demo").exists());
    }

    #[test]
    fn test_put_survives_concurrent_pruning() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();

        // Deleting the only object of one version prunes the shared project
        // directory while puts into a sibling version are in flight.
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    store.put("demo/v1/a.json", b"{}", JSON_CONTENT_TYPE).unwrap();
                    store.delete("demo/v1/a.json").unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    store.put("demo/v2/b.json", b"{}", JSON_CONTENT_TYPE).unwrap();
                    store.delete("demo/v2/b.json").unwrap();
                }
            });
        });

        assert!(store.list_keys("demo/", 10).unwrap().is_empty());
        let staging = fs::read_dir(dir.path().join(STAGING_DIR)).unwrap();
        assert_eq!(staging.count(), 0);
    }

    #[test]
    fn test_listing_matches_memory_semantics() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        for key in ["demo/..latest.json", "demo/v1/..LOCK", "demo/v1/a.json", "demo/v2/b/c.json"] {
            store.put(key, b"{}", JSON_CONTENT_TYPE).unwrap();
        }

        let page = store.list(&ListRequest::delimited("demo/"), None).unwrap();
        assert_eq!(
            page.items,
            vec![
                ListEntry::Object("demo/..latest.json".into()),
                ListEntry::CommonPrefix("demo/v1/".into()),
                ListEntry::CommonPrefix("demo/v2/".into()),
            ]
        );

        let keys = store.list_keys("demo/v1/", 1).unwrap();
        assert_eq!(keys, vec!["demo/v1/..LOCK".to_string(), "demo/v1/a.json".to_string()]);

        assert!(store.list_keys("missing/", 10).unwrap().is_empty());
    }

    #[test]
    fn test_staging_directory_is_never_listed() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        fs::write(dir.path().join(STAGING_DIR).join(".tmp.leftover"), b"x").unwrap();
        store.put("demo/v1/a.json", b"{}", JSON_CONTENT_TYPE).unwrap();
        let keys = store.list_keys("", 100).unwrap();
        assert_eq!(keys, vec!["demo/v1/a.json".to_string()]);
    }
}
