//! Object store adapters for gypsum.
//!
//! The publisher and purger only ever talk to an [`ObjectStore`]: a flat
//! key/value blob store keyed by `/`-delimited strings, with S3-style
//! prefix listing. The protocol assumes get/put/delete are immediately
//! consistent while listings may lag.
//!
//! Backends:
//! - [`FsObjectStore`]: objects as files under a root directory
//! - [`MemoryObjectStore`]: in-process map with operation log and failure
//!   injection, for tests

mod error;
mod fs;
mod listing;
mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

use gypsum_protocol::page::{paginate, Page};
use gypsum_protocol::JSON_CONTENT_TYPE;

pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use listing::validate_key;
pub use memory::{FailureInjection, MemoryObjectStore, StoreOp};

/// Default number of entries requested per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Parameters of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Only keys starting with this string are listed.
    pub prefix: String,
    /// Fold keys containing a further `/` after the prefix into common prefixes.
    pub delimited: bool,
    /// Maximum entries per page.
    pub max_keys: usize,
}

impl ListRequest {
    /// Every key under `prefix`, recursively.
    pub fn flat(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimited: false,
            max_keys: DEFAULT_PAGE_SIZE,
        }
    }

    /// Direct children of `prefix`, with subdirectories folded.
    pub fn delimited(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimited: true,
            max_keys: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }
}

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Object(String),
    CommonPrefix(String),
}

impl ListEntry {
    pub fn name(&self) -> &str {
        match self {
            ListEntry::Object(name) | ListEntry::CommonPrefix(name) => name,
        }
    }
}

/// One page of a listing.
pub type ListPage = Page<ListEntry>;

/// Blob store used for every durable piece of gypsum state.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, or `None` if it does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Whether an object exists.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Create or replace an object.
    fn put(&self, key: &str, body: &[u8], content_type: &str) -> StoreResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Fetch one page of a listing.
    fn list(&self, request: &ListRequest, token: Option<&str>) -> StoreResult<ListPage>;
}

/// Convenience operations built on [`ObjectStore`].
pub trait ObjectStoreExt: ObjectStore {
    /// Lazily iterate every entry of a listing, following continuation tokens.
    fn list_all<'a>(
        &'a self,
        request: ListRequest,
    ) -> Box<dyn Iterator<Item = StoreResult<ListEntry>> + 'a>
    where
        Self: 'a,
    {
        Box::new(paginate(move |token: Option<&str>| self.list(&request, token)))
    }

    /// Every object key under `prefix`, in listing order.
    fn list_keys(&self, prefix: &str, page_size: usize) -> StoreResult<Vec<String>> {
        self.list_all(ListRequest::flat(prefix).with_max_keys(page_size))
            .filter_map(|entry| match entry {
                Ok(ListEntry::Object(key)) => Some(Ok(key)),
                Ok(ListEntry::CommonPrefix(_)) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    /// Every common prefix directly beneath `prefix`, in listing order.
    fn list_common_prefixes(&self, prefix: &str, page_size: usize) -> StoreResult<Vec<String>> {
        self.list_all(ListRequest::delimited(prefix).with_max_keys(page_size))
            .filter_map(|entry| match entry {
                Ok(ListEntry::CommonPrefix(p)) => Some(Ok(p)),
                Ok(ListEntry::Object(_)) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }

    /// Fetch and decode a JSON object, or `None` if it does not exist.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Decode {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Encode and store a JSON object.
    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let body = serde_json::to_vec(value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.put(key, &body, JSON_CONTENT_TYPE)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}
