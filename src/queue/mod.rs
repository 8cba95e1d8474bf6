//! Job queue adapters.
//!
//! The queue is an issue tracker used as a durable work list: finalize
//! requests and purge jobs are records with a title, a JSON body, an
//! open/closed state and a comment thread. Listing is paginated and
//! filtered by creator and state.
//!
//! Backends:
//! - [`GithubJobQueue`]: issues of a GitHub repository
//! - [`FsJobQueue`]: one JSON file per record under a directory
//! - [`MemoryJobQueue`]: in-process, for tests

mod fs;
mod github;
mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use gypsum_protocol::page::{paginate, Page};

pub use fs::FsJobQueue;
pub use github::{next_link, GithubJobQueue, DEFAULT_API_URL};
pub use memory::{MemoryJobQueue, QueueFailures};

/// Identity used by local queues when creating records.
pub const LOCAL_CREATOR: &str = "gypsum";

/// Queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("record #{0} not found")]
    NotFound(u64),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{method} {url} returned {status}: {message}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("record #{id} is corrupt: {message}")]
    Corrupt { id: u64, message: String },

    #[error("{0}")]
    Backend(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Open,
    Closed,
}

/// One queue record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub state: JobState,
    pub creator: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Open,
    Closed,
    All,
}

impl StateFilter {
    pub fn matches(&self, state: JobState) -> bool {
        match self {
            StateFilter::Open => state == JobState::Open,
            StateFilter::Closed => state == JobState::Closed,
            StateFilter::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

/// Ordering of a listing by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        }
    }
}

/// Filter for a record listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub state: StateFilter,
    pub direction: Direction,
    /// Restrict to records created by this identity; backends default to
    /// their own identity when unset.
    pub creator: Option<String>,
}

impl JobQuery {
    /// Open records, oldest first.
    pub fn open_oldest_first() -> Self {
        Self {
            state: StateFilter::Open,
            direction: Direction::Ascending,
            creator: None,
        }
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }
}

/// Durable work list.
pub trait JobQueue: Send + Sync {
    /// Create an open record and return its id.
    fn create(&self, title: &str, body: &Value) -> QueueResult<u64>;

    fn get(&self, id: u64) -> QueueResult<JobRecord>;

    /// Close a record. Closing a closed record succeeds.
    fn close(&self, id: u64) -> QueueResult<()>;

    /// Append a comment to a record's thread.
    fn comment(&self, id: u64, text: &str) -> QueueResult<()>;

    /// Fetch one page of a listing.
    fn list(&self, query: &JobQuery, token: Option<&str>) -> QueueResult<Page<JobRecord>>;

    /// Every record matching `query`, following continuation to the end.
    fn list_all(&self, query: &JobQuery) -> QueueResult<Vec<JobRecord>> {
        paginate(|token: Option<&str>| self.list(query, token)).collect()
    }
}

/// Page over records already filtered and sorted, using the offset as token.
pub(crate) fn page_by_offset(
    records: Vec<JobRecord>,
    token: Option<&str>,
    page_size: usize,
) -> QueueResult<Page<JobRecord>> {
    let offset = match token {
        None => 0,
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| QueueError::Backend(format!("invalid continuation token '{}'", token)))?,
    };
    let page_size = page_size.max(1);
    let end = offset.saturating_add(page_size);
    let more = records.len() > end;
    let items: Vec<JobRecord> = records.into_iter().skip(offset).take(page_size).collect();
    Ok(if more {
        Page::with_next(items, end.to_string())
    } else {
        Page::last(items)
    })
}

/// Apply a query's state and creator filters and its ordering.
pub(crate) fn select_records(
    mut records: Vec<JobRecord>,
    query: &JobQuery,
    default_creator: &str,
) -> Vec<JobRecord> {
    let creator = query.creator.as_deref().unwrap_or(default_creator);
    records.retain(|r| query.state.matches(r.state) && r.creator == creator);
    records.sort_by_key(|r| r.id);
    if query.direction == Direction::Descending {
        records.reverse();
    }
    records
}
