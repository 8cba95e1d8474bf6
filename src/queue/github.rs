//! GitHub issues as a job queue.
//!
//! Records are issues of one repository. Listing pages follow the
//! `Link: <...>; rel="next"` header, and only issues opened by the
//! authenticated identity are considered.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, LINK};
use serde_json::{json, Value};
use tracing::debug;

use gypsum_protocol::page::Page;

use super::{JobQuery, JobQueue, JobRecord, JobState, QueueError, QueueResult};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: u32 = 100;

/// Issue tracker of a GitHub repository.
#[derive(Clone)]
pub struct GithubJobQueue {
    client: Client,
    api_url: String,
    repository: String,
    token: String,
    login: String,
}

impl GithubJobQueue {
    /// Authenticate with `token` and resolve the identity used as creator
    /// filter.
    pub fn connect(api_url: &str, repository: &str, token: &str) -> QueueResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("gypsum/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueueError::Http(e.to_string()))?;
        let mut queue = Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
            login: String::new(),
        };

        let url = format!("{}/user", queue.api_url);
        let user = queue.send_json("GET", queue.client.get(&url), &url)?;
        queue.login = user
            .get("login")
            .and_then(Value::as_str)
            .ok_or_else(|| QueueError::Response("user response has no login".into()))?
            .to_string();
        debug!(login = %queue.login, repository, "authenticated against issue tracker");
        Ok(queue)
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/issues", self.api_url, self.repository)
    }

    fn issue_url(&self, id: u64) -> String {
        format!("{}/{}", self.issues_url(), id)
    }

    fn send(&self, method: &'static str, request: RequestBuilder, url: &str) -> QueueResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(|e| QueueError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        Err(QueueError::Status {
            method,
            url: url.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    fn send_json(&self, method: &'static str, request: RequestBuilder, url: &str) -> QueueResult<Value> {
        self.send(method, request, url)?
            .json::<Value>()
            .map_err(|e| QueueError::Response(e.to_string()))
    }

    fn not_found_as(err: QueueError, id: u64) -> QueueError {
        match err {
            QueueError::Status { status: 404, .. } => QueueError::NotFound(id),
            other => other,
        }
    }
}

/// Decode an issue object into a record.
fn issue_to_record(issue: &Value) -> QueueResult<JobRecord> {
    let id = issue
        .get("number")
        .and_then(Value::as_u64)
        .ok_or_else(|| QueueError::Response("issue has no number".into()))?;
    let state = match issue.get("state").and_then(Value::as_str) {
        Some("open") => JobState::Open,
        Some("closed") => JobState::Closed,
        other => {
            return Err(QueueError::Corrupt {
                id,
                message: format!("unexpected state {:?}", other),
            })
        }
    };
    let text = |field: &str| {
        issue
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Ok(JobRecord {
        id,
        title: text("title"),
        body: text("body"),
        state,
        creator: issue
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// The `rel="next"` target of a `Link` header, if any.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

impl JobQueue for GithubJobQueue {
    fn create(&self, title: &str, body: &Value) -> QueueResult<u64> {
        let url = self.issues_url();
        let payload = json!({ "title": title, "body": body.to_string() });
        let issue = self.send_json("POST", self.client.post(&url).json(&payload), &url)?;
        let id = issue
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| QueueError::Response("created issue has no number".into()))?;
        debug!(job = id, title, "opened issue");
        Ok(id)
    }

    fn get(&self, id: u64) -> QueueResult<JobRecord> {
        let url = self.issue_url(id);
        let issue = self
            .send_json("GET", self.client.get(&url), &url)
            .map_err(|e| Self::not_found_as(e, id))?;
        issue_to_record(&issue)
    }

    fn close(&self, id: u64) -> QueueResult<()> {
        let url = self.issue_url(id);
        let payload = json!({ "state": "closed" });
        self.send("PATCH", self.client.patch(&url).json(&payload), &url)
            .map_err(|e| Self::not_found_as(e, id))?;
        debug!(job = id, "closed issue");
        Ok(())
    }

    fn comment(&self, id: u64, text: &str) -> QueueResult<()> {
        let url = format!("{}/comments", self.issue_url(id));
        let payload = json!({ "body": text });
        self.send("POST", self.client.post(&url).json(&payload), &url)
            .map_err(|e| Self::not_found_as(e, id))?;
        Ok(())
    }

    fn list(&self, query: &JobQuery, token: Option<&str>) -> QueueResult<Page<JobRecord>> {
        let url = match token {
            Some(next) => next.to_string(),
            None => format!(
                "{}?state={}&direction={}&sort=created&creator={}&per_page={}",
                self.issues_url(),
                query.state.as_str(),
                query.direction.as_str(),
                query.creator.as_deref().unwrap_or(&self.login),
                PER_PAGE
            ),
        };

        let response = self.send("GET", self.client.get(&url), &url)?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_link);
        let issues = response
            .json::<Value>()
            .map_err(|e| QueueError::Response(e.to_string()))?;
        let issues = issues
            .as_array()
            .ok_or_else(|| QueueError::Response("issue listing is not an array".into()))?;

        // The issues endpoint also returns pull requests.
        let records = issues
            .iter()
            .filter(|issue| issue.get("pull_request").is_none())
            .map(issue_to_record)
            .collect::<QueueResult<Vec<_>>>()?;

        Ok(match next {
            Some(next) => Page::with_next(records, next),
            None => Page::last(records),
        })
    }
}
