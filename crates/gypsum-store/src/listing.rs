//! S3-style listing over a sorted key set.
//!
//! Both local backends keep (or can produce) their keys in sorted order and
//! share this routine for prefix filtering, delimiter folding and
//! start-after continuation tokens.

use gypsum_protocol::paths::DELIMITER;

use crate::{ListEntry, ListPage, ListRequest, StoreError, StoreResult};

/// Reject keys that cannot be mapped onto a hierarchical namespace.
pub fn validate_key(key: &str) -> StoreResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with(DELIMITER) {
        Some("key must be relative")
    } else if key.split(DELIMITER).any(str::is_empty) {
        Some("key contains an empty segment")
    } else if key.split(DELIMITER).any(|s| s == "." || s == "..") {
        Some("key contains a '.' or '..' segment")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Produce one page of a listing from keys in ascending order.
///
/// `token` is the name of the last entry of the previous page. A token ending
/// in the delimiter is a folded common prefix, so every key beneath it was
/// already reported.
pub(crate) fn page_sorted_keys<'a, I>(
    keys: I,
    request: &ListRequest,
    token: Option<&str>,
    max_keys: usize,
) -> ListPage
where
    I: IntoIterator<Item = &'a str>,
{
    let max_keys = max_keys.max(1);
    let mut entries: Vec<ListEntry> = Vec::new();
    let mut next = None;

    for key in keys {
        let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
            continue;
        };
        if let Some(token) = token {
            if key <= token || (token.ends_with(DELIMITER) && key.starts_with(token)) {
                continue;
            }
        }

        let entry = match rest.find(DELIMITER) {
            Some(i) if request.delimited => {
                ListEntry::CommonPrefix(format!("{}{}", request.prefix, &rest[..=i]))
            }
            _ => ListEntry::Object(key.to_string()),
        };

        if entries.last() == Some(&entry) {
            continue;
        }
        if entries.len() == max_keys {
            next = entries.last().map(|e: &ListEntry| e.name().to_string());
            break;
        }
        entries.push(entry);
    }

    ListPage {
        items: entries,
        next,
    }
}
