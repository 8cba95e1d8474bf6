//! Latest-version pointers.
//!
//! A project's pointers are a cache of a pure reduction over its published
//! versions: the version with the greatest index time wins, ties broken by
//! the lexicographically greatest version name. The publisher advances the
//! pointers monotonically; the purger recomputes them from revision
//! metadata before deleting anything they might reference.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use gypsum_protocol::{LatestPointer, ProjectPaths, RevisionMetadata, VersionPaths};
use gypsum_store::{ObjectStore, ObjectStoreExt, StoreError, StoreResult};

use crate::fanout::map_concurrent;

/// Whether a version is still being uploaded.
///
/// Derived from the existence of the lock object at the moment of asking;
/// never cache it across a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Locked,
    Unlocked,
}

impl VersionState {
    pub fn probe(store: &dyn ObjectStore, paths: &VersionPaths) -> StoreResult<Self> {
        Ok(if store.exists(&paths.lock())? {
            VersionState::Locked
        } else {
            VersionState::Unlocked
        })
    }
}

/// A published version eligible to be pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub version: String,
    pub index_time: i64,
    /// Whether the version carries an expiry time.
    pub expires: bool,
}

/// Pick the pointer for a set of candidates; the placeholder if empty.
pub fn select_latest<'a, I>(candidates: I) -> LatestPointer
where
    I: IntoIterator<Item = &'a Candidate>,
{
    candidates
        .into_iter()
        .max_by(|a, b| {
            a.index_time
                .cmp(&b.index_time)
                .then_with(|| a.version.cmp(&b.version))
        })
        .map(|best| LatestPointer::new(best.version.clone(), best.index_time))
        .unwrap_or_else(LatestPointer::placeholder)
}

/// Read a stored pointer. A pointer that does not decode counts as absent.
pub fn read_pointer(store: &dyn ObjectStore, key: &str) -> StoreResult<Option<LatestPointer>> {
    match store.get_json::<LatestPointer>(key) {
        Ok(pointer) => Ok(pointer),
        Err(StoreError::Decode { message, .. }) => {
            warn!(key, %message, "ignoring unreadable latest pointer");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Write `candidate` only if it is strictly newer than the stored pointer.
///
/// Returns whether the pointer was written.
pub fn advance_pointer(
    store: &dyn ObjectStore,
    key: &str,
    candidate: &LatestPointer,
) -> StoreResult<bool> {
    let current = read_pointer(store, key)?;
    if !candidate.supersedes(current.as_ref()) {
        debug!(key, version = %candidate.version, "latest pointer already newer");
        return Ok(false);
    }
    store.put_json(key, candidate)?;
    Ok(true)
}

/// Write `pointer` only if nothing is stored at `key`.
pub fn write_if_absent(
    store: &dyn ObjectStore,
    key: &str,
    pointer: &LatestPointer,
) -> StoreResult<bool> {
    if store.exists(key)? {
        return Ok(false);
    }
    store.put_json(key, pointer)?;
    Ok(true)
}

/// Both pointers of a project after recomputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputedLatest {
    /// Over every published version.
    pub all: LatestPointer,
    /// Over published versions without an expiry time.
    pub persistent: LatestPointer,
}

/// Tuning for candidate collection.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub page_size: usize,
}

/// Published versions of a project, excluding `excluded` and locked ones.
///
/// Versions whose revision metadata is missing or unreadable are skipped.
pub fn collect_candidates(
    store: &dyn ObjectStore,
    project: &ProjectPaths,
    excluded: &BTreeSet<String>,
    options: ScanOptions,
) -> StoreResult<Vec<Candidate>> {
    let versions: Vec<VersionPaths> = store
        .list_common_prefixes(&project.prefix(), options.page_size)?
        .iter()
        .filter_map(|prefix| project.version_from_common_prefix(prefix))
        .filter(|version| !excluded.contains(version))
        .filter_map(|version| project.version(&version).ok())
        .collect();

    let found = map_concurrent(&versions, options.concurrency, |paths| {
        inspect_version(store, paths)
    })?;
    Ok(found.into_iter().flatten().collect())
}

fn inspect_version(store: &dyn ObjectStore, paths: &VersionPaths) -> StoreResult<Option<Candidate>> {
    if VersionState::probe(store, paths)? == VersionState::Locked {
        return Ok(None);
    }
    match store.get_json::<RevisionMetadata>(&paths.revision()) {
        Ok(Some(metadata)) => Ok(Some(Candidate {
            version: paths.version().to_string(),
            index_time: metadata.index_millis(),
            expires: metadata.expires(),
        })),
        Ok(None) => {
            warn!(
                project = paths.project(),
                version = paths.version(),
                "unlocked version has no revision metadata"
            );
            Ok(None)
        }
        Err(StoreError::Decode { message, .. }) => {
            warn!(
                project = paths.project(),
                version = paths.version(),
                %message,
                "unreadable revision metadata"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Recompute and overwrite both pointers of a project.
pub fn recompute(
    store: &dyn ObjectStore,
    project: &ProjectPaths,
    excluded: &BTreeSet<String>,
    options: ScanOptions,
) -> StoreResult<RecomputedLatest> {
    let candidates = collect_candidates(store, project, excluded, options)?;
    let recomputed = RecomputedLatest {
        all: select_latest(&candidates),
        persistent: select_latest(candidates.iter().filter(|c| !c.expires)),
    };

    store.put_json(&project.latest_all(), &recomputed.all)?;
    store.put_json(&project.latest_persistent(), &recomputed.persistent)?;
    info!(
        project = project.project(),
        latest = %recomputed.all.version,
        persistent = %recomputed.persistent.version,
        "recomputed latest pointers"
    );
    Ok(recomputed)
}
