//! Cluster info cache — the latest fetch outcome as an immutable snapshot.
//!
//! Readers get an `Arc<CacheEntry>` without ever waiting on a fetch. The
//! refresh loop is the only writer; each write swaps in a new entry
//! built from the previous one, so a reader observes either the old or
//! the new entry and nothing in between.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::FetchError;
use super::types::ClusterInfo;

/// Snapshot of the retriever's knowledge after some number of fetches.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Last successfully fetched document; kept through failures.
    pub document: Option<Arc<ClusterInfo>>,
    /// Number of successful fetches so far.
    pub version: u64,
    /// Number of fetch outcomes (success or failure) applied so far.
    pub sequence: u64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Error of the most recent fetch, `None` if it succeeded.
    pub last_error: Option<Arc<FetchError>>,
}

impl CacheEntry {
    /// Build the entry that follows `self` after a fetch outcome.
    fn next(&self, result: Result<ClusterInfo, FetchError>, now: DateTime<Utc>) -> Self {
        match result {
            Ok(document) => Self {
                document: Some(Arc::new(document)),
                version: self.version + 1,
                sequence: self.sequence + 1,
                last_success_time: Some(now),
                last_failure_time: self.last_failure_time,
                last_error: None,
            },
            Err(err) => Self {
                document: self.document.clone(),
                version: self.version,
                sequence: self.sequence + 1,
                last_success_time: self.last_success_time,
                last_failure_time: Some(now),
                last_error: Some(Arc::new(err)),
            },
        }
    }

    /// True once at least one fetch has been applied.
    pub fn is_populated(&self) -> bool {
        self.sequence > 0
    }

    /// True when the most recent fetch succeeded.
    pub fn is_up(&self) -> bool {
        self.is_populated() && self.last_error.is_none()
    }
}

pub struct Cache {
    current: ArcSwap<CacheEntry>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CacheEntry::default()),
        }
    }

    /// Current snapshot. Never blocks.
    pub fn get(&self) -> Arc<CacheEntry> {
        self.current.load_full()
    }

    /// Apply a fetch outcome and return the new snapshot.
    ///
    /// Must only be called from the refresh loop; concurrent writers
    /// would race on `version`.
    pub fn replace(&self, result: Result<ClusterInfo, FetchError>) -> Arc<CacheEntry> {
        let next = Arc::new(self.current.load().next(result, Utc::now()));
        self.current.store(Arc::clone(&next));
        next
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
