//! Retry accounting: attempt counters, retry budget, dead letters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::queue::{ItemId, QueueItem};

/// How many failed deliveries an item may accumulate before it is pulled off
/// the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever: a stuck head blocks the queue until it succeeds.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Has an item with `attempts` failures used up its budget?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Failed-attempt counts keyed by item id.
///
/// Kept apart from the queue record so a failed run leaves the queue
/// byte-for-byte unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptLog(BTreeMap<String, u32>);

impl AttemptLog {
    pub fn get(&self, id: &ItemId) -> u32 {
        self.0.get(id.as_str()).copied().unwrap_or(0)
    }

    /// Bump the count for `id`, returning the new total.
    pub fn increment(&mut self, id: &ItemId) -> u32 {
        let count = self.0.entry(id.as_str().to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop counters for ids the predicate rejects. Returns true if anything
    /// was removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&ItemId) -> bool) -> bool {
        let before = self.0.len();
        self.0.retain(|id, _| keep(&ItemId::from(id.as_str())));
        self.0.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An item that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: QueueItem,
    pub attempts: u32,
    /// Error from the last failed attempt.
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}
